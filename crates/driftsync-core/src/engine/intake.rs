// ── Command intake ──
//
// The single entry point for callers. Reads resolve immediately against
// the cloud; writes are normalized against the local copy, applied
// optimistically, consolidated into the queue and persisted before the
// call returns.

use tracing::{debug, warn};

use super::{ApplyMode, CommandOutcome, Runtime, SyncEngine};
use crate::command::{Command, CommandName};
use crate::error::SyncError;
use crate::model::{Resource, payload};
use crate::resolver;

impl SyncEngine {
    /// Submit a command with optimistic local application.
    pub async fn add_command(&self, command: Command) -> Result<CommandOutcome, SyncError> {
        self.add_command_with(command, ApplyMode::Optimistic).await
    }

    /// Submit a command.
    ///
    /// Network failures of writes never surface here; they end up in the
    /// error queue. Fails on storage errors, on a ReadAll outside
    /// bootstrap, and when a merge cannot be built by the factory.
    pub async fn add_command_with(
        &self,
        command: Command,
        mode: ApplyMode,
    ) -> Result<CommandOutcome, SyncError> {
        let rt = self.runtime()?;
        match command.name {
            CommandName::Read | CommandName::ReadAll => {
                return self.read(command).await.map(CommandOutcome::Read);
            }
            CommandName::Create | CommandName::Update | CommandName::Delete => {}
        }

        let _intake = self.inner.intake.lock().await;
        let stored = rt
            .store
            .get(&command.resource_type, &command.resource_id)
            .await;

        let mut command = command;
        if command.name == CommandName::Create && stored.is_some() {
            command = rewrite_as_update(rt, &command)?;
            debug!(resource_id = %command.resource_id, "create for existing resource became update");
        }

        if command.name.carries_payload() {
            if let Some(stored) = &stored {
                command.payload = payload::diff(&command.payload, &stored.data);
            }
            if command.payload.is_empty() {
                debug!(resource_id = %command.resource_id, "write changes nothing, dropped");
                return Ok(CommandOutcome::Dropped);
            }
        }

        if mode == ApplyMode::Optimistic {
            self.inner
                .queue
                .lock()
                .await
                .check(rt.factory.as_ref(), &command)?;
            self.apply_locally(rt, &command).await?;
        }

        let consolidation = self
            .inner
            .queue
            .lock()
            .await
            .enqueue(rt.factory.as_ref(), command)?;
        self.save_state(rt).await?;
        Ok(CommandOutcome::Queued(consolidation))
    }

    /// Resolve a Read against the cloud, last write wins.
    ///
    /// A cloud winner is saved as synced. When the cloud cannot be read
    /// the local copy is returned as it is. ReadAll is reserved for
    /// bootstrap and rejected here.
    pub async fn read(&self, command: Command) -> Result<Vec<Resource>, SyncError> {
        let rt = self.runtime()?;
        match command.name {
            CommandName::Read => {}
            CommandName::ReadAll => {
                return Err(SyncError::ReadAllOutsideBootstrap {
                    resource_type: command.resource_type,
                });
            }
            other => {
                return Err(SyncError::Unsupported {
                    command_name: other,
                    reason: "only Read can be resolved".into(),
                });
            }
        }
        let local: Vec<Resource> = rt
            .store
            .get(&command.resource_type, &command.resource_id)
            .await
            .into_iter()
            .collect();

        let cloud = match command.get_cloud_copies().await {
            Ok(copies) if copies.success => copies.records,
            Ok(_) => {
                warn!(resource_type = %command.resource_type, "cloud read unsuccessful, serving local copy");
                return Ok(local);
            }
            Err(e) => {
                warn!(resource_type = %command.resource_type, error = %e, "cloud read failed, serving local copy");
                return Ok(local);
            }
        };
        let cloud: Vec<Resource> = cloud
            .into_iter()
            .filter(|record| {
                record.resource_type == command.resource_type
                    && record.resource_id == command.resource_id
            })
            .collect();

        let deleted = self.inner.queue.lock().await.deleted_ids().clone();
        let outcome = resolver::reconcile(&local, &cloud, &deleted);
        if let Err(e) = rt.store.save(outcome.to_persist, true, true).await {
            self.storage_failed(rt, &e);
            return Err(e);
        }
        Ok(outcome.resolved)
    }

    async fn apply_locally(&self, rt: &Runtime, command: &Command) -> Result<(), SyncError> {
        let applied = if command.name == CommandName::Delete {
            rt.store
                .delete(&command.resource_type, &command.resource_id)
                .await
                .map(|_| ())
        } else {
            let resource = Resource::new(
                command.resource_type.clone(),
                command.resource_id.clone(),
                command.payload.clone(),
                command.created_at,
            );
            rt.store.save(vec![resource], false, true).await
        };
        if let Err(e) = &applied {
            self.storage_failed(rt, e);
        }
        applied
    }
}

fn rewrite_as_update(rt: &Runtime, command: &Command) -> Result<Command, SyncError> {
    rt.factory
        .build(
            &command.resource_type,
            CommandName::Update,
            &command.resource_id,
            command.payload.clone(),
        )
        .map(|update| update.with_identity(command.id, command.created_at))
        .ok_or_else(|| SyncError::FactoryMiss {
            resource_type: command.resource_type.clone(),
            command_name: CommandName::Update,
        })
}
