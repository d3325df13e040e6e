// ── Dispatcher ──
//
// One tick: probe connectivity, move eligible commands in flight, and
// hand each to its own tracked task. The tick never waits for the
// network; completions settle the queue and store independently.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Runtime, SyncEngine};
use crate::command::{Command, CommandName, SyncResponse};
use crate::error::SyncError;
use crate::event::EngineEvent;
use crate::model::Resource;

impl SyncEngine {
    /// Run one dispatcher tick now. Returns how many commands were sent.
    pub async fn sync_now(&self) -> Result<usize, SyncError> {
        self.runtime()?;

        let checker = self.inner.online_checker.read().await.clone();
        let online = checker.is_online().await;
        let was_online = self.inner.online.send_replace(online);
        if was_online != online {
            info!(online, "connectivity changed");
            self.emit(EngineEvent::OnlineChanged { online });
        }
        if !online {
            return Ok(0);
        }

        let config = &self.inner.config;
        let batch = {
            let mut queue = self.inner.queue.lock().await;
            let batch = queue.take_dispatchable(
                config.max_concurrent_requests,
                config.min_command_age(),
                Utc::now(),
            );
            debug!(
                in_progress = queue.in_progress().len(),
                max = config.max_concurrent_requests,
                waiting = queue.pending().len(),
                completed = queue.completed(),
                errors = queue.errors().len(),
                "sync tick"
            );
            batch
        };

        let sent = batch.len();
        for command in batch {
            debug!(
                command_id = %command.id,
                command_name = %command.name,
                resource_id = %command.resource_id,
                "dispatching command"
            );
            self.emit(EngineEvent::Dispatched {
                command_id: command.id,
                command_name: command.name,
                resource_id: command.resource_id.clone(),
            });
            let engine = self.clone();
            self.inner
                .in_flight
                .spawn(async move { engine.run_command(command).await });
        }
        Ok(sent)
    }

    /// Execute one in-flight command and settle its outcome.
    async fn run_command(&self, command: Command) {
        let Ok(rt) = self.runtime() else {
            return;
        };

        match command.sync().await {
            Ok(SyncResponse {
                new_sync_date: Some(sync_date),
                new_resource,
            }) => self.confirm(rt, &command, sync_date, new_resource).await,
            Ok(_) => self.fail(&command, "remote did not confirm the write").await,
            Err(e) => self.fail(&command, &e.to_string()).await,
        }

        if let Err(e) = self.save_state(rt).await {
            warn!(error = %e, "failed to persist state after completion");
        }
    }

    async fn confirm(
        &self,
        rt: &Runtime,
        command: &Command,
        sync_date: DateTime<Utc>,
        new_resource: Option<Resource>,
    ) {
        if self
            .inner
            .queue
            .lock()
            .await
            .confirm(command.id, sync_date)
            .is_none()
        {
            return;
        }
        debug!(command_id = %command.id, %sync_date, "command confirmed");
        self.emit(EngineEvent::Confirmed {
            command_id: command.id,
            sync_date,
        });

        let applied = if command.name == CommandName::Delete {
            rt.store
                .delete(&command.resource_type, &command.resource_id)
                .await
                .map(|_| ())
        } else if let Some(resource) = new_resource {
            rt.store.save(vec![resource], true, true).await
        } else {
            Ok(())
        };
        if let Err(e) = applied {
            warn!(command_id = %command.id, error = %e, "confirmed result not applied locally");
            self.storage_failed(rt, &e);
        }
    }

    async fn fail(&self, command: &Command, reason: &str) {
        if self.inner.queue.lock().await.fail(command.id).is_none() {
            return;
        }
        warn!(
            command_id = %command.id,
            command_name = %command.name,
            resource_id = %command.resource_id,
            reason,
            "command failed, moved to error queue"
        );
        self.emit(EngineEvent::Failed {
            command_id: command.id,
            reason: reason.to_owned(),
        });
    }
}

/// Periodic dispatcher, restarted whenever the sync period changes.
pub(super) async fn sync_task(engine: SyncEngine, cancel: CancellationToken) {
    let mut period_rx = engine.inner.period.subscribe();

    loop {
        let period: Duration = *period_rx.borrow_and_update();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = period_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = engine.sync_now().await {
                        warn!(error = %e, "sync tick failed");
                    }
                }
            }
        }
    }
}
