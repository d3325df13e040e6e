// ── Startup bootstrap ──
//
// When the local watermark is behind the cloud, every bootstrap ReadAll
// runs in batches of `max_concurrent_requests` and its winners are saved
// silently; listeners hear about it once startup finishes. The watermark
// only moves when every ReadAll succeeded.

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::{Runtime, SyncEngine};
use crate::command::{Command, CommandName};
use crate::event::EngineEvent;
use crate::resolver;

impl SyncEngine {
    pub(super) async fn bootstrap(&self, rt: &Runtime) {
        let cloud_date = match rt.cloud_clock.cloud_sync_date().await {
            Ok(date) => date,
            Err(e) => {
                warn!(error = %e, "cloud watermark unavailable, skipping bootstrap");
                return;
            }
        };
        let local_date = self.inner.queue.lock().await.sync_date();
        if local_date.is_some_and(|local| local >= cloud_date) {
            debug!(?local_date, %cloud_date, "local watermark is current");
            return;
        }

        info!(
            commands = rt.bootstrap.len(),
            ?local_date,
            %cloud_date,
            "bootstrapping from cloud"
        );
        let batch_size = self.inner.config.max_concurrent_requests;
        let mut complete = true;
        let mut saved = 0;
        for batch in rt.bootstrap.chunks(batch_size) {
            let results = join_all(batch.iter().map(|command| self.read_all(rt, command))).await;
            for result in results {
                match result {
                    Some(count) => saved += count,
                    None => complete = false,
                }
            }
        }

        if !complete {
            warn!("bootstrap incomplete, watermark left unchanged");
            return;
        }
        let sync_date = {
            let mut queue = self.inner.queue.lock().await;
            queue.advance_sync_date(cloud_date);
            queue.sync_date().unwrap_or(cloud_date)
        };
        info!(resources = saved, %sync_date, "bootstrap complete");
        self.emit(EngineEvent::Bootstrapped {
            sync_date,
            resources: saved,
        });
    }

    /// Run one bootstrap ReadAll. `None` marks a failure.
    async fn read_all(&self, rt: &Runtime, command: &Command) -> Option<usize> {
        if command.name != CommandName::ReadAll {
            warn!(
                command_name = %command.name,
                resource_type = %command.resource_type,
                "ignoring non-ReadAll bootstrap command"
            );
            return Some(0);
        }

        let records = match command.get_cloud_copies().await {
            Ok(copies) if copies.success => copies.records,
            Ok(_) => {
                warn!(resource_type = %command.resource_type, "bootstrap read unsuccessful");
                return None;
            }
            Err(e) => {
                warn!(resource_type = %command.resource_type, error = %e, "bootstrap read failed");
                return None;
            }
        };

        let local = rt.store.all(&command.resource_type).await;
        let deleted = self.inner.queue.lock().await.deleted_ids().clone();
        let outcome = resolver::reconcile(&local, &records, &deleted);
        let count = outcome.to_persist.len();
        if let Err(e) = rt.store.save(outcome.to_persist, true, false).await {
            warn!(resource_type = %command.resource_type, error = %e, "bootstrap save failed");
            self.storage_failed(rt, &e);
            return None;
        }
        debug!(resource_type = %command.resource_type, count, "bootstrap batch saved");
        Some(count)
    }
}
