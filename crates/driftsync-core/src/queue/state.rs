// ── Persisted queue state ──
//
// `{queue, errorQueue, syncDate, deletedIds}` under `<prefix>-state`.
// Writes go through their own lane so they never wait on resource writes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::SyncQueue;
use crate::command::CommandRecord;
use crate::error::{StorageError, SyncError};
use crate::model::ResourceId;
use crate::storage::{StorageBackend, state_key};

/// Serializable snapshot of the sync queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    #[serde(default)]
    pub queue: Vec<CommandRecord>,
    #[serde(default)]
    pub error_queue: Vec<CommandRecord>,
    #[serde(default)]
    pub sync_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_ids: Vec<ResourceId>,
}

/// Loose shape used when reading, so one bad entry cannot sink the load.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStateDocument {
    #[serde(default)]
    queue: Vec<Value>,
    #[serde(default)]
    error_queue: Vec<Value>,
    #[serde(default)]
    sync_date: Option<DateTime<Utc>>,
    #[serde(default)]
    deleted_ids: Vec<ResourceId>,
}

impl StateDocument {
    /// Parse a stored document, skipping malformed command entries.
    /// Returns the document and the number of skipped entries.
    pub fn parse(raw: &str) -> Result<(Self, usize), serde_json::Error> {
        let loose: RawStateDocument = serde_json::from_str(raw)?;
        let mut skipped = 0;
        let mut records = |values: Vec<Value>| -> Vec<CommandRecord> {
            values
                .into_iter()
                .filter_map(|value| match serde_json::from_value(value) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(error = %e, "dropping malformed queued command");
                        skipped += 1;
                        None
                    }
                })
                .collect()
        };
        let queue = records(loose.queue);
        let error_queue = records(loose.error_queue);
        Ok((
            Self {
                queue,
                error_queue,
                sync_date: loose.sync_date,
                deleted_ids: loose.deleted_ids,
            },
            skipped,
        ))
    }
}

/// Serialized write lane for the state document.
pub struct StateStore {
    key: String,
    storage: Arc<dyn StorageBackend>,
    lane: Mutex<()>,
}

impl StateStore {
    pub fn new(storage_prefix: &str, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            key: state_key(storage_prefix),
            storage,
            lane: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Persist the queue as it is once this write reaches the head of
    /// the lane, so the last write always carries the newest state.
    pub async fn save(&self, queue: &Mutex<SyncQueue>) -> Result<(), SyncError> {
        let _lane = self.lane.lock().await;
        let snapshot = queue.lock().await.snapshot();
        let raw = serde_json::to_string(&snapshot)?;
        if let Err(e) = self.storage.save(&self.key, raw).await {
            warn!(key = %self.key, error = %e, "state document write failed");
            return Err(e.into());
        }
        debug!(
            pending = snapshot.queue.len(),
            errors = snapshot.error_queue.len(),
            "saved sync state"
        );
        Ok(())
    }

    pub async fn load(&self) -> Result<Option<StateDocument>, SyncError> {
        let _lane = self.lane.lock().await;
        let Some(raw) = self.storage.load(&self.key).await? else {
            return Ok(None);
        };
        let (doc, skipped) = StateDocument::parse(&raw).map_err(|e| StorageError::Corrupt {
            key: self.key.clone(),
            reason: e.to_string(),
        })?;
        if skipped > 0 {
            warn!(key = %self.key, skipped, "state document contained malformed commands");
        }
        Ok(Some(doc))
    }
}
