// ── Cloud watermark ──

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ExecutionError;

/// Supplies the authoritative watermark of the remote store.
#[async_trait]
pub trait SyncDateProvider: Send + Sync {
    async fn cloud_sync_date(&self) -> Result<DateTime<Utc>, ExecutionError>;
}

/// Provider that always reports the same watermark.
#[derive(Debug, Clone, Copy)]
pub struct FixedSyncDate(pub DateTime<Utc>);

#[async_trait]
impl SyncDateProvider for FixedSyncDate {
    async fn cloud_sync_date(&self) -> Result<DateTime<Utc>, ExecutionError> {
        Ok(self.0)
    }
}
