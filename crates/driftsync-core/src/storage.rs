// ── Storage hooks ──
//
// The engine persists two documents, `<prefix>-data` and `<prefix>-state`,
// as opaque strings. Backends decide where they live.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StorageError;

/// Key of the resource document for a storage prefix.
pub fn data_key(prefix: &str) -> String {
    format!("{prefix}-data")
}

/// Key of the queue/watermark document for a storage prefix.
pub fn state_key(prefix: &str) -> String {
    format!("{prefix}-state")
}

/// Persistence hook for serialized documents.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn save(&self, key: &str, document: String) -> Result<(), StorageError>;

    /// `Ok(None)` when nothing was ever saved under `key`.
    async fn load(&self, key: &str) -> Result<Option<String>, StorageError>;
}

/// Process-local storage, shared across engine instances through an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    documents: DashMap<String, String>,
    reject_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw document under `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.documents.get(key).map(|doc| doc.value().clone())
    }

    pub fn insert(&self, key: impl Into<String>, document: impl Into<String>) {
        self.documents.insert(key.into(), document.into());
    }

    /// Make every subsequent `save` fail until switched back.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn save(&self, key: &str, document: String) -> Result<(), StorageError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                key: key.to_owned(),
                reason: "writes are rejected".into(),
            });
        }
        self.documents.insert(key.to_owned(), document);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get(key))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_prefix_layout() {
        assert_eq!(data_key("app"), "app-data");
        assert_eq!(state_key("app"), "app-state");
    }

    #[tokio::test]
    async fn memory_storage_round_trips_and_can_reject() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.load("k").await.unwrap(), None);

        storage.save("k", "v1".into()).await.unwrap();
        assert_eq!(storage.load("k").await.unwrap().as_deref(), Some("v1"));

        storage.set_reject_writes(true);
        assert!(storage.save("k", "v2".into()).await.is_err());
        assert_eq!(storage.get("k").as_deref(), Some("v1"));
    }
}
