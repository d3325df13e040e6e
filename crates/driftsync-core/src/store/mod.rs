// ── Resource store ──
//
// Keyed local cache persisted as one document. Every mutation runs
// under a fair async mutex, so overlapping saves apply and persist in
// call order and each sees the result of the previous one. A rejected
// write leaves the in-memory document untouched and releases the lock.

mod document;
mod listeners;

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use document::DataDocument;
pub use listeners::{ListenerRegistry, ResourceListener};

use crate::error::{StorageError, SyncError};
use crate::model::{Resource, ResourceId};
use crate::storage::{StorageBackend, data_key};
use crate::stream::ResourceStream;

pub struct ResourceStore {
    key: String,
    storage: Arc<dyn StorageBackend>,
    document: Mutex<DataDocument>,
    registry: Arc<ListenerRegistry>,
}

impl ResourceStore {
    pub fn new(storage_prefix: &str, storage: Arc<dyn StorageBackend>) -> Self {
        Self::with_registry(storage_prefix, storage, Arc::new(ListenerRegistry::new()))
    }

    /// Build a store that notifies through an existing registry.
    pub fn with_registry(
        storage_prefix: &str,
        storage: Arc<dyn StorageBackend>,
        registry: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            key: data_key(storage_prefix),
            storage,
            document: Mutex::new(DataDocument::default()),
            registry,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Replace the in-memory document with the persisted one, if any.
    pub async fn load(&self) -> Result<usize, SyncError> {
        let mut doc = self.document.lock().await;
        let Some(raw) = self.storage.load(&self.key).await? else {
            return Ok(0);
        };
        let loaded: DataDocument =
            serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
                key: self.key.clone(),
                reason: e.to_string(),
            })?;
        *doc = loaded;
        debug!(key = %self.key, resources = doc.len(), "loaded resource document");
        Ok(doc.len())
    }

    /// Merge resources into the cache and persist the whole document.
    ///
    /// `synced` marks data that came from the remote side; it only affects
    /// logging. Listeners of every touched type are notified when `notify`.
    pub async fn save(
        &self,
        resources: Vec<Resource>,
        synced: bool,
        notify: bool,
    ) -> Result<(), SyncError> {
        if resources.is_empty() {
            return Ok(());
        }
        let count = resources.len();

        let mut doc = self.document.lock().await;
        let mut next = doc.clone();
        let touched = next.merge(resources);
        self.persist(&next).await?;
        *doc = next;

        debug!(count, synced, types = ?touched, "saved resources");
        if notify {
            for resource_type in &touched {
                self.publish(&doc, resource_type);
            }
        }
        Ok(())
    }

    /// Remove one resource. The document is persisted even when the entry
    /// was already absent.
    pub async fn delete(
        &self,
        resource_type: &str,
        resource_id: &ResourceId,
    ) -> Result<Option<Resource>, SyncError> {
        let mut doc = self.document.lock().await;
        let mut next = doc.clone();
        let removed = next.remove(resource_type, resource_id);
        self.persist(&next).await?;
        *doc = next;

        debug!(resource_type, %resource_id, found = removed.is_some(), "deleted resource");
        self.publish(&doc, resource_type);
        Ok(removed)
    }

    pub async fn get(&self, resource_type: &str, resource_id: &ResourceId) -> Option<Resource> {
        self.document
            .lock()
            .await
            .get(resource_type, resource_id)
            .cloned()
    }

    pub async fn all(&self, resource_type: &str) -> Vec<Resource> {
        self.document.lock().await.all(resource_type)
    }

    /// Publish the current data of every known type.
    pub async fn notify_all(&self) {
        let doc = self.document.lock().await;
        let mut types: BTreeSet<String> = doc.types().map(str::to_owned).collect();
        types.extend(self.registry.registered_types());
        for resource_type in &types {
            self.publish(&doc, resource_type);
        }
    }

    /// Register the listener for a type, replacing any previous one.
    pub fn set_listener(&self, resource_type: impl Into<String>, listener: ResourceListener) {
        self.registry.set_listener(resource_type, listener);
    }

    /// Subscribe to the snapshots published for a type.
    pub async fn subscribe(&self, resource_type: &str) -> ResourceStream {
        if self.registry.has_channel(resource_type) {
            return self.registry.subscribe(resource_type, Vec::new);
        }
        let current = self.all(resource_type).await;
        self.registry.subscribe(resource_type, move || current)
    }

    // ── Private helpers ──────────────────────────────────────────────

    async fn persist(&self, doc: &DataDocument) -> Result<(), SyncError> {
        let raw = serde_json::to_string(doc)?;
        if let Err(e) = self.storage.save(&self.key, raw).await {
            warn!(key = %self.key, error = %e, "resource document write failed");
            return Err(e.into());
        }
        Ok(())
    }

    fn publish(&self, doc: &DataDocument, resource_type: &str) {
        self.registry.publish(resource_type, doc.all(resource_type));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use chrono::{TimeZone, Utc};
    use serde_json::{Value, json};

    use super::*;
    use crate::storage::MemoryStorage;

    fn resource(id: &str, data: Value) -> Resource {
        Resource::new(
            "folder",
            id,
            data.as_object().cloned().unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    fn store() -> (Arc<MemoryStorage>, ResourceStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = ResourceStore::new("test", storage.clone());
        (storage, store)
    }

    #[tokio::test]
    async fn save_persists_and_reloads() {
        let (storage, store) = store();
        store
            .save(vec![resource("a", json!({ "name": "x" }))], false, true)
            .await
            .unwrap();

        let reopened = ResourceStore::new("test", storage.clone());
        assert_eq!(reopened.load().await.unwrap(), 1);
        let loaded = reopened.get("folder", &"a".into()).await.unwrap();
        assert_eq!(loaded.data["name"], json!("x"));
        assert!(storage.get("test-data").is_some());
    }

    #[tokio::test]
    async fn listeners_receive_full_type_set() {
        let (_, store) = store();
        let seen: Arc<StdMutex<Vec<usize>>> = Arc::default();
        let sink = Arc::clone(&seen);
        store.set_listener(
            "folder",
            Arc::new(move |resources: &[Resource]| sink.lock().unwrap().push(resources.len())),
        );

        store.save(vec![resource("a", json!({}))], false, true).await.unwrap();
        store.save(vec![resource("b", json!({}))], true, true).await.unwrap();
        store.save(vec![resource("c", json!({}))], true, false).await.unwrap();
        store.delete("folder", &"a".into()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 2]);
    }

    #[tokio::test]
    async fn rejected_write_rolls_back_and_chain_continues() {
        let (storage, store) = store();
        storage.set_reject_writes(true);

        let err = store.save(vec![resource("a", json!({}))], false, true).await;
        assert!(matches!(err, Err(SyncError::Storage(_))));
        assert!(store.get("folder", &"a".into()).await.is_none());

        storage.set_reject_writes(false);
        store.save(vec![resource("b", json!({}))], false, true).await.unwrap();
        assert_eq!(store.all("folder").await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_saves_apply_in_call_order() {
        let (_, store) = store();
        let store = Arc::new(store);

        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .save(vec![resource("a", json!({ "v": 1, "keep": true }))], false, true)
                    .await
            })
        };
        first.await.unwrap().unwrap();
        let second = store.save(vec![resource("a", json!({ "v": 2 }))], false, true);
        let third = store.save(vec![resource("a", json!({ "v": 3 }))], false, true);
        let (second, third) = tokio::join!(second, third);
        second.unwrap();
        third.unwrap();

        let stored = store.get("folder", &"a".into()).await.unwrap();
        assert_eq!(Value::Object(stored.data), json!({ "v": 3, "keep": true }));
    }

    #[tokio::test]
    async fn subscribe_sees_notified_changes_only() {
        let (_, store) = store();
        store.save(vec![resource("a", json!({}))], false, true).await.unwrap();

        let mut stream = store.subscribe("folder").await;
        assert_eq!(stream.current().len(), 1);

        store.save(vec![resource("b", json!({}))], true, false).await.unwrap();
        assert_eq!(stream.latest().len(), 1);

        store.notify_all().await;
        let snap = stream.changed().await.unwrap();
        assert_eq!(snap.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_document_is_reported() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("test-data", "{not json");
        let store = ResourceStore::new("test", storage);

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, SyncError::Storage(StorageError::Corrupt { .. })));
    }
}
