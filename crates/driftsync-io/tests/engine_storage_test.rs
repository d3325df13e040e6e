#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;

use driftsync_core::{
    Command, CommandExecutor, CommandName, EngineConfig, ExecutorRegistry, FixedSyncDate,
    StorageBackend, StorageError, SyncEngine, SyncError, SyncHooks,
};
use driftsync_io::{EncryptedStorage, FileStorage};

// ── Helpers ─────────────────────────────────────────────────────────

/// Never dispatched in these tests; default methods report "unsupported".
struct Offline;

#[async_trait]
impl CommandExecutor for Offline {}

fn executor() -> Arc<dyn CommandExecutor> {
    Arc::new(Offline)
}

fn hooks(storage: Arc<dyn StorageBackend>) -> SyncHooks {
    SyncHooks {
        factory: Arc::new(ExecutorRegistry::new().register("note", executor())),
        cloud_clock: Arc::new(FixedSyncDate(chrono::DateTime::UNIX_EPOCH)),
        storage,
        bootstrap: Vec::new(),
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        probe_url: None,
        storage_prefix: "notes".into(),
        ..EngineConfig::default()
    }
}

fn encrypted(dir: &std::path::Path, passphrase: &str) -> Arc<dyn StorageBackend> {
    let files = Arc::new(FileStorage::new(dir));
    Arc::new(EncryptedStorage::new(files, &SecretString::from(passphrase.to_owned())).unwrap())
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn encrypted_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let first = SyncEngine::new(config());
    first.initialize(hooks(encrypted(dir.path(), "s3cret"))).await.unwrap();
    let payload = json!({ "title": "groceries" }).as_object().cloned().unwrap();
    first
        .add_command(Command::new("note", CommandName::Create, "n1", payload, executor()))
        .await
        .unwrap();

    let raw = std::fs::read_to_string(dir.path().join("notes-data.json")).unwrap();
    assert!(!raw.contains("groceries"));

    let second = SyncEngine::new(config());
    second.initialize(hooks(encrypted(dir.path(), "s3cret"))).await.unwrap();

    let pending = second.pending_commands().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].resource_id.as_str(), "n1");
    let note = second.get_resource("note", &"n1".into()).await.unwrap().unwrap();
    assert_eq!(note.data.get("title"), Some(&json!("groceries")));
}

#[tokio::test]
async fn wrong_passphrase_fails_initialization() {
    let dir = tempfile::tempdir().unwrap();
    let first = SyncEngine::new(config());
    first.initialize(hooks(encrypted(dir.path(), "right"))).await.unwrap();
    let payload = json!({ "title": "x" }).as_object().cloned().unwrap();
    first
        .add_command(Command::new("note", CommandName::Create, "n1", payload, executor()))
        .await
        .unwrap();

    let second = SyncEngine::new(config());
    let result = second.initialize(hooks(encrypted(dir.path(), "wrong"))).await;

    assert!(matches!(
        result,
        Err(SyncError::Storage(StorageError::Encryption { .. }))
    ));
}
