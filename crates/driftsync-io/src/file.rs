// ── Directory-backed storage ──
//
// Each key maps to `<dir>/<key>.json`. Saves go through a sibling temp
// file and a rename, so a crash mid-write leaves the previous document.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use driftsync_core::{StorageBackend, StorageError};

const EXTENSION: &str = "json";

/// Persists documents as files in one directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File backing `key`. Keys are restricted to a portable file-name
    /// alphabet so they can never escape the directory.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StorageError::Backend {
                key: key.to_owned(),
                reason: "key is not a valid file name".into(),
            });
        }
        Ok(self.dir.join(format!("{key}.{EXTENSION}")))
    }
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn save(&self, key: &str, document: String) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        tokio::fs::write(&tmp, document.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key, path = %path.display(), bytes = document.len(), "document written");
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(document) => Ok(Some(document)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_document_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        assert_eq!(storage.load("app-state").await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_load_returns_latest_document() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested"));

        storage.save("app-data", "{\"v\":1}".into()).await.unwrap();
        storage.save("app-data", "{\"v\":2}".into()).await.unwrap();

        assert_eq!(
            storage.load("app-data").await.unwrap().as_deref(),
            Some("{\"v\":2}")
        );
        assert!(dir.path().join("nested/app-data.json").exists());
        assert!(!dir.path().join("nested/app-data.json.tmp").exists());
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        for key in ["../outside", "a/b", "", ".hidden"] {
            let err = storage.save(key, "x".into()).await.unwrap_err();
            assert!(matches!(err, StorageError::Backend { .. }), "{key}");
        }
    }
}
