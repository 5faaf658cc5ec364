//! Ready-Symbol Checkpoint Stores
//!
//! - [`FileThresholdStore`]: JSON file, replaced atomically via rename
//! - [`MemoryThresholdStore`]: process-local, used when persistence is off

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{ReadyCheckpoint, StoreError, ThresholdStore};

/// Checkpoint kept in a JSON file.
#[derive(Debug, Clone)]
pub struct FileThresholdStore {
    path: PathBuf,
}

impl FileThresholdStore {
    /// Create a store at `path`. Parent directories are created on save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ThresholdStore for FileThresholdStore {
    async fn load(&self) -> Result<Option<ReadyCheckpoint>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn save(&self, checkpoint: &ReadyCheckpoint) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let body =
            serde_json::to_vec_pretty(checkpoint).map_err(|e| StoreError::Io(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        tracing::debug!(
            path = %self.path.display(),
            symbols = checkpoint.ready_symbols.len(),
            "Saved ready symbols"
        );
        Ok(())
    }
}

/// Checkpoint kept in memory.
#[derive(Debug, Default)]
pub struct MemoryThresholdStore {
    checkpoint: Mutex<Option<ReadyCheckpoint>>,
}

impl MemoryThresholdStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThresholdStore for MemoryThresholdStore {
    async fn load(&self) -> Result<Option<ReadyCheckpoint>, StoreError> {
        Ok(self.checkpoint.lock().clone())
    }

    async fn save(&self, checkpoint: &ReadyCheckpoint) -> Result<(), StoreError> {
        *self.checkpoint.lock() = Some(checkpoint.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trips_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThresholdStore::new(dir.path().join("state").join("ready.json"));
        assert_eq!(store.load().await.unwrap(), None);

        store
            .save(&ReadyCheckpoint::now(vec!["AAPL".into()]))
            .await
            .unwrap();
        let second = ReadyCheckpoint::now(vec!["AAPL".into(), "MSFT".into()]);
        store.save(&second).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(second));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ready.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = FileThresholdStore::new(path);
        assert!(matches!(store.load().await, Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn memory_store_keeps_last_checkpoint() {
        let store = MemoryThresholdStore::new();
        let checkpoint = ReadyCheckpoint::now(vec!["NVDA".into()]);
        store.save(&checkpoint).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(checkpoint));
    }
}
