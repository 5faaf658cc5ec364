//! Threshold Store Port (Driven Port)
//!
//! Persists the ready-symbol set so a restarted controller resumes
//! accumulation instead of starting from zero.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted ready-symbol set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyCheckpoint {
    /// Ready symbols, sorted.
    pub ready_symbols: Vec<String>,
    /// When the checkpoint was written.
    pub saved_at: DateTime<Utc>,
}

impl ReadyCheckpoint {
    /// Checkpoint the given symbols now.
    #[must_use]
    pub fn now(ready_symbols: Vec<String>) -> Self {
        Self {
            ready_symbols,
            saved_at: Utc::now(),
        }
    }
}

/// Checkpoint persistence error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Read or write failed.
    #[error("checkpoint I/O failed: {0}")]
    Io(String),

    /// Stored checkpoint could not be parsed.
    #[error("checkpoint is corrupt: {0}")]
    Corrupt(String),
}

/// Port for ready-symbol checkpoint persistence.
#[async_trait]
pub trait ThresholdStore: Send + Sync {
    /// Load the last checkpoint, if any.
    async fn load(&self) -> Result<Option<ReadyCheckpoint>, StoreError>;

    /// Replace the checkpoint.
    async fn save(&self, checkpoint: &ReadyCheckpoint) -> Result<(), StoreError>;
}
