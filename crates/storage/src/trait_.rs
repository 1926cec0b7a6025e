//! Stage store trait abstraction.

use async_trait::async_trait;
use datastory_core::SessionKey;

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend temporarily unreachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Remote key/value store holding one JSON document per stage and student.
///
/// Documents are opaque to the store. Calls may fail at any time; callers
/// treat failures as best-effort and keep working locally.
#[async_trait]
pub trait StageStore: Send + Sync {
    /// Load the stored state, if any.
    async fn get_stage_state(&self, key: &SessionKey) -> Result<Option<serde_json::Value>>;

    /// Store a state, replacing any earlier one.
    ///
    /// Returns `false` when the store declined the write without failing.
    async fn put_stage_state(&self, key: &SessionKey, state: &serde_json::Value) -> Result<bool>;

    /// Remove a stored state. Removing a missing state is not an error.
    async fn delete_stage_state(&self, key: &SessionKey) -> Result<()>;

    /// Keys of every stored stage state of a student.
    async fn list_stage_keys(&self, student_id: u64) -> Result<Vec<SessionKey>>;
}
