//! Error types for state persistence and locking.

use std::path::PathBuf;

use tidemark_types::SyncError;

/// Result alias for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// Failure from the state store or sync lock.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record exists but cannot be decoded. Fatal: the
    /// operator must inspect the file before any run proceeds.
    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode state record: {0}")]
    Encode(#[source] serde_json::Error),

    /// The lock is held by a live (or not-yet-stale) holder.
    #[error("sync lock held by '{holder_id}' (pid {pid}, age {age_seconds}s)")]
    LockBusy {
        holder_id: String,
        pid: u32,
        age_seconds: i64,
    },
}

impl From<StateError> for SyncError {
    fn from(err: StateError) -> Self {
        match &err {
            StateError::Corrupt { .. } => SyncError::state_corrupt(err.to_string()),
            StateError::LockBusy { .. } => SyncError::busy(err.to_string()),
            StateError::Io(_) | StateError::Encode(_) => SyncError::internal(err.to_string()),
        }
    }
}
