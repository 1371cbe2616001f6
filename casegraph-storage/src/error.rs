//! Storage error types.

use thiserror::Error;

/// Errors from snapshot persistence.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported snapshot version {found}, expected {expected}")]
    SnapshotVersion { found: u32, expected: u32 },
}
