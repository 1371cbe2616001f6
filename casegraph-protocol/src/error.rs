//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding or encoding casegraph messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message does not match the reply schema: {reason}")]
    SchemaViolation { reason: String },

    #[error("unknown response format: {0}")]
    UnknownFormat(String),
}

impl ProtocolError {
    /// Returns a stable error code for logs and embedders.
    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::Json(_) => "BAD_JSON",
            ProtocolError::SchemaViolation { .. } => "SCHEMA_VIOLATION",
            ProtocolError::UnknownFormat(_) => "SCHEMA_VIOLATION",
        }
    }
}
