//! Service error types.

use crate::config::ConfigError;
use casegraph_core::{CoreError, StoreError};
use thiserror::Error;

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("cron expression '{0}' has no upcoming run")]
    NoUpcomingRun(String),

    #[error("scheduler is stopped")]
    Stopped,

    #[error("no async runtime available: {0}")]
    NoRuntime(String),
}

/// Service errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] casegraph_protocol::ProtocolError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ServiceError {
    /// Stable code for logs and embedders.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Core(e) => e.error_code(),
            ServiceError::Store(_) => "STORE_ERROR",
            ServiceError::Protocol(e) => e.error_code(),
            ServiceError::Scheduler(_) => "SCHEDULER_ERROR",
            ServiceError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Core(e) => e.is_retryable(),
            ServiceError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Converts to the error an after-commit hook reports to its engine.
    pub fn into_core(self) -> CoreError {
        match self {
            ServiceError::Core(e) => e,
            ServiceError::Store(e) => CoreError::Store(e),
            other => CoreError::Callback {
                reason: other.to_string(),
            },
        }
    }
}
