//! # casegraph-service
//!
//! Case service for casegraph.
//!
//! This crate provides:
//! - The transition tables of the fully automated case workflow
//! - Outbound request dispatch with correlation tokens
//! - Bounded retries of requests answered with an exception
//! - The periodic expiry sweep
//! - A cron and delay scheduler on tokio
//! - YAML configuration with environment overrides

pub mod config;
pub mod dispatch;
pub mod error;
pub mod expiry;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod workflow;

pub use config::{
    Config, ConfigError, DispatchConfig, ExpiryConfig, RetryConfig, StorageConfig, WorkflowConfig,
};
pub use dispatch::Dispatcher;
pub use error::{SchedulerError, ServiceError};
pub use expiry::{ExpirySweep, SweepReport};
pub use retry::RetryPolicy;
pub use scheduler::{JobId, Scheduler};
pub use service::{CaseService, Collaborators};
