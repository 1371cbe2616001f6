//! Service configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via CASEGRAPH_CONFIG)
//! 3. Environment variables

use crate::workflow::CASE_TYPE;
use casegraph_protocol::{DEFAULT_REQUEST_QUEUE, DEFAULT_RESPONSE_QUEUE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Case type handled by the workflow.
    pub workflow: WorkflowConfig,
    /// Outbound request dispatch.
    pub dispatch: DispatchConfig,
    /// Bounded retry of failed requests.
    pub retry: RetryConfig,
    /// Periodic sweep of expired cases.
    pub expiry: ExpiryConfig,
    /// Snapshot persistence of the in-memory stores.
    pub storage: StorageConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("CASEGRAPH_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.workflow.apply_env_overrides();
        self.dispatch.apply_env_overrides();
        self.retry.apply_env_overrides();
        self.expiry.apply_env_overrides();
        self.storage.apply_env_overrides();
    }

    /// Checks values the workflow cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workflow.case_type.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "workflow.case_type must not be empty".to_string(),
            ));
        }
        if self.dispatch.request_queue.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "dispatch.request_queue must not be empty".to_string(),
            ));
        }
        if self.expiry.enabled && self.expiry.cron.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "expiry enabled but expiry.cron not set".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Type tag of the cases this service drives.
    pub case_type: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            case_type: CASE_TYPE.to_string(),
        }
    }
}

impl WorkflowConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(case_type) = std::env::var("CASEGRAPH_CASE_TYPE") {
            self.case_type = case_type;
        }
    }
}

/// Outbound request dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Destination of outbound requests.
    pub request_queue: String,
    /// Queue the remote side replies to.
    pub response_queue: String,
    /// Case attributes copied into the request content.
    pub payload_fields: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_queue: DEFAULT_REQUEST_QUEUE.to_string(),
            response_queue: DEFAULT_RESPONSE_QUEUE.to_string(),
            payload_fields: vec!["special_data".to_string(), "service_id".to_string()],
        }
    }
}

impl DispatchConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(queue) = std::env::var("CASEGRAPH_REQUEST_QUEUE") {
            self.request_queue = queue;
        }
        if let Ok(queue) = std::env::var("CASEGRAPH_RESPONSE_QUEUE") {
            self.response_queue = queue;
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Highest number of EXCEPTION replies after which a request is still
    /// re-issued.
    pub max_exceptions: usize,
    /// Delay before a request is re-issued, in seconds.
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_exceptions: 10,
            delay_secs: 900,
        }
    }
}

impl RetryConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("CASEGRAPH_RETRY_MAX_EXCEPTIONS") {
            if let Ok(n) = max.parse() {
                self.max_exceptions = n;
            }
        }

        if let Ok(delay) = std::env::var("CASEGRAPH_RETRY_DELAY") {
            if let Ok(secs) = delay.parse() {
                self.delay_secs = secs;
            }
        }
    }

    /// Returns the retry delay as Duration.
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

/// Expiry sweep configuration. The swept state and the attributes it
/// writes are those of the workflow tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    /// Run the sweep on schedule.
    pub enabled: bool,
    /// Cron expression, five or six fields.
    pub cron: String,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 0 * * *".to_string(),
        }
    }
}

impl ExpiryConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("CASEGRAPH_EXPIRY_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(cron) = std::env::var("CASEGRAPH_EXPIRY_CRON") {
            self.cron = cron;
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot loaded at startup and written at shutdown.
    pub snapshot_path: Option<PathBuf>,
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CASEGRAPH_SNAPSHOT") {
            self.snapshot_path = Some(PathBuf::from(path));
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
