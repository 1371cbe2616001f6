//! Outbound transports.

use casegraph_core::{Headers, StoreError, Transport};
use parking_lot::Mutex;

/// A message handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub destination: String,
    pub payload: String,
    pub headers: Headers,
}

/// Keeps every published message in memory.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    published: Mutex<Vec<Published>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    /// Removes and returns everything published so far.
    pub fn drain(&self) -> Vec<Published> {
        std::mem::take(&mut *self.published.lock())
    }

    /// Makes subsequent publishes fail with `reason`, or succeed again with `None`.
    pub fn fail_with(&self, reason: Option<&str>) {
        *self.fail_with.lock() = reason.map(str::to_string);
    }
}

impl Transport for RecordingTransport {
    fn publish(&self, destination: &str, payload: &str, headers: &Headers) -> Result<(), StoreError> {
        if let Some(reason) = self.fail_with.lock().clone() {
            return Err(StoreError::Transport { reason });
        }

        self.published.lock().push(Published {
            destination: destination.to_string(),
            payload: payload.to_string(),
            headers: headers.clone(),
        });
        Ok(())
    }
}

/// Writes published messages to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

impl Transport for LogTransport {
    fn publish(&self, destination: &str, payload: &str, _headers: &Headers) -> Result<(), StoreError> {
        tracing::info!(destination, "Published {}", payload);
        Ok(())
    }
}
