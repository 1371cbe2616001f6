//! # casegraph-storage
//!
//! In-memory storage for casegraph.
//!
//! This crate provides:
//! - A store implementing the case, request, document and file ports
//! - JSON snapshots of that store
//! - Recording and logging transports

pub mod error;
pub mod memory;
pub mod snapshot;
pub mod transport;

pub use error::StorageError;
pub use memory::{attributes, MemoryStore, StoredCase};
pub use snapshot::{StoreSnapshot, SNAPSHOT_VERSION};
pub use transport::{LogTransport, Published, RecordingTransport};
