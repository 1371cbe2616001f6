//! JSON snapshots of a [`MemoryStore`].

use crate::error::StorageError;
use crate::memory::{MemoryStore, StoredCase};
use casegraph_core::{NewDocument, Request};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized store contents. File bodies are not included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub cases: BTreeMap<String, StoredCase>,
    #[serde(default)]
    pub requests: Vec<Request>,
    #[serde(default)]
    pub documents: BTreeMap<String, NewDocument>,
}

impl MemoryStore {
    /// Captures the current contents.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            cases: self.cases.read().clone(),
            requests: self.requests.read().clone(),
            documents: self.documents.read().clone(),
        }
    }

    /// Replaces the current contents with a snapshot.
    pub fn restore(&self, snapshot: StoreSnapshot) -> Result<(), StorageError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StorageError::SnapshotVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }

        *self.cases.write() = snapshot.cases;
        *self.requests.write() = snapshot.requests;
        *self.documents.write() = snapshot.documents;
        Ok(())
    }

    /// Loads a snapshot file if it exists. Returns whether anything was loaded.
    pub fn load_from(&self, path: impl AsRef<Path>) -> Result<bool, StorageError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(false);
        }

        let file = File::open(path)?;
        let snapshot: StoreSnapshot = serde_json::from_reader(BufReader::new(file))?;
        let cases = snapshot.cases.len();
        let requests = snapshot.requests.len();
        self.restore(snapshot)?;

        tracing::info!(
            "Loaded {} cases and {} requests from {}",
            cases,
            requests,
            path.display()
        );
        Ok(true)
    }

    /// Writes a snapshot file, replacing any previous one.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &self.snapshot())?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)?;

        tracing::info!("Saved {} cases to {}", self.case_count(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::attributes;
    use casegraph_core::RequestStore;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        let store = MemoryStore::new();
        let case = store.create_case("sd", attributes([("state", Some("pending"))]));
        store.create(&case.id, "token-1", None).unwrap();
        store.save_to(&path).unwrap();

        let restored = MemoryStore::new();
        assert!(restored.load_from(&path).unwrap());
        assert_eq!(restored.attribute(&case.id, "state").as_deref(), Some("pending"));
        assert!(restored.find_by_message_id("token-1").unwrap().is_some());
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        assert!(!store.load_from(dir.path().join("absent.json")).unwrap());
        assert_eq!(store.case_count(), 0);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let store = MemoryStore::new();
        let mut snapshot = store.snapshot();
        snapshot.version = 99;

        let err = store.restore(snapshot).unwrap_err();
        assert!(matches!(err, StorageError::SnapshotVersion { found: 99, .. }));
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");

        MemoryStore::new().save_to(&path).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}
