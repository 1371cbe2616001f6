//! Per-case serialization.
//!
//! Both engines and the expiry sweep hold a case's mutex from attribute fetch
//! through commit, so two invocations for one case never interleave their
//! read and write.

use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::sync::Arc;

/// Table of per-case mutexes, created on demand and dropped when unused.
#[derive(Debug, Default)]
pub struct CaseLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the case's mutex is held.
    pub fn lock(&self, case_id: &str) -> CaseGuard<'_> {
        let mutex = self
            .locks
            .entry(case_id.to_string())
            .or_default()
            .value()
            .clone();
        let guard = mutex.lock_arc();
        CaseGuard {
            locks: self,
            case_id: case_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Locks several cases in sorted order, skipping duplicates.
    pub fn lock_many<'a, I>(&'a self, case_ids: I) -> Vec<CaseGuard<'a>>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut ids: Vec<String> = case_ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .collect();
        ids.sort();
        ids.dedup();
        ids.iter().map(|id| self.lock(id)).collect()
    }

    /// Number of cases with a live mutex.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn release(&self, case_id: &str) {
        // the table itself holds one reference
        self.locks
            .remove_if(case_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Holds one case's mutex. Dropping it unlocks the case.
pub struct CaseGuard<'a> {
    locks: &'a CaseLocks,
    case_id: String,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl CaseGuard<'_> {
    pub fn case_id(&self) -> &str {
        &self.case_id
    }
}

impl Drop for CaseGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.case_id);
    }
}
