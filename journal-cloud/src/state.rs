//! Observable sync status shared with the host.

use crate::types::ConflictRecord;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};

/// Point-in-time copy of [`SyncState`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub is_syncing: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_error: Option<String>,
    /// Entries still waiting to be pushed after the last cycle.
    pub pending_count: usize,
    pub conflicts: Vec<ConflictRecord>,
}

/// Cloneable handle to the engine's status.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    inner: Arc<RwLock<SyncSnapshot>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_syncing(&self) -> bool {
        self.snapshot().is_syncing
    }

    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.snapshot().conflicts
    }

    pub fn clear_conflicts(&self) {
        self.update(|s| s.conflicts.clear());
    }

    pub(crate) fn begin(&self) {
        self.update(|s| {
            s.is_syncing = true;
            s.sync_error = None;
        });
    }

    pub(crate) fn finish(&self, result: Result<DateTime<Utc>, String>) {
        self.update(|s| {
            s.is_syncing = false;
            match result {
                Ok(at) => s.last_sync_at = Some(at),
                Err(e) => s.sync_error = Some(e),
            }
        });
    }

    pub(crate) fn set_pending_count(&self, count: usize) {
        self.update(|s| s.pending_count = count);
    }

    pub(crate) fn record_conflict(&self, record: ConflictRecord) {
        self.update(|s| s.conflicts.push(record));
    }

    fn update(&self, f: impl FnOnce(&mut SyncSnapshot)) {
        f(&mut self.inner.write().unwrap_or_else(|e| e.into_inner()));
    }
}
