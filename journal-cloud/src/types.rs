//! Wire rows, triggers and cycle reports.

use chrono::{DateTime, Utc};
use journal_storage::RemoteEntryWrite;
use journal_types::{EntryId, EntryPayload, JournalEntry, Settings, TypesError};
use serde::{Deserialize, Serialize};

/// A journal row as the remote store returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJournal {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub raw_blob: Option<String>,
    #[serde(default)]
    pub encrypted_blob: Option<String>,
    #[serde(default)]
    pub is_encrypted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "first_version")]
    pub version: i64,
}

fn first_version() -> i64 {
    1
}

impl RemoteJournal {
    /// Validates the blob columns and converts the row into a local write.
    pub fn to_local(&self) -> Result<RemoteEntryWrite, TypesError> {
        let payload = EntryPayload::from_columns(
            self.raw_blob.clone(),
            self.encrypted_blob.clone(),
            self.is_encrypted,
        )?;
        Ok(RemoteEntryWrite {
            remote_id: self.id.clone(),
            user_id: self.user_id.clone(),
            payload,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

/// Body sent when creating or updating a remote journal row.
///
/// Local-only columns (`id`, `sync_status`, `synced_at`) never leave the
/// device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJournalWrite {
    pub user_id: String,
    pub raw_blob: Option<String>,
    pub encrypted_blob: Option<String>,
    pub is_encrypted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl RemoteJournalWrite {
    pub fn from_entry(entry: &JournalEntry, user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            raw_blob: entry.raw_blob().map(str::to_string),
            encrypted_blob: entry.encrypted_blob().map(str::to_string),
            is_encrypted: entry.is_encrypted(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            version: entry.version,
        }
    }
}

/// The per-user settings row on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub user_id: String,
    pub lock_enabled: bool,
    pub cursor_color: String,
    pub text_color: String,
    pub cleanup_enabled: bool,
    pub cleanup_prompt: String,
    #[serde(default)]
    pub selected_model: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RemoteSettings {
    pub fn from_settings(settings: &Settings, user_id: &str, updated_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            lock_enabled: settings.lock_enabled,
            cursor_color: settings.cursor_color.clone(),
            text_color: settings.text_color.clone(),
            cleanup_enabled: settings.cleanup_enabled,
            cleanup_prompt: settings.cleanup_prompt.clone(),
            selected_model: settings.selected_model.clone(),
            updated_at,
        }
    }

    pub fn to_settings(&self) -> Settings {
        Settings {
            lock_enabled: self.lock_enabled,
            cursor_color: self.cursor_color.clone(),
            text_color: self.text_color.clone(),
            cleanup_enabled: self.cleanup_enabled,
            cleanup_prompt: self.cleanup_prompt.clone(),
            selected_model: self.selected_model.clone(),
            updated_at: Some(self.updated_at),
        }
    }
}

/// What started a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTrigger {
    Periodic,
    /// The host became visible again after being hidden.
    VisibilityRegained,
    /// Connectivity went from offline to online.
    NetworkOnline,
    /// A user just signed in.
    Authenticated,
    Manual,
}

/// Commands accepted by the scheduler loop.
#[derive(Debug)]
pub enum SyncCommand {
    Trigger(SyncTrigger),
    Stop,
}

/// Which side survived a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictWinner {
    Local,
    Remote,
}

/// A conflict resolved by last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub local_id: EntryId,
    pub remote_id: String,
    pub winner: ConflictWinner,
    pub resolved_at: DateTime<Utc>,
}

/// Counters for one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pulled_inserted: usize,
    pub pulled_updated: usize,
    pub conflicts: usize,
    /// Remote rows rejected because their blob columns were inconsistent.
    pub skipped_invalid: usize,
    pub pushed_created: usize,
    pub pushed_updated: usize,
    pub push_failures: Vec<EntryId>,
    pub settings_pulled: bool,
    pub settings_pushed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another cycle held the guard; this one was dropped.
    AlreadyRunning,
    NotAuthenticated,
}
