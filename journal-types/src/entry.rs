//! Journal entries and their at-rest representation.

use crate::error::{TypesError, TypesResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Local surrogate key, assigned by the database sequence.
pub type EntryId = i64;

/// Replication state of a single entry.
///
/// A missing status (`None` on [`JournalEntry`]) is treated like `Pending`:
/// rows written before sync existed have never been pushed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Conflict,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "conflict" => Ok(SyncStatus::Conflict),
            "error" => Ok(SyncStatus::Error),
            other => Err(TypesError::InvalidSyncStatus(other.to_string())),
        }
    }
}

/// Plaintext body of an entry, serialized as `{"content", "cleaned_content"}`.
///
/// Keys written by other clients (e.g. `tagged_sections`) are carried along
/// in `extra` so a rewrite never drops them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryBlob {
    pub content: String,
    pub cleaned_content: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EntryBlob {
    pub fn new(content: impl Into<String>, cleaned_content: Option<String>) -> Self {
        Self {
            content: content.into(),
            cleaned_content,
            extra: serde_json::Map::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// What is actually stored for an entry: exactly one of the two blob
/// columns, selected by the encryption flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryPayload {
    /// Serialized [`EntryBlob`] JSON (`raw_blob`).
    Plain(String),
    /// Serialized `{"cipher","iv"}` envelope (`encrypted_blob`).
    Encrypted(String),
}

impl EntryPayload {
    /// Rebuilds a payload from the three stored columns, rejecting rows that
    /// break the one-blob-per-flag invariant.
    pub fn from_columns(
        raw_blob: Option<String>,
        encrypted_blob: Option<String>,
        is_encrypted: bool,
    ) -> TypesResult<Self> {
        match (raw_blob, encrypted_blob, is_encrypted) {
            (Some(raw), None, false) => Ok(EntryPayload::Plain(raw)),
            (None, Some(enc), true) => Ok(EntryPayload::Encrypted(enc)),
            _ => Err(TypesError::BlobInvariant { is_encrypted }),
        }
    }

    pub fn plain(blob: &EntryBlob) -> serde_json::Result<Self> {
        Ok(EntryPayload::Plain(blob.to_json()?))
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, EntryPayload::Encrypted(_))
    }

    pub fn raw_blob(&self) -> Option<&str> {
        match self {
            EntryPayload::Plain(s) => Some(s),
            EntryPayload::Encrypted(_) => None,
        }
    }

    pub fn encrypted_blob(&self) -> Option<&str> {
        match self {
            EntryPayload::Encrypted(s) => Some(s),
            EntryPayload::Plain(_) => None,
        }
    }

    /// The stored string, whichever column it lives in.
    pub fn stored(&self) -> &str {
        match self {
            EntryPayload::Plain(s) | EntryPayload::Encrypted(s) => s,
        }
    }
}

/// A journal entry as persisted in the local store.
#[derive(Clone, Debug, PartialEq)]
pub struct JournalEntry {
    pub id: EntryId,
    pub user_id: Option<String>,
    pub remote_id: Option<String>,
    pub payload: EntryPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_status: Option<SyncStatus>,
    pub version: i64,
}

impl JournalEntry {
    pub fn is_encrypted(&self) -> bool {
        self.payload.is_encrypted()
    }

    pub fn raw_blob(&self) -> Option<&str> {
        self.payload.raw_blob()
    }

    pub fn encrypted_blob(&self) -> Option<&str> {
        self.payload.encrypted_blob()
    }

    /// Whether the push step should pick this entry up.
    pub fn needs_push(&self) -> bool {
        matches!(self.sync_status, None | Some(SyncStatus::Pending))
    }

    /// Local edits made after the last confirmed sync point.
    pub fn changed_since_sync(&self) -> bool {
        match self.synced_at {
            Some(synced_at) => self.updated_at > synced_at,
            None => true,
        }
    }
}

/// Input for inserting a locally authored entry.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEntry {
    pub user_id: Option<String>,
    pub payload: EntryPayload,
    pub created_at: DateTime<Utc>,
}

impl NewEntry {
    pub fn new(payload: EntryPayload) -> Self {
        Self {
            user_id: None,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn owned_by(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}
