//! Encrypt-on-write, decrypt-on-read access to journal entries.

use crate::custodian::KeyCustodian;
use crate::enrichment::Enricher;
use crate::error::{VaultError, VaultResult};
use chrono::{DateTime, NaiveDate, Utc};
use journal_crypto::EncryptedData;
use journal_storage::JournalStore;
use journal_types::{
    AuthSession, EntryBlob, EntryId, EntryPayload, JournalEntry, NewEntry, SyncStatus,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Placeholder content for an entry that could not be decrypted.
pub const DECRYPTION_FAILED: &str = "[Decryption failed]";

/// The readable content of an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntryContent {
    Decrypted(EntryBlob),
    /// Serializes as `{"error": "[Decryption failed]"}`.
    Failed { error: String },
}

impl EntryContent {
    fn failed() -> Self {
        EntryContent::Failed {
            error: DECRYPTION_FAILED.to_string(),
        }
    }

    pub fn blob(&self) -> Option<&EntryBlob> {
        match self {
            EntryContent::Decrypted(blob) => Some(blob),
            EntryContent::Failed { .. } => None,
        }
    }
}

/// An entry's metadata together with its readable content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecryptedEntry {
    pub id: EntryId,
    pub user_id: Option<String>,
    pub remote_id: Option<String>,
    pub is_encrypted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sync_status: Option<SyncStatus>,
    pub content: EntryContent,
}

/// Body key holding the tagging result, a JSON string of
/// `[{"section": ..., "tags": [...]}]`.
pub const TAGGED_SECTIONS: &str = "tagged_sections";

#[derive(Serialize)]
struct TaggedSection<'a> {
    section: &'a str,
    tags: &'a [String],
}

struct CachedBlob {
    /// The exact stored envelope the blob was decrypted from.
    stored: String,
    blob: EntryBlob,
}

/// Front door for reading and writing entries.
///
/// Writes are encrypted with the session key whenever locking is enabled in
/// settings; without a session key they fail rather than fall back to
/// plaintext. Decrypted content is cached per entry until the stored blob
/// changes or the pipeline is locked.
pub struct EntryPipeline {
    store: JournalStore,
    custodian: Arc<KeyCustodian>,
    auth: AuthSession,
    cache: Mutex<HashMap<EntryId, CachedBlob>>,
}

impl EntryPipeline {
    pub fn new(store: JournalStore, custodian: Arc<KeyCustodian>, auth: AuthSession) -> Self {
        Self {
            store,
            custodian,
            auth,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn custodian(&self) -> &Arc<KeyCustodian> {
        &self.custodian
    }

    // ── Writes ───────────────────────────────────────────────────

    pub fn create_entry(
        &self,
        content: &str,
        cleaned_content: Option<&str>,
    ) -> VaultResult<JournalEntry> {
        let blob = EntryBlob::new(content, cleaned_content.map(str::to_string));
        let payload = self.seal(&blob)?;
        let entry = self
            .store
            .insert_entry(NewEntry::new(payload).owned_by(self.auth.user_id()))?;
        debug!("created entry {} (encrypted: {})", entry.id, entry.is_encrypted());
        Ok(entry)
    }

    /// Replaces an entry's content. Keys other clients added to the body
    /// are kept when the current body can be read.
    pub fn update_entry(
        &self,
        id: EntryId,
        content: &str,
        cleaned_content: Option<&str>,
    ) -> VaultResult<JournalEntry> {
        let existing = self
            .store
            .get_entry(id)?
            .ok_or(VaultError::EntryNotFound(id))?;

        let mut blob = EntryBlob::new(content, cleaned_content.map(str::to_string));
        if let Ok(previous) = self.open_payload(&existing.payload) {
            blob.extra = previous.extra;
        }
        self.write_blob(id, &blob)
    }

    pub fn delete_entry(&self, id: EntryId) -> VaultResult<bool> {
        self.evict(id);
        Ok(self.store.delete_entry(id)?)
    }

    /// Creates an entry, first asking `enricher` for a cleaned-up version
    /// when cleanup is enabled. Enrichment failures only cost the cleaned
    /// text.
    pub async fn create_entry_enriched(
        &self,
        content: &str,
        enricher: &dyn Enricher,
    ) -> VaultResult<JournalEntry> {
        let settings = self.store.load_settings()?;
        let cleaned = if settings.cleanup_enabled {
            match enricher.clean_up(content, &settings.cleanup_prompt).await {
                Ok(cleaned) => Some(cleaned.body),
                Err(e) => {
                    warn!("cleanup skipped: {e}");
                    None
                }
            }
        } else {
            None
        };
        self.create_entry(content, cleaned.as_deref())
    }

    /// Asks `enricher` to tag an entry and stores the result in the entry
    /// body as `tagged_sections`, sealed like the rest of the body.
    ///
    /// Returns the tags found. Empty, with nothing written, when the entry
    /// cannot be read or the enricher fails.
    pub async fn tag_entry(&self, id: EntryId, enricher: &dyn Enricher) -> VaultResult<Vec<String>> {
        let entry = self.entry(id)?.ok_or(VaultError::EntryNotFound(id))?;
        let Some(blob) = entry.content.blob() else {
            return Ok(Vec::new());
        };
        let text = blob.cleaned_content.as_deref().unwrap_or(&blob.content);
        let tags = match enricher.tag(text).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!("tagging entry {id} failed: {e}");
                return Ok(Vec::new());
            }
        };

        let sections = serde_json::to_string(&[TaggedSection {
            section: text,
            tags: &tags,
        }])?;
        let mut blob = blob.clone();
        blob.extra
            .insert(TAGGED_SECTIONS.to_string(), serde_json::Value::String(sections));
        self.write_blob(id, &blob)?;
        debug!("tagged entry {id} with {} tags", tags.len());
        Ok(tags)
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn entry(&self, id: EntryId) -> VaultResult<Option<DecryptedEntry>> {
        match self.store.get_entry(id)? {
            Some(entry) => Ok(self.open_batch(vec![entry])?.pop()),
            None => Ok(None),
        }
    }

    /// Entries created on `date` (local calendar), decrypted.
    pub fn entries_on(&self, date: NaiveDate) -> VaultResult<Vec<DecryptedEntry>> {
        let rows = self.store.entries_on(date)?;
        self.open_batch(rows)
    }

    pub fn entries(&self) -> VaultResult<Vec<DecryptedEntry>> {
        let rows = self.store.list_entries()?;
        self.open_batch(rows)
    }

    pub fn journal_dates(&self) -> VaultResult<Vec<NaiveDate>> {
        Ok(self.store.journal_dates()?)
    }

    // ── Cache ────────────────────────────────────────────────────

    /// Drops all cached plaintext.
    pub fn clear_cache(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Locks the journal and forgets everything decrypted so far.
    pub fn lock(&self) {
        self.custodian.lock();
        self.clear_cache();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn evict(&self, id: EntryId) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    // ── Internals ────────────────────────────────────────────────

    fn write_blob(&self, id: EntryId, blob: &EntryBlob) -> VaultResult<JournalEntry> {
        let payload = self.seal(blob)?;
        self.evict(id);
        Ok(self.store.update_entry_blob(id, &payload)?)
    }

    fn seal(&self, blob: &EntryBlob) -> VaultResult<EntryPayload> {
        let settings = self.store.load_settings()?;
        let raw = blob.to_json()?;
        if !settings.lock_enabled {
            return Ok(EntryPayload::Plain(raw));
        }
        let data = self.custodian.encrypt_text(&raw, None)?;
        Ok(EntryPayload::Encrypted(data.to_json()?))
    }

    fn open_batch(&self, rows: Vec<JournalEntry>) -> VaultResult<Vec<DecryptedEntry>> {
        if rows.iter().any(JournalEntry::is_encrypted) && !self.custodian.is_unlocked() {
            return Err(VaultError::RequiresUnlock);
        }
        Ok(rows.into_iter().map(|entry| self.open_entry(entry)).collect())
    }

    fn open_entry(&self, entry: JournalEntry) -> DecryptedEntry {
        let content = match self.open_cached(&entry) {
            Ok(blob) => EntryContent::Decrypted(blob),
            Err(e) => {
                warn!("entry {} could not be read: {e}", entry.id);
                EntryContent::failed()
            }
        };
        DecryptedEntry {
            id: entry.id,
            is_encrypted: entry.is_encrypted(),
            user_id: entry.user_id,
            remote_id: entry.remote_id,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            sync_status: entry.sync_status,
            content,
        }
    }

    fn open_cached(&self, entry: &JournalEntry) -> VaultResult<EntryBlob> {
        let EntryPayload::Encrypted(stored) = &entry.payload else {
            return self.open_payload(&entry.payload);
        };

        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(&entry.id).filter(|hit| &hit.stored == stored) {
                return Ok(hit.blob.clone());
            }
        }

        let blob = self.open_payload(&entry.payload)?;
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).insert(
            entry.id,
            CachedBlob {
                stored: stored.clone(),
                blob: blob.clone(),
            },
        );
        Ok(blob)
    }

    fn open_payload(&self, payload: &EntryPayload) -> VaultResult<EntryBlob> {
        match payload {
            EntryPayload::Plain(raw) => Ok(EntryBlob::from_json(raw)?),
            EntryPayload::Encrypted(envelope) => {
                let data = EncryptedData::from_json(envelope)?;
                let raw = self.custodian.decrypt_text(&data, None)?;
                Ok(EntryBlob::from_json(&raw)?)
            }
        }
    }
}
