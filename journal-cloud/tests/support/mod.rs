//! Shared fixtures for sync tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use journal_cloud::{MemoryRemoteStore, RemoteJournal, SyncConfig, SyncEngine};
use journal_storage::JournalStore;
use journal_types::{AuthSession, AuthUser, EntryBlob, EntryPayload, JournalEntry, NewEntry};
use std::sync::Arc;

pub const USER: &str = "user-1";

/// Opt-in log output: `RUST_LOG=journal_cloud=debug cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub store: JournalStore,
    pub remote: Arc<MemoryRemoteStore>,
    pub auth: AuthSession,
    pub engine: Arc<SyncEngine>,
}

/// In-memory store and remote, signed in as [`USER`].
pub fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

pub fn harness_with(config: SyncConfig) -> Harness {
    init_tracing();
    let store = JournalStore::open_in_memory().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let auth = AuthSession::new();
    auth.sign_in(AuthUser::new(USER));
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        remote.clone(),
        auth.clone(),
        config,
    ));
    Harness {
        store,
        remote,
        auth,
        engine,
    }
}

pub fn blob(content: &str) -> String {
    EntryBlob::new(content, None).to_json().unwrap()
}

pub fn content_of(entry: &JournalEntry) -> String {
    EntryBlob::from_json(entry.raw_blob().unwrap()).unwrap().content
}

/// Inserts a plaintext entry owned by [`USER`].
pub fn local_entry(store: &JournalStore, content: &str) -> JournalEntry {
    store
        .insert_entry(
            NewEntry::new(EntryPayload::Plain(blob(content))).owned_by(Some(USER.to_string())),
        )
        .unwrap()
}

/// A plaintext remote row owned by [`USER`].
pub fn remote_row(id: &str, content: &str, updated_at: DateTime<Utc>) -> RemoteJournal {
    RemoteJournal {
        id: id.to_string(),
        user_id: USER.to_string(),
        raw_blob: Some(blob(content)),
        encrypted_blob: None,
        is_encrypted: false,
        created_at: updated_at,
        updated_at,
        version: 1,
    }
}
