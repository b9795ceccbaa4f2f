//! The remote store seam and an in-memory implementation.

use crate::error::{CloudError, CloudResult};
use crate::types::{RemoteJournal, RemoteJournalWrite, RemoteSettings};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Record-oriented access to the remote journal and settings tables.
///
/// Every call is scoped to a single user. Journal rows are keyed by a
/// server-assigned id; there is at most one settings row per user.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All journal rows owned by `user_id`, newest `updated_at` first.
    async fn list_journals(&self, user_id: &str) -> CloudResult<Vec<RemoteJournal>>;

    /// Creates a row and returns it with its assigned id.
    async fn create_journal(&self, write: &RemoteJournalWrite) -> CloudResult<RemoteJournal>;

    /// Overwrites the row `remote_id` owned by `write.user_id`.
    async fn update_journal(
        &self,
        remote_id: &str,
        write: &RemoteJournalWrite,
    ) -> CloudResult<RemoteJournal>;

    async fn get_settings(&self, user_id: &str) -> CloudResult<Option<RemoteSettings>>;

    async fn create_settings(&self, settings: &RemoteSettings) -> CloudResult<RemoteSettings>;

    async fn update_settings(&self, settings: &RemoteSettings) -> CloudResult<RemoteSettings>;
}

type WriteFilter = Box<dyn Fn(&RemoteJournalWrite) -> bool + Send + Sync>;

#[derive(Default)]
struct Tables {
    journals: HashMap<String, RemoteJournal>,
    settings: HashMap<String, RemoteSettings>,
}

/// A remote store held in process memory.
///
/// Useful for embedding without a server and for exercising the sync engine:
/// journal writes can be made to fail selectively, the whole store can be
/// taken offline and calls can be slowed down.
#[derive(Default)]
pub struct MemoryRemoteStore {
    tables: Mutex<Tables>,
    fail_writes: Mutex<Option<WriteFilter>>,
    offline: AtomicBool,
    latency: Mutex<Option<Duration>>,
    list_calls: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal creates and updates matching `filter` fail with
    /// [`CloudError::Remote`].
    pub fn fail_writes_when(
        &self,
        filter: impl Fn(&RemoteJournalWrite) -> bool + Send + Sync + 'static,
    ) {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(filter));
    }

    pub fn clear_failures(&self) {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// While offline every call fails.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay applied to every call before it is served.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Number of `list_journals` calls served so far. One per pull.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Inserts or replaces a row as if another device had written it.
    pub fn put_journal(&self, row: RemoteJournal) {
        self.tables().journals.insert(row.id.clone(), row);
    }

    pub fn journal(&self, remote_id: &str) -> Option<RemoteJournal> {
        self.tables().journals.get(remote_id).cloned()
    }

    pub fn journals(&self, user_id: &str) -> Vec<RemoteJournal> {
        let mut rows: Vec<RemoteJournal> = self
            .tables()
            .journals
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        rows
    }

    pub fn put_settings(&self, settings: RemoteSettings) {
        self.tables()
            .settings
            .insert(settings.user_id.clone(), settings);
    }

    pub fn settings(&self, user_id: &str) -> Option<RemoteSettings> {
        self.tables().settings.get(user_id).cloned()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn serve(&self) -> CloudResult<()> {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(CloudError::Remote("remote store is offline".into()));
        }
        Ok(())
    }

    fn check_write(&self, write: &RemoteJournalWrite) -> CloudResult<()> {
        let guard = self.fail_writes.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(filter) if filter(write) => {
                Err(CloudError::Remote("write rejected by remote".into()))
            }
            _ => Ok(()),
        }
    }
}

fn row_from_write(id: String, write: &RemoteJournalWrite) -> RemoteJournal {
    RemoteJournal {
        id,
        user_id: write.user_id.clone(),
        raw_blob: write.raw_blob.clone(),
        encrypted_blob: write.encrypted_blob.clone(),
        is_encrypted: write.is_encrypted,
        created_at: write.created_at,
        updated_at: write.updated_at,
        version: write.version,
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn list_journals(&self, user_id: &str) -> CloudResult<Vec<RemoteJournal>> {
        self.serve().await?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.journals(user_id))
    }

    async fn create_journal(&self, write: &RemoteJournalWrite) -> CloudResult<RemoteJournal> {
        self.serve().await?;
        self.check_write(write)?;
        let row = row_from_write(uuid::Uuid::new_v4().to_string(), write);
        self.put_journal(row.clone());
        Ok(row)
    }

    async fn update_journal(
        &self,
        remote_id: &str,
        write: &RemoteJournalWrite,
    ) -> CloudResult<RemoteJournal> {
        self.serve().await?;
        self.check_write(write)?;
        let mut tables = self.tables();
        match tables.journals.get_mut(remote_id) {
            Some(existing) if existing.user_id == write.user_id => {
                *existing = row_from_write(remote_id.to_string(), write);
                Ok(existing.clone())
            }
            _ => Err(CloudError::NotFound(format!("journal {remote_id}"))),
        }
    }

    async fn get_settings(&self, user_id: &str) -> CloudResult<Option<RemoteSettings>> {
        self.serve().await?;
        Ok(self.settings(user_id))
    }

    async fn create_settings(&self, settings: &RemoteSettings) -> CloudResult<RemoteSettings> {
        self.serve().await?;
        let mut tables = self.tables();
        if tables.settings.contains_key(&settings.user_id) {
            return Err(CloudError::Api(format!(
                "settings for {} already exist",
                settings.user_id
            )));
        }
        tables
            .settings
            .insert(settings.user_id.clone(), settings.clone());
        Ok(settings.clone())
    }

    async fn update_settings(&self, settings: &RemoteSettings) -> CloudResult<RemoteSettings> {
        self.serve().await?;
        let mut tables = self.tables();
        match tables.settings.get_mut(&settings.user_id) {
            Some(existing) => {
                *existing = settings.clone();
                Ok(settings.clone())
            }
            None => Err(CloudError::NotFound(format!(
                "settings for {}",
                settings.user_id
            ))),
        }
    }
}
