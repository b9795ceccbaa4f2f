//! Pull-then-push reconciliation between the local store and the remote.
//!
//! One cycle runs at a time. Within a cycle:
//! - journals are pulled, conflicts resolved by last-write-wins
//! - the settings row is pulled
//! - pending journals are pushed in concurrent batches
//! - local settings are pushed if they changed since the last sync

use crate::config::SyncConfig;
use crate::error::{CloudError, CloudResult};
use crate::remote::RemoteStore;
use crate::state::SyncState;
use crate::types::*;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use journal_storage::{JournalStore, RemoteEntryWrite, StorageError};
use journal_types::{AuthSession, JournalEntry, SyncStatus};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

enum Pushed {
    Created,
    Updated,
}

/// Reconciles the local journal with a [`RemoteStore`] for the signed-in
/// user.
pub struct SyncEngine {
    store: JournalStore,
    remote: Arc<dyn RemoteStore>,
    auth: AuthSession,
    config: SyncConfig,
    state: SyncState,
    /// Held for the duration of a cycle.
    guard: tokio::sync::Mutex<()>,
    /// Local settings timestamp last confirmed with the remote, per user.
    settings_synced: Mutex<Option<(String, DateTime<Utc>)>>,
    consecutive_failures: AtomicU32,
}

impl SyncEngine {
    pub fn new(
        store: JournalStore,
        remote: Arc<dyn RemoteStore>,
        auth: AuthSession,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            remote,
            auth,
            config,
            state: SyncState::new(),
            guard: tokio::sync::Mutex::new(()),
            settings_synced: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Delay before the next periodic cycle, backing off after failures.
    pub fn periodic_delay(&self) -> Duration {
        self.config
            .periodic_delay(self.consecutive_failures.load(Ordering::SeqCst))
    }

    /// Assigns entries written while signed out to the current user so the
    /// next cycle pushes them.
    pub fn adopt_unowned_entries(&self) -> CloudResult<usize> {
        let user_id = self.auth.user_id().ok_or(CloudError::AuthRequired)?;
        let adopted = self.store.claim_unowned_entries(&user_id)?;
        if adopted > 0 {
            info!("adopted {adopted} local entries for {user_id}");
        }
        Ok(adopted)
    }

    /// Runs one sync cycle.
    ///
    /// Returns without touching anything when nobody is signed in or another
    /// cycle is in progress. A failed cycle is recorded in [`SyncState`] and
    /// returned; local data stays consistent and the next trigger retries.
    pub async fn sync(&self) -> CloudResult<SyncOutcome> {
        let Some(user_id) = self.auth.user_id() else {
            debug!("not signed in, skipping sync");
            return Ok(SyncOutcome::NotAuthenticated);
        };
        let Ok(_guard) = self.guard.try_lock() else {
            debug!("sync already in progress");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        self.state.begin();
        let result = self.run_cycle(&user_id).await;

        match &result {
            Ok(report) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                self.state.finish(Ok(Utc::now()));
                info!(
                    "sync complete: pulled {}+{}, pushed {}+{}, {} conflicts, {} push failures",
                    report.pulled_inserted,
                    report.pulled_updated,
                    report.pushed_created,
                    report.pushed_updated,
                    report.conflicts,
                    report.push_failures.len()
                );
            }
            Err(e) => {
                self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                self.state.finish(Err(e.to_string()));
                error!("sync failed: {e}");
            }
        }

        match self.store.count_pending(&user_id) {
            Ok(count) => self.state.set_pending_count(count),
            Err(e) => warn!("could not count pending entries: {e}"),
        }

        result.map(SyncOutcome::Completed)
    }

    async fn run_cycle(&self, user_id: &str) -> CloudResult<SyncReport> {
        let mut report = SyncReport::default();
        self.pull_journals(user_id, &mut report).await?;
        report.settings_pulled = self.pull_settings(user_id).await?;
        self.push_journals(user_id, &mut report).await?;
        report.settings_pushed = self.push_settings(user_id).await?;
        Ok(report)
    }

    // ── Pull ─────────────────────────────────────────────────────

    async fn pull_journals(&self, user_id: &str, report: &mut SyncReport) -> CloudResult<()> {
        let rows = self.remote.list_journals(user_id).await?;
        debug!("pulled {} remote journals", rows.len());

        for row in rows {
            let write = match row.to_local() {
                Ok(write) => write,
                Err(e) => {
                    warn!("skipping remote journal {}: {e}", row.id);
                    report.skipped_invalid += 1;
                    continue;
                }
            };

            let result = match self.store.find_by_remote_id(&row.id)? {
                None => self.store.insert_remote_entry(&write).map(|_| {
                    report.pulled_inserted += 1;
                }),
                Some(local) => self.merge(&local, &row, &write, report),
            };

            match result {
                Ok(()) => {}
                Err(StorageError::BlobInvariant { reason, .. }) => {
                    warn!("skipping remote journal {}: {reason}", row.id);
                    report.skipped_invalid += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Reconciles one local entry with its remote row.
    fn merge(
        &self,
        local: &JournalEntry,
        row: &RemoteJournal,
        write: &RemoteEntryWrite,
        report: &mut SyncReport,
    ) -> Result<(), StorageError> {
        let since = local.synced_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let remote_at = stored_precision(row.updated_at);
        let local_changed = local.updated_at > since;
        let remote_changed = remote_at > since;

        match (local_changed, remote_changed) {
            (true, true) => {
                let winner = if local.updated_at > remote_at {
                    ConflictWinner::Local
                } else {
                    ConflictWinner::Remote
                };
                match winner {
                    ConflictWinner::Remote => {
                        self.store.apply_remote_entry(local.id, write)?;
                    }
                    ConflictWinner::Local => {
                        self.store.mark_sync_status(local.id, SyncStatus::Pending)?;
                    }
                }
                warn!(
                    "conflict on entry {} (remote {}), {:?} copy kept",
                    local.id, row.id, winner
                );
                self.state.record_conflict(ConflictRecord {
                    local_id: local.id,
                    remote_id: row.id.clone(),
                    winner,
                    resolved_at: Utc::now(),
                });
                report.conflicts += 1;
            }
            (false, true) => {
                self.store.apply_remote_entry(local.id, write)?;
                report.pulled_updated += 1;
            }
            // Local-only changes go out with the push.
            _ => {}
        }
        Ok(())
    }

    async fn pull_settings(&self, user_id: &str) -> CloudResult<bool> {
        let Some(remote) = self.remote.get_settings(user_id).await? else {
            return Ok(false);
        };
        let local = self.store.load_settings()?;
        let local_at = local.updated_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let remote_at = stored_precision(remote.updated_at);

        if remote_at < local_at {
            return Ok(false);
        }
        if remote_at > local_at {
            let mut incoming = remote.to_settings();
            incoming.updated_at = Some(remote_at);
            // Key material lives on this device only.
            incoming.lock_enabled = local.lock_enabled;
            self.store.replace_settings(&incoming)?;
            debug!("applied remote settings from {remote_at}");
        }
        self.confirm_settings(user_id, remote_at);
        Ok(remote_at > local_at)
    }

    // ── Push ─────────────────────────────────────────────────────

    async fn push_journals(&self, user_id: &str, report: &mut SyncReport) -> CloudResult<()> {
        let requeued = self.store.requeue_failed(user_id)?;
        if requeued > 0 {
            debug!("retrying {requeued} entries that failed to push");
        }

        let pending = self.store.pending_entries(user_id)?;
        let batch_size = self.config.push_batch_size.max(1);

        for batch in pending.chunks(batch_size) {
            let results = join_all(batch.iter().map(|entry| self.push_one(entry, user_id))).await;

            for (entry, result) in batch.iter().zip(results) {
                match result {
                    Ok(Pushed::Created) => report.pushed_created += 1,
                    Ok(Pushed::Updated) => report.pushed_updated += 1,
                    Err(e) => {
                        warn!("push of entry {} failed: {e}", entry.id);
                        if let Err(mark_err) =
                            self.store.mark_sync_status(entry.id, SyncStatus::Error)
                        {
                            warn!("could not flag entry {}: {mark_err}", entry.id);
                        }
                        report.push_failures.push(entry.id);
                    }
                }
            }
        }
        Ok(())
    }

    async fn push_one(&self, entry: &JournalEntry, user_id: &str) -> CloudResult<Pushed> {
        let write = RemoteJournalWrite::from_entry(entry, user_id);
        let (row, pushed) = match &entry.remote_id {
            Some(remote_id) => (
                self.remote.update_journal(remote_id, &write).await?,
                Pushed::Updated,
            ),
            None => (self.remote.create_journal(&write).await?, Pushed::Created),
        };
        let synced_at = Utc::now().max(row.updated_at);
        if !self.store.mark_synced(entry, &row.id, synced_at)? {
            debug!("entry {} changed during push, left queued", entry.id);
        }
        Ok(pushed)
    }

    async fn push_settings(&self, user_id: &str) -> CloudResult<bool> {
        let local = self.store.load_settings()?;
        let Some(local_at) = local.updated_at else {
            // Defaults were never edited.
            return Ok(false);
        };
        if self
            .settings_synced_at(user_id)
            .is_some_and(|synced| local_at <= synced)
        {
            return Ok(false);
        }

        let row = RemoteSettings::from_settings(&local, user_id, local_at);
        if self.remote.get_settings(user_id).await?.is_some() {
            self.remote.update_settings(&row).await?;
        } else {
            self.remote.create_settings(&row).await?;
        }
        self.confirm_settings(user_id, local_at);
        debug!("pushed settings from {local_at}");
        Ok(true)
    }

    fn settings_synced_at(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.settings_synced
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|(user, _)| user == user_id)
            .map(|(_, at)| *at)
    }

    fn confirm_settings(&self, user_id: &str, at: DateTime<Utc>) {
        *self.settings_synced.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((user_id.to_string(), at));
    }
}

/// Truncates to the millisecond resolution of the local store so remote
/// timestamps compare equal to their stored copies.
fn stored_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}
