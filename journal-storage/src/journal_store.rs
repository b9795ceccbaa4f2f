//! Journal entries and the settings record, backed by DuckDB.

use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::migrations;
use crate::time::{from_millis, now_millis, opt_from_millis, to_millis};
use chrono::{DateTime, Local, NaiveDate, Utc};
use duckdb::{params, Connection, OptionalExt, Params, Row};
use journal_types::{
    EntryId, EntryPayload, JournalEntry, NewEntry, Settings, SettingsPatch, SyncStatus,
    SETTINGS_ID,
};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const ENTRY_COLUMNS: &str = "id, user_id, remote_id, raw_blob, encrypted_blob, is_encrypted, \
     created_at, updated_at, synced_at, sync_status, version";

/// Journal store backed by DuckDB.
///
/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct JournalStore {
    conn: Arc<Mutex<Connection>>,
}

/// A remote row about to be written locally, already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntryWrite {
    pub remote_id: String,
    pub user_id: String,
    pub payload: EntryPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl JournalStore {
    /// Opens or creates the journal database at `path`, migrating it to the
    /// latest schema.
    pub fn open(path: &Path, config: &StorageConfig) -> StorageResult<Self> {
        let mut conn = crate::open_journal_database(path, config)?;
        migrations::migrate(&mut conn, migrations::LATEST_VERSION)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrations::migrate(&mut conn, migrations::LATEST_VERSION)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    // ── Entries ──────────────────────────────────────────────────

    pub fn insert_entry(&self, entry: NewEntry) -> StorageResult<JournalEntry> {
        check_payload(None, &entry.payload)?;
        let conn = self.lock()?;
        let created_at = to_millis(entry.created_at);
        let updated_at = now_millis().max(created_at);

        let id: EntryId = conn.query_row(
            r#"
            INSERT INTO journals (
                user_id, raw_blob, encrypted_blob, is_encrypted,
                created_at, updated_at, sync_status, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 1)
            RETURNING id
            "#,
            params![
                entry.user_id,
                entry.payload.raw_blob(),
                entry.payload.encrypted_blob(),
                entry.payload.is_encrypted(),
                created_at,
                updated_at,
                SyncStatus::Pending.as_str(),
            ],
            |row| row.get(0),
        )?;

        Ok(JournalEntry {
            id,
            user_id: entry.user_id,
            remote_id: None,
            payload: entry.payload,
            created_at: from_millis(created_at)?,
            updated_at: from_millis(updated_at)?,
            synced_at: None,
            sync_status: Some(SyncStatus::Pending),
            version: 1,
        })
    }

    pub fn get_entry(&self, id: EntryId) -> StorageResult<Option<JournalEntry>> {
        let conn = self.lock()?;
        Ok(query_entries(&conn, "WHERE id = ?", params![id])?.pop())
    }

    /// Replaces an entry's content as a user edit: bumps `updated_at` and
    /// `version` and queues the entry for push.
    ///
    /// `updated_at` always moves past both its previous value and the last
    /// sync point, so the edit is visible to conflict detection even when it
    /// lands within the same millisecond.
    pub fn update_entry_blob(
        &self,
        id: EntryId,
        payload: &EntryPayload,
    ) -> StorageResult<JournalEntry> {
        check_payload(Some(id), payload)?;
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE journals SET
                raw_blob = ?,
                encrypted_blob = ?,
                is_encrypted = ?,
                updated_at = GREATEST(CAST(? AS BIGINT), updated_at + 1, COALESCE(synced_at + 1, 0)),
                version = version + 1,
                sync_status = 'pending'
            WHERE id = ?
            "#,
            params![
                payload.raw_blob(),
                payload.encrypted_blob(),
                payload.is_encrypted(),
                now_millis(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(id));
        }
        query_entries(&conn, "WHERE id = ?", params![id])?
            .pop()
            .ok_or(StorageError::NotFound(id))
    }

    /// Returns whether a row was deleted.
    pub fn delete_entry(&self, id: EntryId) -> StorageResult<bool> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM journals WHERE id = ?", params![id])? > 0)
    }

    /// Every entry, oldest first.
    pub fn list_entries(&self) -> StorageResult<Vec<JournalEntry>> {
        let conn = self.lock()?;
        query_entries(&conn, "ORDER BY created_at, id", [])
    }

    /// Entries created in `[start, end)`, oldest first.
    pub fn entries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<JournalEntry>> {
        let conn = self.lock()?;
        query_entries(
            &conn,
            "WHERE created_at >= ? AND created_at < ? ORDER BY created_at, id",
            params![to_millis(start), to_millis(end)],
        )
    }

    /// Entries created on `date` in the local calendar.
    pub fn entries_on(&self, date: NaiveDate) -> StorageResult<Vec<JournalEntry>> {
        let (start, end) = local_day_bounds(date)?;
        self.entries_between(start, end)
    }

    /// Distinct local dates that have at least one entry, newest first.
    pub fn journal_dates(&self) -> StorageResult<Vec<NaiveDate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT created_at FROM journals ORDER BY created_at DESC")?;
        let stamps = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut dates = stamps
            .into_iter()
            .map(|ms| Ok(from_millis(ms)?.with_timezone(&Local).date_naive()))
            .collect::<StorageResult<Vec<NaiveDate>>>()?;
        dates.sort_unstable_by(|a, b| b.cmp(a));
        dates.dedup();
        Ok(dates)
    }

    pub fn count_entries(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM journals", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn count_encrypted(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM journals WHERE is_encrypted = TRUE",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Sync bookkeeping ─────────────────────────────────────────

    pub fn find_by_remote_id(&self, remote_id: &str) -> StorageResult<Option<JournalEntry>> {
        let conn = self.lock()?;
        Ok(query_entries(&conn, "WHERE remote_id = ?", params![remote_id])?.pop())
    }

    /// Entries owned by `user_id` that still have to be pushed.
    pub fn pending_entries(&self, user_id: &str) -> StorageResult<Vec<JournalEntry>> {
        let conn = self.lock()?;
        query_entries(
            &conn,
            "WHERE user_id = ? AND (sync_status IS NULL OR sync_status = 'pending') ORDER BY id",
            params![user_id],
        )
    }

    pub fn count_pending(&self, user_id: &str) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM journals WHERE user_id = ? AND (sync_status IS NULL OR sync_status = 'pending')",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Moves entries that failed to push back to `pending`. Returns how many.
    pub fn requeue_failed(&self, user_id: &str) -> StorageResult<usize> {
        let conn = self.lock()?;
        Ok(conn.execute(
            "UPDATE journals SET sync_status = 'pending' WHERE user_id = ? AND sync_status = 'error'",
            params![user_id],
        )?)
    }

    /// Records a successful push of `pushed`, the copy read before the
    /// upload started.
    ///
    /// Returns `false` when the entry was edited or re-encrypted while the
    /// push was in flight. The remote id and sync point are still recorded,
    /// but the entry stays queued and its `updated_at` moves past `at` so the
    /// next cycle sends the newer copy.
    pub fn mark_synced(
        &self,
        pushed: &JournalEntry,
        remote_id: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let conn = self.lock()?;
        let at = to_millis(at);
        let changed = conn.execute(
            r#"
            UPDATE journals SET remote_id = ?, synced_at = ?, sync_status = 'synced'
            WHERE id = ? AND version = ? AND COALESCE(encrypted_blob, raw_blob) = ?
            "#,
            params![remote_id, at, pushed.id, pushed.version, pushed.payload.stored()],
        )?;
        if changed > 0 {
            return Ok(true);
        }

        let changed = conn.execute(
            r#"
            UPDATE journals SET
                remote_id = ?,
                synced_at = ?,
                updated_at = GREATEST(updated_at, CAST(? AS BIGINT) + 1)
            WHERE id = ?
            "#,
            params![remote_id, at, at, pushed.id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(pushed.id));
        }
        Ok(false)
    }

    pub fn mark_sync_status(&self, id: EntryId, status: SyncStatus) -> StorageResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE journals SET sync_status = ? WHERE id = ?",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }

    /// Stores a remote entry that has no local counterpart yet.
    pub fn insert_remote_entry(&self, remote: &RemoteEntryWrite) -> StorageResult<JournalEntry> {
        check_payload(None, &remote.payload)?;
        let conn = self.lock()?;
        let synced_at = now_millis().max(to_millis(remote.updated_at));
        let id: EntryId = conn.query_row(
            r#"
            INSERT INTO journals (
                user_id, remote_id, raw_blob, encrypted_blob, is_encrypted,
                created_at, updated_at, synced_at, sync_status, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'synced', ?)
            RETURNING id
            "#,
            params![
                remote.user_id,
                remote.remote_id,
                remote.payload.raw_blob(),
                remote.payload.encrypted_blob(),
                remote.payload.is_encrypted(),
                to_millis(remote.created_at),
                to_millis(remote.updated_at),
                synced_at,
                remote.version,
            ],
            |row| row.get(0),
        )?;
        query_entries(&conn, "WHERE id = ?", params![id])?
            .pop()
            .ok_or(StorageError::NotFound(id))
    }

    /// Overwrites a local entry with the remote version of it.
    pub fn apply_remote_entry(
        &self,
        id: EntryId,
        remote: &RemoteEntryWrite,
    ) -> StorageResult<JournalEntry> {
        check_payload(Some(id), &remote.payload)?;
        let conn = self.lock()?;
        let changed = conn.execute(
            r#"
            UPDATE journals SET
                user_id = ?,
                remote_id = ?,
                raw_blob = ?,
                encrypted_blob = ?,
                is_encrypted = ?,
                updated_at = ?,
                synced_at = ?,
                sync_status = 'synced',
                version = ?
            WHERE id = ?
            "#,
            params![
                remote.user_id,
                remote.remote_id,
                remote.payload.raw_blob(),
                remote.payload.encrypted_blob(),
                remote.payload.is_encrypted(),
                to_millis(remote.updated_at),
                now_millis().max(to_millis(remote.updated_at)),
                remote.version,
                id
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(id));
        }
        query_entries(&conn, "WHERE id = ?", params![id])?
            .pop()
            .ok_or(StorageError::NotFound(id))
    }

    // ── Unowned entries ──────────────────────────────────────────

    /// Entries written before any account was signed in.
    pub fn count_unowned(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM journals WHERE user_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Assigns every unowned entry to `user_id` and queues it for push.
    pub fn claim_unowned_entries(&self, user_id: &str) -> StorageResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let claimed = tx.execute(
            "UPDATE journals SET user_id = ?, sync_status = 'pending' WHERE user_id IS NULL",
            params![user_id],
        )?;
        tx.commit()?;
        debug!("claimed {claimed} unowned journal entries");
        Ok(claimed)
    }

    // ── Bulk ─────────────────────────────────────────────────────

    /// Runs `f` inside a single database transaction.
    ///
    /// Commits when `f` returns `Ok`; any error rolls every write back.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&JournalTx<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut conn = self.lock()?;
        let tx = JournalTx {
            tx: conn.transaction().map_err(StorageError::from)?,
        };
        match f(&tx) {
            Ok(value) => {
                tx.tx.commit().map_err(StorageError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.tx.rollback() {
                    tracing::error!("journal transaction rollback failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    // ── Settings ─────────────────────────────────────────────────

    /// Reads the settings record, creating it with defaults on first use.
    pub fn load_settings(&self) -> StorageResult<Settings> {
        let conn = self.lock()?;
        if let Some(settings) = read_settings(&conn)? {
            return Ok(settings);
        }
        let defaults = Settings::default();
        write_settings(&conn, &defaults)?;
        Ok(defaults)
    }

    /// Merges `patch` into the stored record and stamps `updated_at`.
    pub fn save_settings(&self, patch: &SettingsPatch) -> StorageResult<Settings> {
        let conn = self.lock()?;
        let mut settings = read_settings(&conn)?.unwrap_or_default();
        settings.apply(patch);
        let now = now_millis();
        let previous = settings.updated_at.map(to_millis).unwrap_or(0);
        settings.updated_at = Some(from_millis(now.max(previous + 1))?);
        write_settings(&conn, &settings)?;
        Ok(settings)
    }

    /// Stores `settings` as-is, keeping its `updated_at`.
    pub fn replace_settings(&self, settings: &Settings) -> StorageResult<()> {
        let conn = self.lock()?;
        write_settings(&conn, settings)
    }
}

/// Writes made inside [`JournalStore::with_transaction`].
pub struct JournalTx<'conn> {
    tx: duckdb::Transaction<'conn>,
}

impl JournalTx<'_> {
    pub fn list_entries(&self) -> StorageResult<Vec<JournalEntry>> {
        query_entries(&self.tx, "ORDER BY id", [])
    }

    pub fn list_encrypted(&self) -> StorageResult<Vec<JournalEntry>> {
        query_entries(&self.tx, "WHERE is_encrypted = TRUE ORDER BY id", [])
    }

    pub fn list_plaintext(&self) -> StorageResult<Vec<JournalEntry>> {
        query_entries(&self.tx, "WHERE is_encrypted = FALSE ORDER BY id", [])
    }

    /// Swaps an entry's at-rest representation without treating it as an
    /// edit: `updated_at` and `version` stay, but the entry is queued so the
    /// new representation reaches the remote.
    pub fn replace_payload(&self, id: EntryId, payload: &EntryPayload) -> StorageResult<()> {
        check_payload(Some(id), payload)?;
        let changed = self.tx.execute(
            r#"
            UPDATE journals SET
                raw_blob = ?,
                encrypted_blob = ?,
                is_encrypted = ?,
                sync_status = 'pending'
            WHERE id = ?
            "#,
            params![
                payload.raw_blob(),
                payload.encrypted_blob(),
                payload.is_encrypted(),
                id
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(id));
        }
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────

struct EntryRow {
    id: EntryId,
    user_id: Option<String>,
    remote_id: Option<String>,
    raw_blob: Option<String>,
    encrypted_blob: Option<String>,
    is_encrypted: Option<bool>,
    created_at: i64,
    updated_at: i64,
    synced_at: Option<i64>,
    sync_status: Option<String>,
    version: Option<i64>,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            remote_id: row.get(2)?,
            raw_blob: row.get(3)?,
            encrypted_blob: row.get(4)?,
            is_encrypted: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            synced_at: row.get(8)?,
            sync_status: row.get(9)?,
            version: row.get(10)?,
        })
    }

    fn into_entry(self) -> StorageResult<JournalEntry> {
        let payload = EntryPayload::from_columns(
            self.raw_blob,
            self.encrypted_blob,
            self.is_encrypted.unwrap_or(false),
        )
        .map_err(|e| StorageError::invariant(Some(self.id), e))?;
        let sync_status = self
            .sync_status
            .as_deref()
            .map(str::parse::<SyncStatus>)
            .transpose()
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        Ok(JournalEntry {
            id: self.id,
            user_id: self.user_id,
            remote_id: self.remote_id,
            payload,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            synced_at: opt_from_millis(self.synced_at)?,
            sync_status,
            version: self.version.unwrap_or(1),
        })
    }
}

fn query_entries<P: Params>(
    conn: &Connection,
    clause: &str,
    params: P,
) -> StorageResult<Vec<JournalEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM journals {clause}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, EntryRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(EntryRow::into_entry).collect()
}

/// Rejects payloads whose content does not match their column: plaintext
/// must be an entry body, ciphertext must be an envelope.
fn check_payload(id: Option<EntryId>, payload: &EntryPayload) -> StorageResult<()> {
    let value: serde_json::Value =
        serde_json::from_str(payload.stored()).map_err(|e| StorageError::BlobInvariant {
            id,
            reason: format!("blob is not JSON: {e}"),
        })?;
    let has_str = |key: &str| value.get(key).is_some_and(serde_json::Value::is_string);

    match payload {
        EntryPayload::Plain(_) if !has_str("content") => Err(StorageError::BlobInvariant {
            id,
            reason: "plaintext blob has no content".into(),
        }),
        EntryPayload::Plain(_) if has_str("cipher") && has_str("iv") => {
            Err(StorageError::BlobInvariant {
                id,
                reason: "ciphertext envelope stored as plaintext".into(),
            })
        }
        EntryPayload::Encrypted(_) if !(has_str("cipher") && has_str("iv")) => {
            Err(StorageError::BlobInvariant {
                id,
                reason: "encrypted blob is not a cipher/iv envelope".into(),
            })
        }
        _ => Ok(()),
    }
}

fn local_day_bounds(date: NaiveDate) -> StorageResult<(DateTime<Utc>, DateTime<Utc>)> {
    let start_of = |d: NaiveDate| -> StorageResult<DateTime<Utc>> {
        d.and_hms_opt(0, 0, 0)
            .and_then(|naive| naive.and_local_timezone(Local).earliest())
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| StorageError::InvalidData(format!("no local midnight for {d}")))
    };
    let next = date
        .succ_opt()
        .ok_or_else(|| StorageError::InvalidData(format!("no day after {date}")))?;
    Ok((start_of(date)?, start_of(next)?))
}

fn read_settings(conn: &Connection) -> StorageResult<Option<Settings>> {
    let row = conn
        .query_row(
            r#"
            SELECT lock_enabled, cursor_color, text_color, cleanup_enabled,
                   cleanup_prompt, selected_model, updated_at
            FROM settings WHERE id = ?
            "#,
            params![SETTINGS_ID],
            |row| {
                Ok((
                    Settings {
                        lock_enabled: row.get(0)?,
                        cursor_color: row.get(1)?,
                        text_color: row.get(2)?,
                        cleanup_enabled: row.get(3)?,
                        cleanup_prompt: row.get(4)?,
                        selected_model: row.get(5)?,
                        updated_at: None,
                    },
                    row.get::<_, Option<i64>>(6)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((mut settings, updated_at)) => {
            settings.updated_at = opt_from_millis(updated_at)?;
            Ok(Some(settings))
        }
        None => Ok(None),
    }
}

fn write_settings(conn: &Connection, settings: &Settings) -> StorageResult<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO settings (
            id, lock_enabled, cursor_color, text_color, cleanup_enabled,
            cleanup_prompt, selected_model, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            SETTINGS_ID,
            settings.lock_enabled,
            settings.cursor_color,
            settings.text_color,
            settings.cleanup_enabled,
            settings.cleanup_prompt,
            settings.selected_model,
            settings.updated_at.map(to_millis),
        ],
    )?;
    Ok(())
}
