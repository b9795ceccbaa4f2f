//! Ordered schema migrations for the journal database.
//!
//! Each version runs once, inside its own transaction, and is recorded in
//! `schema_version`. Every step also tolerates being re-run against a
//! database it has already touched.

use crate::error::{StorageError, StorageResult};
use crate::legacy::LegacyBlob;
use crate::time::now_millis;
use duckdb::{params, Connection, Transaction};
use tracing::{debug, info, warn};

pub const LATEST_VERSION: u32 = 3;

type Step = fn(&Transaction<'_>) -> StorageResult<()>;

const STEPS: [(u32, Step); 3] = [
    (1, v1_legacy_layout),
    (2, v2_split_blobs),
    (3, v3_sync_columns),
];

/// Highest applied version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> StorageResult<u32> {
    ensure_version_table(conn)?;
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0) as u32)
}

/// Applies every pending migration up to and including `target`.
///
/// Returns the version the database is at afterwards.
pub fn migrate(conn: &mut Connection, target: u32) -> StorageResult<u32> {
    let mut version = current_version(conn)?;

    for (step_version, step) in STEPS {
        if step_version <= version || step_version > target {
            continue;
        }
        debug!("applying journal schema v{step_version}");
        let fail = |e: StorageError| StorageError::Migration {
            version: step_version,
            reason: e.to_string(),
        };

        let tx = conn.transaction().map_err(|e| fail(e.into()))?;
        step(&tx).map_err(fail)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
            params![step_version, now_millis()],
        )
        .map_err(|e| fail(e.into()))?;
        tx.commit().map_err(|e| fail(e.into()))?;

        version = step_version;
        info!("journal schema migrated to v{version}");
    }

    Ok(version)
}

fn ensure_version_table(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at BIGINT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> bool {
    conn.prepare(&format!("SELECT {column} FROM {table} LIMIT 0"))
        .is_ok()
}

fn add_column(conn: &Connection, table: &str, column: &str, decl: &str) -> StorageResult<()> {
    if !has_column(conn, table, column) {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))?;
    }
    Ok(())
}

fn v1_legacy_layout(conn: &Transaction<'_>) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE SEQUENCE IF NOT EXISTS journals_id_seq START 1;

        CREATE TABLE IF NOT EXISTS journals (
            id BIGINT PRIMARY KEY DEFAULT nextval('journals_id_seq'),
            blob TEXT,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY,
            lock_enabled BOOLEAN NOT NULL DEFAULT FALSE,
            cursor_color VARCHAR NOT NULL,
            text_color VARCHAR NOT NULL,
            cleanup_enabled BOOLEAN NOT NULL DEFAULT FALSE,
            cleanup_prompt VARCHAR NOT NULL,
            selected_model VARCHAR
        );
        "#,
    )?;
    Ok(())
}

fn v2_split_blobs(conn: &Transaction<'_>) -> StorageResult<()> {
    add_column(conn, "journals", "raw_blob", "TEXT")?;
    add_column(conn, "journals", "encrypted_blob", "TEXT")?;
    add_column(conn, "journals", "is_encrypted", "BOOLEAN")?;

    let legacy: Vec<(i64, Option<String>)> = {
        let mut stmt =
            conn.prepare("SELECT id, blob FROM journals WHERE is_encrypted IS NULL ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>()?
    };

    let mut ambiguous = 0usize;
    for (id, blob) in &legacy {
        let detected = LegacyBlob::detect(blob.as_deref().unwrap_or_default());
        if detected.is_ambiguous() {
            ambiguous += 1;
            warn!("journal {id}: legacy blob has no recognised shape, keeping it as plaintext");
        }
        let payload = detected.into_payload()?;
        conn.execute(
            "UPDATE journals SET raw_blob = ?, encrypted_blob = ?, is_encrypted = ?, blob = NULL WHERE id = ?",
            params![
                payload.raw_blob(),
                payload.encrypted_blob(),
                payload.is_encrypted(),
                id
            ],
        )?;
    }

    if !legacy.is_empty() {
        info!(
            "reshaped {} legacy journal rows ({ambiguous} unclassifiable)",
            legacy.len()
        );
    }
    Ok(())
}

fn v3_sync_columns(conn: &Transaction<'_>) -> StorageResult<()> {
    // Columns first: the indexes below reference them.
    add_column(conn, "journals", "user_id", "VARCHAR")?;
    add_column(conn, "journals", "remote_id", "VARCHAR")?;
    add_column(conn, "journals", "synced_at", "BIGINT")?;
    add_column(conn, "journals", "sync_status", "VARCHAR")?;
    add_column(conn, "journals", "version", "BIGINT DEFAULT 1")?;
    add_column(conn, "settings", "updated_at", "BIGINT")?;

    conn.execute_batch(
        r#"
        UPDATE journals SET version = 1 WHERE version IS NULL;

        CREATE INDEX IF NOT EXISTS idx_journals_is_encrypted ON journals(is_encrypted);
        CREATE INDEX IF NOT EXISTS idx_journals_created ON journals(created_at);
        CREATE INDEX IF NOT EXISTS idx_journals_updated ON journals(updated_at);
        CREATE INDEX IF NOT EXISTS idx_journals_sync_status ON journals(sync_status);
        CREATE INDEX IF NOT EXISTS idx_journals_user ON journals(user_id);
        CREATE INDEX IF NOT EXISTS idx_journals_remote ON journals(remote_id);
        "#,
    )?;
    Ok(())
}
