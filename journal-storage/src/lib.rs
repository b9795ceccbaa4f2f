//! DuckDB storage layer for the journal.
//!
//! Holds journal entries and the settings record in a single DuckDB file,
//! plus a small device-local key-value store for the wrapped master key.
//!
//! # Architecture
//!
//! - Entries keep exactly one of `raw_blob` / `encrypted_blob`, selected by
//!   `is_encrypted`; the store refuses writes that would break this
//! - Schema changes are ordered migrations recorded in `schema_version`
//! - Timestamps are stored as UTC epoch milliseconds

mod config;
mod device_store;
mod error;
mod journal_store;
mod legacy;
pub mod migrations;
mod time;

pub use config::StorageConfig;
pub use device_store::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use error::{StorageError, StorageResult};
pub use journal_store::{JournalStore, JournalTx, RemoteEntryWrite};
pub use legacy::LegacyBlob;

use std::path::{Path, PathBuf};

/// Opens the journal database file.
///
/// DuckDB refuses to open `journal.duckdb` when a crash left a
/// `journal.duckdb.wal` it cannot replay. In that case the log is discarded
/// and the open retried once; entries committed before the crash live in the
/// main file. Memory and thread caps from `config` apply to the connection.
pub fn open_journal_database(
    path: &Path,
    config: &StorageConfig,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(conn) => conn,
        Err(err) => {
            let wal = wal_path(path);
            if !wal.exists() {
                return Err(err.into());
            }
            tracing::warn!(
                db = %path.display(),
                wal = %wal.display(),
                "journal database did not open ({err}), discarding its write-ahead log"
            );
            std::fs::remove_file(&wal).map_err(|_| err)?;
            duckdb::Connection::open(path)?
        }
    };
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        config.memory_limit.replace('\'', ""),
        config.threads.max(1)
    ))?;
    Ok(conn)
}

/// `journal.duckdb` keeps its log in `journal.duckdb.wal`.
fn wal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".wal");
    PathBuf::from(name)
}
