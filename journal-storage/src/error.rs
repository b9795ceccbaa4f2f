use journal_types::{EntryId, TypesError};
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("migration to schema v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A row whose encryption flag and blob columns disagree, or a payload
    /// that does not look like what its flag claims.
    #[error("blob invariant violated (entry {id:?}): {reason}")]
    BlobInvariant { id: Option<EntryId>, reason: String },

    #[error("entry not found: {0}")]
    NotFound(EntryId),

    #[error("invalid stored value: {0}")]
    InvalidData(String),

    #[error("storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub(crate) fn invariant(id: Option<EntryId>, err: TypesError) -> Self {
        StorageError::BlobInvariant {
            id,
            reason: err.to_string(),
        }
    }
}
