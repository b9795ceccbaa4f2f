use thiserror::Error;

pub type TypesResult<T> = Result<T, TypesError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("unknown sync status: {0}")]
    InvalidSyncStatus(String),

    /// A row's blob columns disagree with its `is_encrypted` flag.
    #[error("blob columns inconsistent with is_encrypted={is_encrypted}")]
    BlobInvariant { is_encrypted: bool },
}
