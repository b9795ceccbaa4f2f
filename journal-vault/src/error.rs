use journal_crypto::CryptoError;
use journal_storage::StorageError;
use journal_types::EntryId;
use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Locking is enabled but there is no session key to encrypt with.
    #[error("journal is locked")]
    JournalLocked,

    /// Encrypted entries were requested while no session key is held.
    #[error("encrypted entries require unlocking")]
    RequiresUnlock,

    #[error("encryption is not enabled")]
    NotInitialized,

    #[error("invalid password")]
    InvalidPassword,

    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Why an unlock attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnlockError {
    #[error("no wrapped key is stored")]
    NotInitialized,

    /// Authenticated decryption cannot tell these two apart.
    #[error("wrong password or corrupt key material")]
    WrongPasswordOrCorruptKey,
}

impl From<UnlockError> for VaultError {
    fn from(err: UnlockError) -> Self {
        match err {
            UnlockError::NotInitialized => VaultError::NotInitialized,
            UnlockError::WrongPasswordOrCorruptKey => VaultError::InvalidPassword,
        }
    }
}
