use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("KDF iteration count {iterations} below minimum {minimum}")]
    WeakKdfParams { iterations: u32, minimum: u32 },

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Wrong key, tampered ciphertext or IV. Never recoverable by retrying.
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("malformed envelope: {0}")]
    Malformed(String),
}
