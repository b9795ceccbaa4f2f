//! Cryptographic primitives for the journal store.
//!
//! - PBKDF2-HMAC-SHA256 for deriving keys from passwords
//! - AES-256-GCM for authenticated encryption with a fresh 96-bit IV per call
//! - Key material that zeroizes itself on drop
//!
//! # Architecture
//!
//! The journal uses a two-tier key system:
//!
//! 1. **Master Key**: a random 256-bit key that encrypts every entry. It is
//!    never stored in the clear.
//!
//! 2. **Password Key**: derived from the user's password and a stored salt.
//!    It only wraps (encrypts) the master key.
//!
//! Changing the password re-wraps the master key; entries are untouched.

mod cipher;
mod error;
mod key;

pub use cipher::{
    decrypt, decrypt_string, encrypt, encrypt_string, EncryptedData, IV_SIZE, TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    derive_key, generate_random_key, DerivedKey, KdfParams, MasterKey, Salt, KEY_SIZE,
    MIN_ITERATIONS, SALT_SIZE,
};
