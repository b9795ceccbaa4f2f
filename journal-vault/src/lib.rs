//! Key custody and transparent entry encryption.
//!
//! [`KeyCustodian`] owns the password-wrapped master key: it creates it when
//! encryption is enabled, unwraps it into a [`KeySession`] on unlock and
//! erases it when encryption is disabled. [`EntryPipeline`] sits between
//! callers and the journal store, encrypting writes while locking is enabled
//! and decrypting reads with the session key.
//!
//! The password and the raw master key are never persisted. Only the wrapped
//! key (`encryptedMaster`) and its PBKDF2 salt (`keySalt`) reach the device
//! key-value store.

mod custodian;
mod enrichment;
mod error;
mod pipeline;
mod session;

pub use custodian::{CustodianState, KeyCustodian, ENCRYPTED_MASTER_KEY, KEY_SALT_KEY};
pub use enrichment::{Cleaned, EnrichError, Enricher};
pub use error::{UnlockError, VaultError, VaultResult};
pub use pipeline::{
    DecryptedEntry, EntryContent, EntryPipeline, DECRYPTION_FAILED, TAGGED_SECTIONS,
};
pub use session::KeySession;
