//! Core domain types shared by every layer of the journal store.
//!
//! - [`JournalEntry`] / [`EntryPayload`]: a stored entry and its at-rest
//!   representation (plaintext or ciphertext, never both)
//! - [`EntryBlob`]: the plaintext JSON body of an entry
//! - [`Settings`] / [`SettingsState`]: the singleton settings record
//! - [`AuthSession`]: the host-supplied identity that gates sync

mod auth;
mod entry;
mod error;
mod settings;

pub use auth::{AuthSession, AuthUser};
pub use entry::{EntryBlob, EntryId, EntryPayload, JournalEntry, NewEntry, SyncStatus};
pub use error::{TypesError, TypesResult};
pub use settings::{
    Settings, SettingsPatch, SettingsState, DEFAULT_CLEANUP_PROMPT, DEFAULT_CURSOR_COLOR,
    DEFAULT_TEXT_COLOR, SETTINGS_ID,
};
