//! Lifecycle of the password-wrapped master key.

use crate::error::{UnlockError, VaultError, VaultResult};
use crate::session::KeySession;
use journal_crypto::{
    decrypt_string, derive_key, encrypt_string, generate_random_key, EncryptedData, KdfParams,
    MasterKey, Salt,
};
use journal_storage::{JournalStore, KeyValueStore};
use journal_types::{EntryPayload, SettingsPatch};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Device key holding the wrapped master key envelope.
pub const ENCRYPTED_MASTER_KEY: &str = "encryptedMaster";

/// Device key holding the base64 PBKDF2 salt.
pub const KEY_SALT_KEY: &str = "keySalt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustodianState {
    /// No wrapped key persisted.
    Uninitialized,
    /// Wrapped key persisted, no session key.
    Locked,
    Unlocked,
}

/// Owns the master key: wraps it under a password, unwraps it into the
/// session and re-encrypts the journal when encryption is switched on or off.
pub struct KeyCustodian {
    store: JournalStore,
    device: Arc<dyn KeyValueStore>,
    session: KeySession,
    kdf: KdfParams,
}

impl KeyCustodian {
    pub fn new(store: JournalStore, device: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            device,
            session: KeySession::new(),
            kdf: KdfParams::default(),
        }
    }

    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn session(&self) -> &KeySession {
        &self.session
    }

    pub fn state(&self) -> VaultResult<CustodianState> {
        if !self.has_key_material()? {
            return Ok(CustodianState::Uninitialized);
        }
        Ok(if self.session.is_active() {
            CustodianState::Unlocked
        } else {
            CustodianState::Locked
        })
    }

    /// Whether either half of the wrapped key is on this device. A lone salt
    /// left by an interrupted setup still counts.
    pub fn has_key_material(&self) -> VaultResult<bool> {
        Ok(self.device.get(ENCRYPTED_MASTER_KEY)?.is_some()
            || self.device.get(KEY_SALT_KEY)?.is_some())
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.is_active()
    }

    /// Runs `f` with the session key.
    pub fn with_key<R>(&self, f: impl FnOnce(&MasterKey) -> R) -> VaultResult<R> {
        self.session.with_key(f).ok_or(VaultError::JournalLocked)
    }

    // ── Enable / disable ─────────────────────────────────────────

    /// Turns on encryption under `password`.
    ///
    /// Returns `Ok(false)` without changing anything when key material
    /// already exists and `force` is not set. Otherwise every plaintext entry
    /// is encrypted under a fresh master key and the wrapped key is persisted
    /// in the same database transaction; entries still encrypted under the
    /// current session key are moved to the new one.
    pub fn enable_encryption(&self, password: &str, force: bool) -> VaultResult<bool> {
        if self.has_key_material()? && !force {
            debug!("existing key material found, not overwriting");
            return Ok(false);
        }

        let master = generate_random_key();
        let (wrapping, salt) = derive_key(password, None, &self.kdf)?;
        let wrapped = encrypt_string(&wrapping, &master.to_base64())?.to_json()?;
        let previous = self.session.snapshot();

        let converted = self.store.with_transaction(|tx| -> VaultResult<usize> {
            let mut converted = 0;
            for entry in tx.list_entries()? {
                let sealed = match &entry.payload {
                    EntryPayload::Plain(raw) => Some(encrypt_string(&master, raw)?),
                    EntryPayload::Encrypted(envelope) => {
                        let reopened = previous.as_ref().and_then(|old| {
                            EncryptedData::from_json(envelope)
                                .and_then(|data| decrypt_string(old, &data))
                                .ok()
                        });
                        match reopened {
                            Some(raw) => Some(encrypt_string(&master, &raw)?),
                            None => {
                                warn!(
                                    "entry {} is encrypted under a key that is not available, leaving it as is",
                                    entry.id
                                );
                                None
                            }
                        }
                    }
                };
                if let Some(data) = sealed {
                    tx.replace_payload(entry.id, &EntryPayload::Encrypted(data.to_json()?))?;
                    converted += 1;
                }
            }
            self.persist_key_material(&wrapped, &salt)?;
            Ok(converted)
        })?;

        self.store.save_settings(&SettingsPatch::lock_enabled(true))?;
        self.session.install(master);
        info!("encryption enabled, {converted} entries encrypted");
        Ok(true)
    }

    /// Turns encryption off, decrypting every entry with `key` or the
    /// session key.
    ///
    /// Any failure rolls the whole pass back and leaves the key material in
    /// place.
    pub fn disable_encryption(&self, key: Option<&MasterKey>) -> VaultResult<()> {
        let key = match key {
            Some(key) => Some(key.clone()),
            None => self.session.snapshot(),
        };

        let decrypted = self.store.with_transaction(|tx| -> VaultResult<usize> {
            let encrypted = tx.list_encrypted()?;
            if encrypted.is_empty() {
                return Ok(0);
            }
            let key = key.as_ref().ok_or(VaultError::JournalLocked)?;
            for entry in &encrypted {
                let data = EncryptedData::from_json(entry.payload.stored())?;
                let raw = decrypt_string(key, &data)?;
                tx.replace_payload(entry.id, &EntryPayload::Plain(raw))?;
            }
            Ok(encrypted.len())
        })?;

        self.device.remove(ENCRYPTED_MASTER_KEY)?;
        self.device.remove(KEY_SALT_KEY)?;
        self.store.save_settings(&SettingsPatch::lock_enabled(false))?;
        self.session.clear();
        info!("encryption disabled, {decrypted} entries decrypted");
        Ok(())
    }

    // ── Unlock / lock ────────────────────────────────────────────

    /// Unwraps the master key and installs it in the session.
    ///
    /// Every failure, including a wrong password, yields `None`.
    pub fn unlock(&self, password: &str) -> Option<MasterKey> {
        match self.try_unlock(password) {
            Ok(key) => Some(key),
            Err(e) => {
                debug!("unlock failed: {e}");
                None
            }
        }
    }

    pub fn try_unlock(&self, password: &str) -> Result<MasterKey, UnlockError> {
        let master = self.unwrap_master(password)?;
        self.session.install(master.clone());
        Ok(master)
    }

    /// Clears the session key. Key material stays persisted.
    pub fn lock(&self) {
        self.session.clear();
    }

    /// Re-wraps the master key under `new_password`. Entries are untouched.
    pub fn change_password(&self, old_password: &str, new_password: &str) -> VaultResult<()> {
        let master = self.unwrap_master(old_password)?;
        let (wrapping, salt) = derive_key(new_password, None, &self.kdf)?;
        let wrapped = encrypt_string(&wrapping, &master.to_base64())?.to_json()?;
        self.persist_key_material(&wrapped, &salt)?;
        info!("journal password changed");
        Ok(())
    }

    // ── Text helpers ─────────────────────────────────────────────

    /// Encrypts with `key`, falling back to the session key.
    pub fn encrypt_text(&self, text: &str, key: Option<&MasterKey>) -> VaultResult<EncryptedData> {
        match key {
            Some(key) => Ok(encrypt_string(key, text)?),
            None => Ok(self.with_key(|key| encrypt_string(key, text))??),
        }
    }

    /// Decrypts with `key`, falling back to the session key.
    pub fn decrypt_text(&self, data: &EncryptedData, key: Option<&MasterKey>) -> VaultResult<String> {
        match key {
            Some(key) => Ok(decrypt_string(key, data)?),
            None => Ok(self.with_key(|key| decrypt_string(key, data))??),
        }
    }

    // ── Async facade ─────────────────────────────────────────────

    /// [`unlock`](Self::unlock) with the key derivation moved off the async
    /// executor.
    pub async fn unlock_async(self: &Arc<Self>, password: String) -> Option<MasterKey> {
        let custodian = Arc::clone(self);
        match tokio::task::spawn_blocking(move || custodian.unlock(&password)).await {
            Ok(key) => key,
            Err(e) => {
                warn!("unlock task failed: {e}");
                None
            }
        }
    }

    /// [`enable_encryption`](Self::enable_encryption) on the blocking pool.
    pub async fn enable_encryption_async(
        self: &Arc<Self>,
        password: String,
        force: bool,
    ) -> VaultResult<bool> {
        let custodian = Arc::clone(self);
        tokio::task::spawn_blocking(move || custodian.enable_encryption(&password, force))
            .await
            .map_err(|e| VaultError::Task(e.to_string()))?
    }

    // ── Internals ────────────────────────────────────────────────

    fn unwrap_master(&self, password: &str) -> Result<MasterKey, UnlockError> {
        let corrupt = |what: &str, err: &dyn std::fmt::Display| {
            debug!("{what}: {err}");
            UnlockError::WrongPasswordOrCorruptKey
        };

        let wrapped = match self.device.get(ENCRYPTED_MASTER_KEY) {
            Ok(Some(wrapped)) => wrapped,
            Ok(None) => return Err(UnlockError::NotInitialized),
            Err(e) => return Err(corrupt("reading wrapped key", &e)),
        };
        let salt = match self.device.get(KEY_SALT_KEY) {
            Ok(Some(salt)) => Salt::from_base64(&salt).map_err(|e| corrupt("salt", &e))?,
            Ok(None) => return Err(corrupt("salt", &"missing")),
            Err(e) => return Err(corrupt("reading salt", &e)),
        };

        let (wrapping, _) =
            derive_key(password, Some(&salt), &self.kdf).map_err(|e| corrupt("kdf", &e))?;
        let envelope = EncryptedData::from_json(&wrapped).map_err(|e| corrupt("envelope", &e))?;
        let encoded =
            decrypt_string(&wrapping, &envelope).map_err(|e| corrupt("unwrap", &e))?;
        MasterKey::from_base64(&encoded).map_err(|e| corrupt("master key", &e))
    }

    /// Writes both key entries, restoring the previous ones if either write
    /// fails.
    fn persist_key_material(&self, wrapped: &str, salt: &Salt) -> VaultResult<()> {
        let previous_master = self.device.get(ENCRYPTED_MASTER_KEY)?;
        let previous_salt = self.device.get(KEY_SALT_KEY)?;

        let result = self
            .device
            .set(ENCRYPTED_MASTER_KEY, wrapped)
            .and_then(|()| self.device.set(KEY_SALT_KEY, &salt.to_base64()));

        if let Err(e) = result {
            warn!("persisting key material failed, restoring previous: {e}");
            self.restore(ENCRYPTED_MASTER_KEY, previous_master.as_deref());
            self.restore(KEY_SALT_KEY, previous_salt.as_deref());
            return Err(e.into());
        }
        Ok(())
    }

    fn restore(&self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(value) => self.device.set(key, value),
            None => self.device.remove(key),
        };
        if let Err(e) = result {
            warn!("could not restore {key}: {e}");
        }
    }
}
