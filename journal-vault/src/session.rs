use journal_crypto::MasterKey;
use std::sync::{Arc, RwLock};

/// The unwrapped master key, held in memory between unlock and lock.
///
/// Clones share the same slot, so a lock through one handle is seen by all.
/// Callers borrow the key for the duration of a closure and never keep it.
#[derive(Clone, Default)]
pub struct KeySession {
    key: Arc<RwLock<Option<MasterKey>>>,
}

impl KeySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, key: MasterKey) {
        *self.key.write().unwrap_or_else(|e| e.into_inner()) = Some(key);
    }

    /// Drops the key; it zeroizes itself.
    pub fn clear(&self) {
        self.key.write().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn is_active(&self) -> bool {
        self.key.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Runs `f` with the session key, or returns `None` when locked.
    pub fn with_key<R>(&self, f: impl FnOnce(&MasterKey) -> R) -> Option<R> {
        self.key
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(f)
    }

    pub(crate) fn snapshot(&self) -> Option<MasterKey> {
        self.with_key(MasterKey::clone)
    }
}

impl std::fmt::Debug for KeySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySession")
            .field("active", &self.is_active())
            .finish()
    }
}
