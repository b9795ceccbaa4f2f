//! Session/auth boundary.
//!
//! Authentication itself lives in the host application. The core only needs
//! to know *who* is signed in, so the host pushes identity changes into an
//! [`AuthSession`] and the pipeline and sync engine read it per call.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// An authenticated account as reported by the host's auth provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Anonymous sessions exist on some providers but never sync.
    #[serde(default)]
    pub is_anonymous: bool,
}

impl AuthUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            is_anonymous: false,
        }
    }
}

/// Shared, cloneable handle to the current identity.
#[derive(Clone, Debug, Default)]
pub struct AuthSession {
    user: Arc<RwLock<Option<AuthUser>>>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: AuthUser) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Id of the signed-in, non-anonymous user.
    pub fn user_id(&self) -> Option<String> {
        self.current_user()
            .filter(|u| !u.is_anonymous)
            .map(|u| u.id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }
}
