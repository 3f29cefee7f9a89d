//! Credential storage
//!
//! The store is the one piece of state written from several places (login,
//! passive refresh, explicit refresh, logout). Callers read it on every
//! attach and never cache the value.

use std::sync::RwLock;

/// The bearer value attached to authenticated requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access: String,
}

impl Credential {
    pub fn new(access: impl Into<String>) -> Self {
        Self {
            access: access.into(),
        }
    }

    /// `Authorization` header value for this credential.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access)
    }
}

/// Holder of the current access credential.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<Credential>;

    fn set(&self, credential: Credential);

    fn clear(&self);
}

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    current: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            current: RwLock::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set(&self, credential: Credential) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(credential);
    }

    fn clear(&self) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}
