//! Never-failing session storage facade.

use crate::{
    PersistedSession, StorageBackend, StorageKeys, StoredTokens, WrappedSessionRecord,
};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Storage access that degrades to a no-op instead of failing.
///
/// Every backend error is logged and mapped to a sentinel (`None` / `false`).
/// Losing persisted state only forces a later re-authentication, so nothing
/// here is retried.
pub struct SessionStore {
    backend: Box<dyn StorageBackend>,
    available: OnceLock<bool>,
}

impl SessionStore {
    /// Create a new store over the given backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend,
            available: OnceLock::new(),
        }
    }

    /// Whether the backend accepted a write-then-delete probe.
    ///
    /// Probed once per store; later calls return the memoized result.
    pub fn is_available(&self) -> bool {
        *self.available.get_or_init(|| self.probe())
    }

    fn probe(&self) -> bool {
        let result = self
            .backend
            .set(StorageKeys::PROBE, "1")
            .and_then(|_| self.backend.delete(StorageKeys::PROBE));
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "session storage unavailable, persistence disabled");
                false
            }
        }
    }

    /// Read a value, or `None` when missing or unreadable.
    pub fn get(&self, key: &str) -> Option<String> {
        if !self.is_available() {
            return None;
        }
        match self.backend.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "storage read failed");
                None
            }
        }
    }

    /// Write a value; `false` when the write did not happen.
    pub fn set(&self, key: &str, value: &str) -> bool {
        if !self.is_available() {
            return false;
        }
        match self.backend.set(key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "storage write failed");
                false
            }
        }
    }

    /// Remove a value; `false` only when the backend failed.
    pub fn remove(&self, key: &str) -> bool {
        if !self.is_available() {
            return false;
        }
        match self.backend.delete(key) {
            Ok(_) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "storage delete failed");
                false
            }
        }
    }

    /// Write all three session representations.
    pub fn persist_session(&self, session: &PersistedSession) -> bool {
        let record = WrappedSessionRecord::new(session.clone());
        let wrapped = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to encode session record");
                return false;
            }
        };

        let access = self.set(StorageKeys::ACCESS_TOKEN, &session.access_token);
        let refresh = self.set(StorageKeys::REFRESH_TOKEN, &session.refresh_token);
        let wrapped = self.set(StorageKeys::WRAPPED_SESSION, &wrapped);
        debug!(access, refresh, wrapped, "persisted session");
        access && refresh && wrapped
    }

    /// Read every stored representation without reconciling them.
    ///
    /// An undecodable wrapped record is treated as absent.
    pub fn read_tokens(&self) -> StoredTokens {
        let wrapped = self
            .get(StorageKeys::WRAPPED_SESSION)
            .and_then(|raw| match serde_json::from_str::<WrappedSessionRecord>(&raw) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "ignoring malformed wrapped session record");
                    None
                }
            });

        StoredTokens {
            access_token: self.get(StorageKeys::ACCESS_TOKEN),
            refresh_token: self.get(StorageKeys::REFRESH_TOKEN),
            wrapped,
        }
    }

    /// The bare access token, if one is stored.
    pub fn access_token(&self) -> Option<String> {
        self.get(StorageKeys::ACCESS_TOKEN)
            .filter(|token| !token.trim().is_empty())
    }

    /// Drop the bare access token, leaving refresh material in place.
    pub fn clear_access_token(&self) -> bool {
        self.remove(StorageKeys::ACCESS_TOKEN)
    }

    /// Drop the wrapped record after the provider rejected it.
    pub fn drop_wrapped_session(&self) -> bool {
        self.remove(StorageKeys::WRAPPED_SESSION)
    }

    /// Forget a token pair the identity provider rejected.
    ///
    /// The wrapped record and bare access token go; the refresh token is kept
    /// as a bare value so a later forced refresh can still use it.
    pub fn discard_rejected_session(&self, refresh_token: &str) -> bool {
        let wrapped = self.drop_wrapped_session();
        let access = self.clear_access_token();
        let refresh = self.set(StorageKeys::REFRESH_TOKEN, refresh_token);
        wrapped && access && refresh
    }

    /// Remove every session key.
    pub fn clear_all(&self) -> bool {
        StorageKeys::SESSION_KEYS
            .iter()
            .fold(true, |ok, key| self.remove(key) && ok)
    }
}
