//! Persisted session record shapes.

use serde::{Deserialize, Serialize};

/// Session as persisted in the wrapped record, using the identity provider's
/// field names. Every field defaults so partially written records still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Unix timestamp (seconds) at which the access token expires.
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub user: serde_json::Value,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Wrapped record stored under [`crate::StorageKeys::WRAPPED_SESSION`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrappedSessionRecord {
    #[serde(rename = "currentSession")]
    pub current_session: PersistedSession,
    #[serde(rename = "expiresAt", default)]
    pub expires_at: i64,
}

impl WrappedSessionRecord {
    pub fn new(session: PersistedSession) -> Self {
        Self {
            expires_at: session.expires_at,
            current_session: session,
        }
    }
}

/// Everything that was found in storage, before reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub wrapped: Option<WrappedSessionRecord>,
}

/// The best credential set that can be assembled from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPair {
    /// Access and refresh token that belong together.
    Complete {
        access_token: String,
        refresh_token: String,
    },
    /// Only a refresh token survived.
    RefreshOnly(String),
    /// Nothing usable.
    Empty,
}

impl TokenPair {
    /// The refresh token, whichever variant holds it.
    pub fn refresh_token(&self) -> Option<&str> {
        match self {
            TokenPair::Complete { refresh_token, .. } => Some(refresh_token),
            TokenPair::RefreshOnly(refresh_token) => Some(refresh_token),
            TokenPair::Empty => None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl StoredTokens {
    /// Pick the most complete pair.
    ///
    /// A wrapped record holding both tokens wins. Otherwise bare values are
    /// preferred over wrapped ones, per token. An access token without any
    /// refresh token cannot be rehydrated and resolves to `Empty`.
    pub fn resolve(&self) -> TokenPair {
        let wrapped_access = non_empty(
            self.wrapped
                .as_ref()
                .map(|w| w.current_session.access_token.as_str()),
        );
        let wrapped_refresh = non_empty(
            self.wrapped
                .as_ref()
                .map(|w| w.current_session.refresh_token.as_str()),
        );

        if let (Some(access_token), Some(refresh_token)) = (&wrapped_access, &wrapped_refresh) {
            return TokenPair::Complete {
                access_token: access_token.clone(),
                refresh_token: refresh_token.clone(),
            };
        }

        let access = non_empty(self.access_token.as_deref()).or(wrapped_access);
        let refresh = non_empty(self.refresh_token.as_deref()).or(wrapped_refresh);

        match (access, refresh) {
            (Some(access_token), Some(refresh_token)) => TokenPair::Complete {
                access_token,
                refresh_token,
            },
            (None, Some(refresh_token)) => TokenPair::RefreshOnly(refresh_token),
            _ => TokenPair::Empty,
        }
    }
}
