//! Session and user model.

use crate::{AuthError, AuthResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use coach_storage::PersistedSession;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A signed-in user as the application sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl User {
    /// Build a user from the identity provider's user object.
    ///
    /// The app-level name and role live in `user_metadata`; the top-level
    /// `role` is the provider's own database role and is ignored.
    pub fn from_provider_claims(claims: &Value) -> Option<Self> {
        let id = claims.get("id")?.as_str()?.trim();
        if id.is_empty() {
            return None;
        }
        let metadata = claims.get("user_metadata");
        let meta_str = |key: &str| {
            metadata
                .and_then(|m| m.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Some(Self {
            id: id.to_string(),
            email: claims
                .get("email")
                .and_then(Value::as_str)
                .map(str::to_string),
            role: meta_str("role"),
            name: meta_str("name").or_else(|| meta_str("full_name")),
        })
    }
}

/// An access/refresh token pair with its expiry and provider user claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) at which the access token expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub user: Value,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Both tokens present.
    pub fn is_complete(&self) -> bool {
        !self.access_token.trim().is_empty() && !self.refresh_token.trim().is_empty()
    }

    /// Expiry from the explicit field, else from the token's `exp` claim.
    pub fn expiry(&self) -> Option<i64> {
        self.expires_at
            .or_else(|| token_expiry(&self.access_token).ok())
    }

    /// Whether the access token is expired, or expires within `skew_secs`.
    pub fn expires_within(&self, skew_secs: i64) -> bool {
        match self.expiry() {
            Some(expires_at) => expires_at - Utc::now().timestamp() <= skew_secs,
            None => true,
        }
    }

    /// Fill `expires_at` from `expires_in` when the provider omitted it.
    pub fn with_computed_expiry(mut self) -> Self {
        if self.expires_at.is_none() && self.expires_in > 0 {
            self.expires_at = Some(Utc::now().timestamp() + self.expires_in);
        }
        self
    }

    /// User derived from the provider claims carried by this session.
    pub fn claims_user(&self) -> Option<User> {
        User::from_provider_claims(&self.user)
    }

    /// The storage projection of this session.
    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expiry().unwrap_or_default(),
            expires_in: self.expires_in,
            token_type: self.token_type.clone(),
            user: self.user.clone(),
        }
    }
}

impl From<PersistedSession> for Session {
    fn from(persisted: PersistedSession) -> Self {
        Self {
            access_token: persisted.access_token,
            refresh_token: persisted.refresh_token,
            expires_at: (persisted.expires_at > 0).then_some(persisted.expires_at),
            expires_in: persisted.expires_in,
            token_type: persisted.token_type,
            user: persisted.user,
        }
    }
}

/// Decode the `exp` claim (unix seconds) of a JWT without verifying it.
pub fn token_expiry(token: &str) -> AuthResult<i64> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(AuthError::MalformedToken(
                "expected three dot-separated segments".to_string(),
            ))
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {e}")))?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not JSON: {e}")))?;

    match claims.get("exp") {
        Some(exp) => exp
            .as_i64()
            .or_else(|| exp.as_f64().map(|f| f as i64))
            .ok_or_else(|| AuthError::MalformedToken("exp claim is not a number".to_string())),
        None => Err(AuthError::MalformedToken("missing exp claim".to_string())),
    }
}
