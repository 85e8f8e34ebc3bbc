//! Authentication error types.

use crate::interceptor::ApiError;
use crate::provider::ProviderError;
use thiserror::Error;

/// Outcome of a failed refresh cycle, shared by every queued caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The identity provider rejected the refresh token itself.
    #[error("Session expired: {0}")]
    Terminal(String),

    /// Network or unknown failure; the refresh token is kept.
    #[error("Token refresh failed: {0}")]
    Transient(String),

    /// No refresh token anywhere, nothing can be recovered.
    #[error("No session to refresh")]
    NoSession,

    /// Pending refresh abandoned because the user logged out.
    #[error("User logged out")]
    LoggedOut,
}

impl RefreshError {
    /// Returns true if the session cannot be recovered without signing in again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RefreshError::Terminal(_) | RefreshError::NoSession)
    }
}

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Invalid email or password
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Access token could not be parsed for its expiry claim
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Neither the backend nor the provider could describe the user
    #[error("Could not resolve user: {0}")]
    UserUnavailable(String),

    /// Backend API error
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Identity provider error
    #[error("Identity provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Refresh cycle error
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// Invalid state transition in the lifecycle FSM
    #[error("Invalid lifecycle state transition: {0}")]
    InvalidStateTransition(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Timeout => true,
            AuthError::Provider(e) => e.is_transient(),
            AuthError::Refresh(RefreshError::Transient(_)) => true,
            AuthError::Api(ApiError::Transport(_)) => true,
            AuthError::Api(ApiError::Status { status, .. }) => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
