//! Identity provider capability interface and session-change events.

use crate::session::Session;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Provider error codes that mean the refresh token itself is unusable.
const INVALID_REFRESH_CODES: [&str; 3] = [
    "refresh_token_not_found",
    "refresh_token_already_used",
    "session_not_found",
];

/// Identity provider error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider answered with an error
    #[error("Identity provider rejected the request (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// HTTP 429
    #[error("Identity provider rate limit reached")]
    RateLimited,

    /// Request never completed
    #[error("Network error: {0}")]
    Network(String),

    /// Response could not be understood
    #[error("Unexpected identity provider response: {0}")]
    InvalidResponse(String),

    /// The operation needs a session and there is none
    #[error("No active session")]
    NoSession,
}

impl ProviderError {
    /// Returns true if the provider reported the refresh token as invalid,
    /// expired, not found, or already used.
    pub fn is_refresh_token_invalid(&self) -> bool {
        match self {
            ProviderError::Api { code, message, .. } => {
                code.as_deref()
                    .is_some_and(|c| INVALID_REFRESH_CODES.contains(&c))
                    || message_rejects_refresh_token(message)
            }
            _ => false,
        }
    }

    /// Returns true if a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited | ProviderError::Network(_) => true,
            ProviderError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

fn message_rejects_refresh_token(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("refresh token")
        && ["invalid", "expired", "not found", "already used"]
            .iter()
            .any(|needle| message.contains(needle))
}

/// Kind of session change pushed by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    SignedIn,
    TokenRefreshed,
    SignedOut,
    InitialSession,
}

/// A session change and the session after it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    pub session: Option<Session>,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }
}

/// The identity provider operations the session core depends on.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The provider's current session, if it holds one.
    async fn current_session(&self) -> Result<Option<Session>, ProviderError>;

    /// Make the provider adopt an existing token pair.
    async fn establish_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Session, ProviderError>;

    /// Mint a new session from a refresh token.
    async fn force_refresh(&self, refresh_token: &str) -> Result<Session, ProviderError>;

    /// Best-effort provider sign-out.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Drop the held session if its access token is `access_token`.
    /// Local only: no request is made and no event is emitted.
    fn discard_session(&self, access_token: &str);

    /// Listen for session changes. Dropping the subscription unregisters it.
    fn subscribe(&self) -> Subscription;
}

type Listener = (u64, mpsc::UnboundedSender<SessionEvent>);

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

/// Fan-out of session events to registered listeners.
#[derive(Clone, Default)]
pub struct SessionEventHub {
    inner: Arc<HubInner>,
}

impl SessionEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. `INITIAL_SESSION` with `current` is queued first.
    pub fn subscribe(&self, current: Option<Session>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = tx.send(SessionEvent::new(SessionEventKind::InitialSession, current));
        self.inner.listeners.lock().push((id, tx));
        debug!(listener_id = id, "session listener registered");

        Subscription {
            id,
            hub: Arc::downgrade(&self.inner),
            receiver: rx,
        }
    }

    /// Deliver an event to every live listener.
    pub fn emit(&self, event: SessionEvent) {
        let mut listeners = self.inner.listeners.lock();
        listeners.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        debug!(kind = ?event.kind, listeners = listeners.len(), "session event emitted");
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

/// A registered session listener.
pub struct Subscription {
    id: u64,
    hub: Weak<HubInner>,
    receiver: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Subscription {
    /// Next event; `None` once the provider is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.listeners.lock().retain(|(id, _)| *id != self.id);
            debug!(listener_id = self.id, "session listener released");
        }
    }
}
