//! Single-flight token reconciliation.
//!
//! A refresh cycle tries three sources in order and stops at the first
//! session it gets:
//!
//! 1. the identity provider's active session
//! 2. a complete token pair rehydrated from storage
//! 3. a forced refresh with whatever refresh token survived
//!
//! Only one cycle runs at a time. Callers arriving while it runs are queued
//! and all of them receive the same outcome, in arrival order.

use crate::error::RefreshError;
use crate::interceptor::TokenSource;
use crate::lifecycle::LogoutOptions;
use crate::provider::IdentityProvider;
use crate::session::Session;
use async_trait::async_trait;
use coach_storage::{SessionStore, TokenPair};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Future returned by the terminal-failure callback.
pub type LogoutFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Invoked after a terminal refresh failure has cleared the session.
pub type TerminalFailureCallback = Arc<dyn Fn(LogoutOptions) -> LogoutFuture + Send + Sync>;

type RefreshOutcome = Result<String, RefreshError>;

#[derive(Default)]
struct RefreshQueue {
    in_flight: bool,
    /// Bumped on logout so a cycle that started before it cannot persist.
    epoch: u64,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    session: Option<Session>,
}

impl RefreshQueue {
    fn settle(&mut self, outcome: &RefreshOutcome) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<SessionStore>,
    queue: Mutex<RefreshQueue>,
    on_terminal: Mutex<Option<TerminalFailureCallback>>,
}

/// Produces a valid access token on demand, at most one cycle at a time.
///
/// Cloning is cheap; clones share the same queue and session.
#[derive(Clone)]
pub struct TokenReconciler {
    inner: Arc<Inner>,
}

impl TokenReconciler {
    pub fn new(provider: Arc<dyn IdentityProvider>, store: Arc<SessionStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                store,
                queue: Mutex::new(RefreshQueue::default()),
                on_terminal: Mutex::new(None),
            }),
        }
    }

    /// Set the logout hook run after a terminal refresh failure.
    pub fn set_terminal_failure_callback(&self, callback: TerminalFailureCallback) {
        *self.inner.on_terminal.lock() = Some(callback);
    }

    /// Get a valid access token, joining the running cycle if there is one.
    pub async fn refresh(&self) -> RefreshOutcome {
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut queue = self.inner.queue.lock();
            queue.waiters.push(tx);
            if queue.in_flight {
                debug!(waiters = queue.waiters.len(), "refresh in flight, queued");
                false
            } else {
                queue.in_flight = true;
                true
            }
        };

        if start {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run_cycle().await });
        }

        rx.await
            .unwrap_or_else(|_| Err(RefreshError::Transient("refresh cycle aborted".to_string())))
    }

    /// Whether a cycle is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.inner.queue.lock().in_flight
    }

    /// Reject every queued caller. A running cycle finishes but cannot
    /// persist its result.
    pub fn reject_pending(&self, reason: RefreshError) {
        let mut queue = self.inner.queue.lock();
        queue.epoch += 1;
        let pending = queue.waiters.len();
        queue.settle(&Err(reason));
        if pending > 0 {
            debug!(pending, "rejected pending refresh waiters");
        }
    }

    /// Persist a session obtained elsewhere (login, provider event) and hold it.
    pub fn adopt_session(&self, session: &Session) {
        self.inner.store.persist_session(&session.to_persisted());
        self.inner.queue.lock().session = Some(session.clone());
    }

    /// Forget the in-memory session. Storage is untouched.
    pub fn clear_session(&self) {
        self.inner.queue.lock().session = None;
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.queue.lock().session.clone()
    }

    /// Access token from memory, else the bare stored one.
    pub fn current_access_token(&self) -> Option<String> {
        let in_memory = self
            .inner
            .queue
            .lock()
            .session
            .as_ref()
            .map(|s| s.access_token.clone())
            .filter(|t| !t.trim().is_empty());
        in_memory.or_else(|| self.inner.store.access_token())
    }
}

/// Resets the queue if a cycle task unwinds before settling.
struct CycleGuard<'a> {
    inner: &'a Inner,
    settled: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let mut queue = self.inner.queue.lock();
            queue.in_flight = false;
            queue.settle(&Err(RefreshError::Transient(
                "refresh cycle aborted".to_string(),
            )));
        }
    }
}

impl Inner {
    async fn run_cycle(&self) {
        let mut guard = CycleGuard {
            inner: self,
            settled: false,
        };
        let epoch = self.queue.lock().epoch;

        match self.reconcile().await {
            Ok(session) => self.complete_success(epoch, session),
            Err(e) if e.is_terminal() => self.complete_terminal(e).await,
            Err(e) => self.complete_transient(e),
        }
        guard.settled = true;
    }

    async fn reconcile(&self) -> Result<Session, RefreshError> {
        match self.provider.current_session().await {
            Ok(Some(session)) if !session.access_token.trim().is_empty() => {
                debug!("using active provider session");
                return Ok(session);
            }
            Ok(_) => debug!("no active provider session"),
            Err(e) => debug!(error = %e, "provider session lookup failed"),
        }

        let pair = self.store.read_tokens().resolve();
        if let TokenPair::Complete {
            access_token,
            refresh_token,
        } = &pair
        {
            match self
                .provider
                .establish_session(access_token, refresh_token)
                .await
            {
                Ok(session) => {
                    debug!("rehydrated session from storage");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(error = %e, "stored session rejected, falling back to refresh");
                    self.store.discard_rejected_session(refresh_token);
                }
            }
        }

        let Some(refresh_token) = pair.refresh_token() else {
            debug!("no refresh token available");
            return Err(RefreshError::NoSession);
        };

        self.provider
            .force_refresh(refresh_token)
            .await
            .map_err(|e| {
                if e.is_refresh_token_invalid() {
                    RefreshError::Terminal(e.to_string())
                } else {
                    RefreshError::Transient(e.to_string())
                }
            })
    }

    fn complete_success(&self, epoch: u64, session: Session) {
        let mut queue = self.queue.lock();
        if queue.epoch != epoch {
            debug!("discarding refresh result after logout");
            self.provider.discard_session(&session.access_token);
            queue.in_flight = false;
            queue.settle(&Err(RefreshError::LoggedOut));
            return;
        }

        queue.in_flight = false;
        self.store.persist_session(&session.to_persisted());
        let token = session.access_token.clone();
        queue.session = Some(session);
        let waiters = queue.waiters.len();
        queue.settle(&Ok(token));
        info!(waiters, "token refresh succeeded");
    }

    async fn complete_terminal(&self, error: RefreshError) {
        warn!(
            event_code = "auth.refresh_terminal",
            error = %error,
            "session unrecoverable, logging out"
        );
        let mut waiters = {
            let mut queue = self.queue.lock();
            queue.session = None;
            std::mem::take(&mut queue.waiters)
        };
        self.store.clear_all();

        let callback = self.on_terminal.lock().clone();
        if let Some(callback) = callback {
            callback(LogoutOptions {
                skip_provider_sign_out: true,
            })
            .await;
        }

        let mut queue = self.queue.lock();
        queue.in_flight = false;
        waiters.append(&mut queue.waiters);
        let outcome = Err(error);
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn complete_transient(&self, error: RefreshError) {
        warn!(error = %error, "token refresh failed, keeping refresh token");
        self.store.clear_access_token();

        let mut queue = self.queue.lock();
        queue.in_flight = false;
        if let Some(session) = queue.session.as_mut() {
            session.access_token.clear();
        }
        queue.settle(&Err(error));
    }
}

#[async_trait]
impl TokenSource for TokenReconciler {
    async fn current_token(&self) -> Option<String> {
        self.current_access_token()
    }

    async fn refresh_token(&self) -> Result<String, RefreshError> {
        self.refresh().await
    }
}
