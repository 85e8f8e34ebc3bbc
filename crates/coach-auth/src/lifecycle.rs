//! Session lifecycle: startup check, provider events, proactive refresh,
//! logout, and the token hand-out used by the HTTP client.
//!
//! Timeouts here are races. The raced call runs in its own task; when the
//! timer wins, the task keeps running and its result is dropped.

use crate::error::RefreshError;
use crate::identity_api::{AuthResponse, IdentityApi, RegisterRequest};
use crate::interceptor::{ApiError, TokenSource};
use crate::lifecycle_fsm::{AuthPhase, LifecycleInput, LifecycleMachine, LifecycleState};
use crate::provider::{IdentityProvider, SessionEvent, SessionEventKind};
use crate::reconciler::{LogoutFuture, TokenReconciler};
use crate::session::{token_expiry, Session, User};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use chrono::Utc;
use coach_config_and_utils::AuthTimings;
use coach_storage::SessionStore;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Unauthenticated entry point.
pub const LOGIN_ROUTE: &str = "/login";

/// Where the application currently is, and how to move it.
pub trait Navigator: Send + Sync {
    fn current_route(&self) -> String;
    fn navigate(&self, route: &str);
}

/// Options for [`SessionLifecycleController::logout`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogoutOptions {
    /// Skip the provider sign-out call when the provider session is already gone.
    pub skip_provider_sign_out: bool,
}

/// Owns the background tasks started by [`SessionLifecycleController::start`].
///
/// Dropping the guard stops both tasks and releases the provider subscription.
pub struct LifecycleGuard {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[derive(Default)]
struct EventGate {
    processing: bool,
    cooldown_until: Option<Instant>,
}

struct ControllerInner {
    reconciler: TokenReconciler,
    provider: Arc<dyn IdentityProvider>,
    store: Arc<SessionStore>,
    identity: IdentityApi,
    navigator: Arc<dyn Navigator>,
    timings: AuthTimings,
    fsm: Mutex<LifecycleMachine>,
    user: Mutex<Option<User>>,
    phase_tx: watch::Sender<AuthPhase>,
    /// Set once logout ran; cleared by the next established session.
    logged_out: AtomicBool,
    /// Bumped on every login and logout so stale startup results are ignored.
    auth_epoch: AtomicU64,
    events: Mutex<EventGate>,
}

/// Bootstraps, observes, and maintains the session for the app's lifetime.
#[derive(Clone)]
pub struct SessionLifecycleController {
    inner: Arc<ControllerInner>,
}

async fn race<T, F>(limit: Duration, operation: F) -> Option<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let task = tokio::spawn(operation);
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(error = %e, "raced task failed");
            None
        }
        Err(_) => None,
    }
}

impl SessionLifecycleController {
    /// Create a controller and register it as the reconciler's logout hook.
    pub fn new(
        reconciler: TokenReconciler,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<SessionStore>,
        identity: IdentityApi,
        navigator: Arc<dyn Navigator>,
        timings: AuthTimings,
    ) -> Self {
        let (phase_tx, _) = watch::channel(AuthPhase::Loading);
        let controller = Self {
            inner: Arc::new(ControllerInner {
                reconciler,
                provider,
                store,
                identity,
                navigator,
                timings,
                fsm: Mutex::new(LifecycleMachine::new()),
                user: Mutex::new(None),
                phase_tx,
                logged_out: AtomicBool::new(false),
                auth_epoch: AtomicU64::new(0),
                events: Mutex::new(EventGate::default()),
            }),
        };

        let weak = Arc::downgrade(&controller.inner);
        controller
            .inner
            .reconciler
            .set_terminal_failure_callback(Arc::new(move |options: LogoutOptions| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        SessionLifecycleController { inner }.logout(options).await;
                    }
                }) as LogoutFuture
            }));

        controller
    }

    pub fn phase(&self) -> AuthPhase {
        self.inner.phase_tx.borrow().clone()
    }

    /// Receive every phase change.
    pub fn subscribe_phase(&self) -> watch::Receiver<AuthPhase> {
        self.inner.phase_tx.subscribe()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.user.lock().clone()
    }

    pub fn reconciler(&self) -> &TokenReconciler {
        &self.inner.reconciler
    }

    /// Apply a lifecycle input. The user is only replaced when the input is accepted.
    fn transition(&self, input: LifecycleInput, user: Option<User>) -> AuthResult<AuthPhase> {
        let mut fsm = self.inner.fsm.lock();
        let from = fsm.state().clone();
        if fsm.consume(&input).is_err() {
            return Err(AuthError::InvalidStateTransition(format!(
                "Cannot apply {input:?} in state {from:?}"
            )));
        }
        let to = fsm.state().clone();

        let phase = {
            let mut current = self.inner.user.lock();
            match &to {
                LifecycleState::Authenticated => {
                    if user.is_some() {
                        *current = user;
                    }
                }
                _ => *current = None,
            }
            AuthPhase::from_state(&to, current.clone())
        };
        self.inner.phase_tx.send_replace(phase.clone());
        drop(fsm);

        if from != to {
            info!(old_state = ?from, new_state = ?to, "Auth lifecycle transition");
        }
        Ok(phase)
    }

    /// Record a freshly established session for `user`.
    fn establish(&self, user: User) -> AuthResult<AuthPhase> {
        self.inner.auth_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.logged_out.store(false, Ordering::SeqCst);
        self.transition(LifecycleInput::SessionEstablished, Some(user))
    }

    /// Run the startup check and settle the loading phase.
    ///
    /// Returns once startup finished or the safety timer fired, whichever is
    /// first. A startup that finishes after the timer is still applied.
    pub async fn initialize(&self) -> AuthPhase {
        let epoch = self.inner.auth_epoch.load(Ordering::SeqCst);
        let this = self.clone();
        let mut startup = tokio::spawn(async move { this.startup_check().await });

        let safety = self.inner.timings.startup_safety();
        match tokio::time::timeout(safety, &mut startup).await {
            Ok(result) => self.finish_startup(epoch, result.ok().flatten()),
            Err(_) => {
                warn!(
                    event_code = "auth.startup_timeout",
                    timeout_ms = safety.as_millis() as u64,
                    "startup check still running, continuing unauthenticated"
                );
                if let Err(e) = self.transition(LifecycleInput::SafetyTimeout, None) {
                    debug!(error = %e, "safety timer fired after startup settled");
                }
                let this = self.clone();
                tokio::spawn(async move {
                    if let Ok(user) = startup.await {
                        this.finish_startup(epoch, user);
                    }
                });
            }
        }

        self.phase()
    }

    fn finish_startup(&self, epoch: u64, user: Option<User>) {
        if self.inner.auth_epoch.load(Ordering::SeqCst) != epoch {
            debug!("session changed during startup, ignoring startup result");
            return;
        }

        let result = match user {
            Some(user) => {
                info!(user_id = %user.id, "session restored on startup");
                self.inner.logged_out.store(false, Ordering::SeqCst);
                self.transition(LifecycleInput::StartupSucceeded, Some(user))
            }
            None => {
                info!("no usable session on startup");
                self.inner.store.clear_all();
                self.transition(LifecycleInput::StartupFailed, None)
            }
        };
        if let Err(e) = result {
            debug!(error = %e, "startup result not applied");
        }
    }

    async fn startup_check(&self) -> Option<User> {
        let timings = &self.inner.timings;

        if let Some(token) = self.inner.store.access_token() {
            match self.who_am_i_within(&token).await {
                Ok(user) => return Some(user),
                Err(e) => debug!(error = %e, "stored access token not accepted"),
            }
        }

        let provider = Arc::clone(&self.inner.provider);
        let lookup = race(timings.provider_session_timeout(), async move {
            provider.current_session().await
        })
        .await;

        match lookup {
            Some(Ok(Some(session))) if session.is_complete() => {
                match self.who_am_i_within(&session.access_token).await {
                    Ok(user) => {
                        self.inner.reconciler.adopt_session(&session);
                        return Some(user);
                    }
                    Err(e) => debug!(error = %e, "provider session not accepted by backend"),
                }
            }
            Some(Ok(_)) => debug!("identity provider has no session"),
            Some(Err(e)) => debug!(error = %e, "identity provider session lookup failed"),
            None => debug!("identity provider session lookup timed out"),
        }
        None
    }

    async fn who_am_i_within(&self, access_token: &str) -> AuthResult<User> {
        let identity = self.inner.identity.clone();
        let token = access_token.to_string();
        let limit = self.inner.timings.whoami_timeout();
        match race(limit, async move { identity.who_am_i(&token).await }).await {
            Some(result) => result.map_err(AuthError::from),
            None => Err(AuthError::Timeout),
        }
    }

    /// Resolve the user for a session: backend first, provider claims as fallback.
    async fn resolve_user(&self, session: &Session) -> AuthResult<User> {
        let claims = session.claims_user();
        match self.who_am_i_within(&session.access_token).await {
            Ok(user) => {
                if let Some(claims) = &claims {
                    flag_role_mismatch(&user, claims);
                }
                Ok(user)
            }
            Err(AuthError::Api(e)) if e.is_unauthorized() => Err(AuthError::Api(e)),
            Err(e) => match claims {
                Some(user) => {
                    warn!(error = %e, user_id = %user.id, "who-am-I failed, using provider claims");
                    Ok(user)
                }
                None => Err(AuthError::UserUnavailable(e.to_string())),
            },
        }
    }

    /// Start listening to provider events and the proactive refresh timer.
    pub fn start(&self) -> LifecycleGuard {
        let mut subscription = self.inner.provider.subscribe();
        let this = self.clone();
        let listener = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                this.handle_event(event).await;
            }
            debug!("session event stream closed");
        });

        let this = self.clone();
        let period = self.inner.timings.proactive_refresh_interval();
        let refresher = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                this.proactive_refresh().await;
            }
        });

        LifecycleGuard {
            tasks: vec![listener, refresher],
        }
    }

    fn begin_event(&self) -> bool {
        let mut gate = self.inner.events.lock();
        let cooling = gate
            .cooldown_until
            .is_some_and(|until| Instant::now() < until);
        if gate.processing || cooling {
            return false;
        }
        gate.processing = true;
        true
    }

    fn end_event(&self) {
        let mut gate = self.inner.events.lock();
        gate.processing = false;
        gate.cooldown_until = Some(Instant::now() + self.inner.timings.event_cooldown());
    }

    /// React to one provider event.
    pub async fn handle_event(&self, event: SessionEvent) {
        match event.kind {
            SessionEventKind::SignedOut | SessionEventKind::InitialSession => {
                debug!(kind = ?event.kind, "ignoring session event");
                return;
            }
            SessionEventKind::SignedIn | SessionEventKind::TokenRefreshed => {}
        }

        let Some(session) = event.session.filter(Session::is_complete) else {
            return;
        };
        if self.inner.logged_out.load(Ordering::SeqCst) {
            debug!(kind = ?event.kind, "ignoring session event after logout");
            return;
        }
        if !self.begin_event() {
            debug!(kind = ?event.kind, "dropping session event during processing");
            return;
        }

        let epoch = self.inner.auth_epoch.load(Ordering::SeqCst);
        match self.resolve_user(&session).await {
            Ok(user) => self.apply_event_session(epoch, &session, user),
            Err(e) => warn!(error = %e, kind = ?event.kind, "could not resolve user for session event"),
        }

        self.end_event();
    }

    /// Adopt an event's session unless a login or logout happened while its
    /// user was being resolved.
    fn apply_event_session(&self, epoch: u64, session: &Session, user: User) {
        if self.inner.logged_out.load(Ordering::SeqCst)
            || self.inner.auth_epoch.load(Ordering::SeqCst) != epoch
        {
            debug!("session changed while resolving event user, ignoring event");
            return;
        }
        self.inner.reconciler.adopt_session(session);
        if let Err(e) = self.establish(user) {
            debug!(error = %e, "session event not applied");
        }
    }

    /// Speculative refresh; failures are left to the 401 path.
    pub async fn proactive_refresh(&self) {
        if !self.phase().is_authenticated() {
            return;
        }
        match self.inner.reconciler.refresh().await {
            Ok(_) => debug!("proactive refresh succeeded"),
            Err(e) => debug!(error = %e, "proactive refresh failed"),
        }
    }

    /// Log out locally. Repeated calls are no-ops until a new session exists.
    pub async fn logout(&self, options: LogoutOptions) {
        if self.inner.logged_out.swap(true, Ordering::SeqCst) {
            debug!("already logged out");
            return;
        }
        info!(
            skip_provider_sign_out = options.skip_provider_sign_out,
            "logging out"
        );

        self.inner.auth_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.reconciler.reject_pending(RefreshError::LoggedOut);
        self.inner.reconciler.clear_session();
        self.inner.store.clear_all();
        if let Err(e) = self.transition(LifecycleInput::LoggedOut, None) {
            debug!(error = %e, "logout transition rejected");
        }

        if !options.skip_provider_sign_out {
            if let Err(e) = self.inner.provider.sign_out().await {
                warn!(error = %e, "identity provider sign-out failed");
            }
        }

        if self.inner.navigator.current_route() != LOGIN_ROUTE {
            self.inner.navigator.navigate(LOGIN_ROUTE);
        }
    }

    /// The access token to attach to a request, refreshed first when it
    /// expires within the configured skew or cannot be read.
    pub async fn current_token(&self) -> Option<String> {
        let token = self.inner.reconciler.current_access_token()?;
        let skew = self.inner.timings.expiry_skew_secs as i64;

        let fresh = match token_expiry(&token) {
            Ok(expires_at) => expires_at - Utc::now().timestamp() > skew,
            Err(e) => {
                debug!(error = %e, "access token unreadable, refreshing");
                false
            }
        };
        if fresh {
            return Some(token);
        }

        match self.inner.reconciler.refresh().await {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(error = %e, "refresh before use failed");
                None
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> AuthResult<User> {
        let response = self
            .inner
            .identity
            .login(email, password)
            .await
            .map_err(|e| match e {
                ApiError::Unauthorized { .. } => AuthError::InvalidCredentials,
                other => AuthError::Api(other),
            })?;
        self.complete_sign_in(response).await
    }

    pub async fn register(&self, registration: &RegisterRequest) -> AuthResult<User> {
        let response = self.inner.identity.register(registration).await?;
        self.complete_sign_in(response).await
    }

    async fn complete_sign_in(&self, response: AuthResponse) -> AuthResult<User> {
        let AuthResponse { user, session } = response;
        let session = session.with_computed_expiry();

        let session = match self
            .inner
            .provider
            .establish_session(&session.access_token, &session.refresh_token)
            .await
        {
            Ok(established) => established,
            Err(e) => {
                warn!(error = %e, "identity provider did not accept the new session");
                session
            }
        };

        self.inner.reconciler.adopt_session(&session);
        self.establish(user.clone())?;
        info!(user_id = %user.id, "signed in");
        Ok(user)
    }
}

fn flag_role_mismatch(backend: &User, provider: &User) {
    if let (Some(backend_role), Some(provider_role)) = (&backend.role, &provider.role) {
        if backend_role != provider_role {
            warn!(
                event_code = "auth.role_mismatch",
                user_id = %backend.id,
                backend_role = %backend_role,
                provider_role = %provider_role,
                "backend and identity provider disagree on role, using backend"
            );
        }
    }
}

#[async_trait]
impl TokenSource for SessionLifecycleController {
    async fn current_token(&self) -> Option<String> {
        SessionLifecycleController::current_token(self).await
    }

    async fn refresh_token(&self) -> Result<String, RefreshError> {
        self.inner.reconciler.refresh().await
    }
}
