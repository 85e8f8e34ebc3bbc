//! Session and token reconciliation for the Coachdesk client.
//!
//! This crate provides:
//! - The identity provider capability interface and a Supabase implementation
//! - Single-flight token refresh across provider, storage, and forced refresh
//! - An HTTP client that recovers from 401 with exactly one retry
//! - Session lifecycle management with an explicit FSM

mod error;
mod identity_api;
mod interceptor;
mod lifecycle;
mod lifecycle_fsm;
mod provider;
mod reconciler;
mod session;
mod supabase;

#[cfg(test)]
mod tests;

pub use error::{AuthError, AuthResult, RefreshError};
pub use identity_api::{
    AuthResponse, IdentityApi, RegisterRequest, LOGIN_PATH, REGISTER_PATH, WHO_AM_I_PATH,
};
pub use interceptor::{
    ApiError, ApiRequest, ApiResponse, AuthenticatedClient, HttpTransport, ReqwestTransport,
    TokenSource, TransportError, DEFAULT_BOOTSTRAP_PATHS,
};
pub use lifecycle::{
    LifecycleGuard, LogoutOptions, Navigator, SessionLifecycleController, LOGIN_ROUTE,
};
pub use lifecycle_fsm::lifecycle_machine;
pub use lifecycle_fsm::{AuthPhase, LifecycleInput, LifecycleMachine, LifecycleState};
pub use provider::{
    IdentityProvider, ProviderError, SessionEvent, SessionEventHub, SessionEventKind,
    Subscription,
};
pub use reconciler::{LogoutFuture, TerminalFailureCallback, TokenReconciler};
pub use session::{token_expiry, Session, User};
pub use supabase::SupabaseIdentityProvider;
pub use reqwest::Method;
