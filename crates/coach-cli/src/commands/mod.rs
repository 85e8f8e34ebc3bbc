//! CLI command implementations.
//!
//! [`App`] is the composition root: every command gets the same wired-up
//! store, provider, reconciler, and lifecycle controller.

mod api;
mod auth;

pub use api::{request, watch};
pub use auth::{login, logout, refresh, register, status, token};

use anyhow::{Context, Result};
use coach_auth::{
    AuthPhase, AuthenticatedClient, IdentityApi, Navigator, ReqwestTransport,
    SessionLifecycleController, SupabaseIdentityProvider, TokenReconciler, LOGIN_ROUTE,
};
use coach_config_and_utils::{init_logging, Config, Paths};
use coach_storage::{create_session_store, MemoryStorage, SessionStore};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Navigator for a terminal: there are no screens, so navigating to the
/// login route just tells the user to sign in again.
pub struct CliNavigator {
    route: Mutex<String>,
}

impl CliNavigator {
    fn new() -> Self {
        Self {
            route: Mutex::new("/".to_string()),
        }
    }
}

impl Navigator for CliNavigator {
    fn current_route(&self) -> String {
        self.route.lock().clone()
    }

    fn navigate(&self, route: &str) {
        info!(route = %route, "navigating");
        *self.route.lock() = route.to_string();
        if route == LOGIN_ROUTE {
            eprintln!("Session ended. Run 'coach login' to sign in again.");
        }
    }
}

/// Everything a command needs, wired once per process.
pub struct App {
    pub config: Config,
    pub store: Arc<SessionStore>,
    pub reconciler: TokenReconciler,
    pub controller: SessionLifecycleController,
    transport: Arc<ReqwestTransport>,
}

impl App {
    pub fn build(ephemeral: bool, log_level: Option<&str>) -> Result<Self> {
        let paths = Paths::new().context("Failed to resolve the Coachdesk directory")?;
        let config = Config::load(&paths).context("Failed to load configuration")?;

        init_logging(log_level.unwrap_or(&config.log_level));
        debug!(ephemeral, api = %config.api_base_url, "starting coach cli");

        let store = if ephemeral {
            SessionStore::new(Box::new(MemoryStorage::new()))
        } else {
            paths.ensure_dirs()?;
            create_session_store(&paths)
        };
        let store = Arc::new(store);

        let supabase_url = config.supabase_url()?;
        let provider = Arc::new(SupabaseIdentityProvider::new(
            supabase_url.as_str(),
            &config.supabase_publishable_key,
        ));
        let transport = Arc::new(ReqwestTransport::new(config.api_base_url()?));

        let reconciler = TokenReconciler::new(provider.clone(), store.clone());
        let controller = SessionLifecycleController::new(
            reconciler.clone(),
            provider,
            store.clone(),
            IdentityApi::new(transport.clone()),
            Arc::new(CliNavigator::new()),
            config.auth.clone(),
        );

        Ok(Self {
            config,
            store,
            reconciler,
            controller,
            transport,
        })
    }

    /// API client that attaches and refreshes tokens through the controller.
    pub fn client(&self) -> AuthenticatedClient {
        AuthenticatedClient::new(self.transport.clone(), Arc::new(self.controller.clone()))
            .with_bootstrap_paths(self.config.bootstrap_paths.clone())
    }
}

/// JSON and text renderings of a phase.
fn describe_phase(phase: &AuthPhase) -> (Value, String) {
    match phase {
        AuthPhase::Loading => (json!({ "phase": "loading" }), "Auth:     loading".to_string()),
        AuthPhase::Unauthenticated => (
            json!({ "phase": "unauthenticated", "logged_in": false }),
            "Auth:     not logged in".to_string(),
        ),
        AuthPhase::Authenticated(user) => {
            let label = user.email.as_deref().unwrap_or(user.id.as_str());
            (
                json!({ "phase": "authenticated", "logged_in": true, "user": user }),
                format!("Auth:     logged in as {}", label),
            )
        }
    }
}
