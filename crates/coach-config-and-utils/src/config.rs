//! Configuration management for the client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default backend API URL (can be overridden at compile time via COACH_API_URL env var).
pub const DEFAULT_API_URL: &str = match option_env!("COACH_API_URL") {
    Some(url) => url,
    None => "http://localhost:5000/api",
};

/// Default Supabase URL (can be overridden at compile time via SUPABASE_URL env var).
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("SUPABASE_URL") {
    Some(url) => url,
    None => "https://random.supabase.co",
};

/// Default Supabase publishable key (can be overridden at compile time via SUPABASE_PUBLISHABLE_KEY env var).
pub const DEFAULT_SUPABASE_PUBLISHABLE_KEY: &str = match option_env!("SUPABASE_PUBLISHABLE_KEY") {
    Some(key) => key,
    None => "random-key",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Timeouts and intervals used by the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthTimings {
    /// Timeout for the "who am I" validation call during startup.
    pub whoami_timeout_ms: u64,
    /// Timeout for asking the identity provider for its session during startup.
    pub provider_session_timeout_ms: u64,
    /// Upper bound on how long startup may stay in the loading phase.
    pub startup_safety_ms: u64,
    /// Window after an identity-provider event during which new events are dropped.
    pub event_cooldown_ms: u64,
    /// Interval of the speculative background refresh.
    pub proactive_refresh_secs: u64,
    /// Tokens expiring within this many seconds are refreshed before use.
    pub expiry_skew_secs: u64,
}

impl Default for AuthTimings {
    fn default() -> Self {
        Self {
            whoami_timeout_ms: 3_000,
            provider_session_timeout_ms: 2_000,
            startup_safety_ms: 5_000,
            event_cooldown_ms: 300,
            proactive_refresh_secs: 15 * 60,
            expiry_skew_secs: 30,
        }
    }
}

impl AuthTimings {
    pub fn whoami_timeout(&self) -> Duration {
        Duration::from_millis(self.whoami_timeout_ms)
    }

    pub fn provider_session_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_session_timeout_ms)
    }

    pub fn startup_safety(&self) -> Duration {
        Duration::from_millis(self.startup_safety_ms)
    }

    pub fn event_cooldown(&self) -> Duration {
        Duration::from_millis(self.event_cooldown_ms)
    }

    pub fn proactive_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.proactive_refresh_secs)
    }
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the coaching backend REST API.
    #[serde(default = "default_api_url")]
    pub api_base_url: String,
    /// Supabase project URL.
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    /// Supabase publishable API key (public, safe to expose).
    #[serde(default = "default_supabase_publishable_key")]
    pub supabase_publishable_key: String,
    /// Paths that bootstrap identity and must never be refreshed-and-retried.
    #[serde(default = "default_bootstrap_paths")]
    pub bootstrap_paths: Vec<String>,
    /// Session lifecycle timings.
    #[serde(default)]
    pub auth: AuthTimings,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_supabase_publishable_key() -> String {
    DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string()
}

fn default_bootstrap_paths() -> Vec<String> {
    vec!["/auth/me".to_string(), "/auth/login".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_url(),
            supabase_url: default_supabase_url(),
            supabase_publishable_key: default_supabase_publishable_key(),
            bootstrap_paths: default_bootstrap_paths(),
            auth: AuthTimings::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    ///
    /// Environment variables are applied last.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Some(log_level) = env_non_empty("COACH_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(api_url) = env_non_empty("COACH_API_URL") {
            self.api_base_url = api_url;
        }
    }

    /// Reject configurations the client cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        self.api_base_url()?;
        self.supabase_url()?;
        if self.auth.expiry_skew_secs >= self.auth.proactive_refresh_secs {
            return Err(CoreError::Config(
                "auth.expiry_skew_secs must be smaller than auth.proactive_refresh_secs".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the backend API URL as a parsed URL.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_base_url).map_err(CoreError::from)
    }

    /// Get the Supabase URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(CoreError::from)
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
