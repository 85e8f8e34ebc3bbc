//! Logging initialization.
//!
//! Thin wrapper over the observability crate. Every process writes structured
//! JSONL to `~/.coach/logs/dev.jsonl`, with the mode picked from
//! `COACH_OBS_MODE`.

use observability::{LogConfig, ObservabilityMode};

/// Initialize the logging system for the default `coach` service.
///
/// # Example
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("client started");
/// ```
pub fn init_logging(level: &str) {
    init_logging_for_service("coach", level);
}

/// Initialize logging with a custom service name.
pub fn init_logging_for_service(service_name: &str, level: &str) {
    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: level.into(),
        also_stderr: std::env::var("COACH_LOG_STDERR").is_ok(),
        mode: observability_mode_from_env(),
        ..Default::default()
    });
}

fn observability_mode_from_env() -> ObservabilityMode {
    match std::env::var("COACH_OBS_MODE")
        .unwrap_or_else(|_| "dev".to_string())
        .to_ascii_lowercase()
        .as_str()
    {
        "prod" | "production" => ObservabilityMode::ProdMetadataOnly,
        _ => ObservabilityMode::DevVerbose,
    }
}
