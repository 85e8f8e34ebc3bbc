//! Configuration, paths, and logging setup shared by the Coachdesk crates.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    AuthTimings, Config, DEFAULT_API_URL, DEFAULT_LOG_LEVEL, DEFAULT_SUPABASE_PUBLISHABLE_KEY,
    DEFAULT_SUPABASE_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_service};
pub use paths::Paths;
