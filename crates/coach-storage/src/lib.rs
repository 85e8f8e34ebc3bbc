//! Session persistence for the Coachdesk client.
//!
//! Two backends are provided:
//! - **File**: a JSON object file under `~/.coach`, rewritten atomically
//! - **Memory**: process-local, for tests and ephemeral runs
//!
//! Callers should go through [`SessionStore`], which never returns an error.

mod file;
mod keys;
mod memory;
mod records;
mod store;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use records::{PersistedSession, StoredTokens, TokenPair, WrappedSessionRecord};
pub use store::SessionStore;
pub use traits::StorageBackend;

use coach_config_and_utils::Paths;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific failure
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the default file-backed storage under the given paths.
pub fn create_storage(paths: &Paths) -> Box<dyn StorageBackend> {
    Box::new(FileStorage::new(paths.session_store_file()))
}

/// Create a SessionStore with the default file-backed storage.
pub fn create_session_store(paths: &Paths) -> SessionStore {
    SessionStore::new(create_storage(paths))
}
