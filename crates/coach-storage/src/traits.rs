//! Storage trait definitions.

use crate::StorageResult;

/// A string-keyed, string-valued persistence backend.
///
/// Backends may fail on any call; [`crate::SessionStore`] is the layer that
/// turns those failures into sentinels.
pub trait StorageBackend: Send + Sync {
    /// Store a value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value, returning whether it existed
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
