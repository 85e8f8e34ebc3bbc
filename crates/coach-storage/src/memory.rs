//! In-memory storage backend.

use crate::{StorageBackend, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local storage; contents vanish with the process.
#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> StorageResult<T> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| StorageError::Backend("memory storage lock poisoned".to_string()))?;
        Ok(f(&mut data))
    }
}

impl StorageBackend for MemoryStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.with_data(|data| {
            data.insert(key.to_string(), value.to_string());
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.with_data(|data| data.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.with_data(|data| data.remove(key).is_some())
    }
}
