//! File-backed storage.
//!
//! All keys live in one JSON object. Writes go to a sibling temp file that is
//! renamed over the original, so a crash never leaves a half-written store.

use crate::{StorageBackend, StorageError, StorageResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

type Entries = BTreeMap<String, String>;

/// JSON-file storage backend.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    /// Create a storage backed by `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> StorageResult<Entries> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Entries::new()),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| StorageError::Encoding(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn write_entries(&self, entries: &Entries) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json =
            serde_json::to_string_pretty(entries).map_err(|e| StorageError::Encoding(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn locked<T>(&self, f: impl FnOnce() -> StorageResult<T>) -> StorageResult<T> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StorageError::Backend("file storage lock poisoned".to_string()))?;
        f()
    }
}

impl StorageBackend for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.locked(|| {
            let mut entries = self.read_entries()?;
            entries.insert(key.to_string(), value.to_string());
            self.write_entries(&entries)?;
            debug!(key = %key, "stored value");
            Ok(())
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.locked(|| Ok(self.read_entries()?.get(key).cloned()))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.locked(|| {
            let mut entries = self.read_entries()?;
            let existed = entries.remove(key).is_some();
            if existed {
                self.write_entries(&entries)?;
            }
            Ok(existed)
        })
    }
}
