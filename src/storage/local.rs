//! Local durable key→string store.
//!
//! The engine treats local persistence as a flat key→string map (the shape of
//! web localStorage, which the original deployment used). Writes are
//! synchronous and write-through: a value is durable before the caller's
//! next step runs. Corrupt or missing values always decode to defaults —
//! the local store never aborts an operation at read time.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::error::LocalStoreError;

// ============================================================================
// LocalStore
// ============================================================================

pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError>;
    fn remove(&self, key: &str) -> Result<(), LocalStoreError>;
}

/// Read a JSON value from the store, falling back to `T::default()` on
/// absence, read failure, or corruption. Fallbacks are logged, never raised.
pub fn read_json_or_default<T: DeserializeOwned + Default>(store: &dyn LocalStore, key: &str) -> T {
    match store.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "corrupt local value, using default");
                T::default()
            }
        },
        Ok(None) => T::default(),
        Err(e) => {
            tracing::warn!(key, error = %e, "local read failed, using default");
            T::default()
        }
    }
}

// ============================================================================
// StoreKeys
// ============================================================================

/// Namespaced key set for everything the engine persists locally.
#[derive(Debug, Clone)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}.{suffix}", self.prefix)
    }

    /// Full catalog snapshot — the single source of truth for what the user sees.
    pub fn suppliers(&self) -> String {
        self.key("suppliers")
    }

    pub fn last_sync(&self) -> String {
        self.key("last-sync")
    }

    pub fn pending_changes(&self) -> String {
        self.key("pending-changes")
    }

    pub fn dirty_headers(&self) -> String {
        self.key("dirty-headers")
    }

    pub fn dirty_items(&self) -> String {
        self.key("dirty-items")
    }

    pub fn deleted_suppliers(&self) -> String {
        self.key("deleted-suppliers")
    }

    pub fn deleted_items(&self) -> String {
        self.key("deleted-items")
    }

    pub fn storage_layout(&self) -> String {
        self.key("storage-layout")
    }
}

// ============================================================================
// MemoryLocalStore
// ============================================================================

/// In-memory store for tests and ephemeral hosts.
#[derive(Default)]
pub struct MemoryLocalStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// FileLocalStore
// ============================================================================

/// Durable store backed by a single JSON file of key→string pairs.
///
/// The whole map is rewritten on every mutation (write temp file, then
/// rename), which is acceptable at dirty-tracking frequency. A missing or
/// corrupt file opens as an empty store.
pub struct FileLocalStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileLocalStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LocalStoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt local store file, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), LocalStoreError> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, LocalStoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LocalStoreError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        let mut entries = self.entries.lock();
        entries.remove(key);
        self.persist(&entries)
    }
}
