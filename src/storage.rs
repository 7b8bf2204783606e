//! Key-value storage for small JSON values
//!
//! Mirrors the browser's local storage: get/set/remove/clear by key. Every
//! failure is logged and swallowed, callers never see an error.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Key-value store holding JSON values
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn remove(&self, key: &str);
    fn clear(&self);
}

/// Typed read; falls back to `default` when missing or of the wrong shape
pub fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
    default: Option<T>,
) -> Option<T> {
    match store.get(key) {
        None => default,
        Some(value) => match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                error!("Failed to get storage {}: {}", key, e);
                default
            }
        },
    }
}

/// Typed write
pub fn set_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(v) => store.set(key, v),
        Err(e) => error!("Failed to set storage {}: {}", key, e),
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// Store persisted as one JSON object file, rewritten on every mutation
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if the file does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str::<Map<String, Value>>(&content).map_err(|e| {
                    Error::Storage(format!("Failed to parse {}: {}", path.display(), e))
                })?
            }
        } else {
            debug!("{} not found, starting with empty storage", path.display());
            Map::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored key, sorted
    pub fn keys(&self) -> Vec<String> {
        self.with_entries(|entries| entries.keys().cloned().collect())
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        let mut guard = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn persist(&self, entries: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn mutate(&self, op: &str, f: impl FnOnce(&mut Map<String, Value>)) {
        self.with_entries(|entries| {
            f(entries);
            if let Err(e) = self.persist(entries) {
                error!("Failed to {} storage: {}", op, e);
            }
        });
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.with_entries(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) {
        self.mutate("set", |entries| {
            entries.insert(key.to_string(), value);
        });
    }

    fn remove(&self, key: &str) {
        self.mutate("remove", |entries| {
            entries.remove(key);
        });
    }

    fn clear(&self) {
        self.mutate("clear", |entries| entries.clear());
    }
}
