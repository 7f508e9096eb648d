//! Key/value persistence standing in for the browser's `localStorage` and
//! `sessionStorage`.
//!
//! Records are stored as JSON strings. Reads never fail on bad data: a value that
//! does not parse is dropped and treated as absent.

use crate::config::StorageConfig;
use crate::error::app_error::AppError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::warn;

pub mod keys {
    pub const SESSION: &str = "forkflow_session";
    pub const AUDIT_LOG: &str = "forkflow_audit_log";
    pub const OFFLINE_CREDENTIALS: &str = "forkflow_offline_creds";
    pub const CSRF_TOKEN: &str = "forkflow_csrf_token";
    pub const AUTH_STATE: &str = "authState";
}

/// Which browser storage area a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    /// Survives restarts (`localStorage`).
    Local,
    /// Cleared when the browsing session ends (`sessionStorage`).
    Session,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
    fn remove(&self, key: &str) -> Result<(), AppError>;
    fn keys(&self) -> Result<Vec<String>, AppError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> AppError {
    AppError::storage("storage lock poisoned")
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, AppError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.keys().cloned().collect())
    }
}

/// Directory-backed store: one `<key>.json` file per entry.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, AppError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| AppError::io(format!("Failed to create storage dir {}", dir.display()), e))?;
        Ok(Self { dir })
    }

    /// Keys map one-to-one onto file names, so only `[A-Za-z0-9_-]` is accepted.
    fn path_for(&self, key: &str) -> Result<PathBuf, AppError> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(AppError::storage(format!("Invalid storage key {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::io(format!("Failed to read {key}"), e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(|e| AppError::io(format!("Failed to write {key}"), e))?;
        fs::rename(&tmp, &path).map_err(|e| AppError::io(format!("Failed to persist {key}"), e))
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::io(format!("Failed to remove {key}"), e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, AppError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                keys.push(stem.to_string());
            }
        }
        Ok(keys)
    }
}

/// The pair of storage areas visible to the auth components.
#[derive(Clone)]
pub struct BrowserStorage {
    local: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
}

impl BrowserStorage {
    pub fn new(local: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self { local, session }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// Local scope persisted under `dir`; session scope always lives in memory.
    pub fn persistent(dir: impl AsRef<Path>) -> Result<Self, AppError> {
        Ok(Self::new(Arc::new(FileStore::open(dir)?), Arc::new(MemoryStore::new())))
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, AppError> {
        match &config.data_dir {
            Some(dir) => Self::persistent(dir),
            None => Ok(Self::in_memory()),
        }
    }

    pub fn store(&self, scope: StorageScope) -> &dyn KeyValueStore {
        match scope {
            StorageScope::Local => self.local.as_ref(),
            StorageScope::Session => self.session.as_ref(),
        }
    }

    pub fn read_json<T: DeserializeOwned>(&self, scope: StorageScope, key: &str) -> Result<Option<T>, AppError> {
        let Some(raw) = self.store(scope).get(key)? else {
            return Ok(None);
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = key, scope = ?scope, error = %e, "discarding corrupt storage entry");
                self.store(scope).remove(key)?;
                Ok(None)
            }
        }
    }

    pub fn write_json<T: Serialize>(&self, scope: StorageScope, key: &str, value: &T) -> Result<(), AppError> {
        let raw = serde_json::to_string(value).map_err(|e| AppError::serialization(format!("Failed to encode {key}"), e))?;
        self.store(scope).set(key, &raw)
    }

    pub fn remove(&self, scope: StorageScope, key: &str) -> Result<(), AppError> {
        self.store(scope).remove(key)
    }
}

impl std::fmt::Debug for BrowserStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserStorage").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        name: String,
        count: u32,
    }

    #[test]
    fn scopes_are_isolated() {
        let storage = BrowserStorage::in_memory();
        let record = Record {
            name: "alice".to_string(),
            count: 1,
        };
        storage.write_json(StorageScope::Local, "rec", &record).unwrap();

        assert_eq!(storage.read_json::<Record>(StorageScope::Local, "rec").unwrap(), Some(record));
        assert_eq!(storage.read_json::<Record>(StorageScope::Session, "rec").unwrap(), None);
    }

    #[test]
    fn corrupt_json_is_dropped_and_reported_as_missing() {
        let storage = BrowserStorage::in_memory();
        storage.store(StorageScope::Local).set(keys::SESSION, "{not json").unwrap();

        let loaded = storage.read_json::<Record>(StorageScope::Local, keys::SESSION).unwrap();
        assert!(loaded.is_none());
        assert!(storage.store(StorageScope::Local).get(keys::SESSION).unwrap().is_none());
    }

    #[test]
    fn file_store_round_trips_and_lists_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("authState", "{\"a\":1}").unwrap();
        assert_eq!(store.get("authState").unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(store.keys().unwrap(), vec!["authState".to_string()]);

        store.remove("authState").unwrap();
        assert!(store.get("authState").unwrap().is_none());
        store.remove("authState").unwrap();
    }

    #[test]
    fn file_store_rejects_keys_outside_file_name_alphabet() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(matches!(store.set("../escape", "1"), Err(AppError::Storage { .. })));
        assert!(store.get("a.b").is_err());
        assert!(store.remove("").is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        store.set("a_b", "1").unwrap();
        store.set("a-b", "2").unwrap();
        assert_eq!(store.get("a_b").unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("a-b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn configured_data_dir_persists_local_scope() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            data_dir: Some(dir.path().to_string_lossy().into_owned()),
        };

        let first = BrowserStorage::from_config(&config).unwrap();
        first.write_json(StorageScope::Local, keys::AUTH_STATE, &1u32).unwrap();
        first.write_json(StorageScope::Session, keys::CSRF_TOKEN, &"abc").unwrap();

        let reopened = BrowserStorage::from_config(&config).unwrap();
        assert_eq!(reopened.read_json::<u32>(StorageScope::Local, keys::AUTH_STATE).unwrap(), Some(1));
        assert!(reopened.read_json::<String>(StorageScope::Session, keys::CSRF_TOKEN).unwrap().is_none());
    }
}
