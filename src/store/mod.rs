//! Local preference store.
//!
//! A small key/value string store mirroring the in-memory session, task,
//! settings and progress lists. Every mutation of a mirrored list re-reads
//! the stored copy first and then writes the whole list back, so a second
//! process sharing the directory (the CLI next to a running daemon) does not
//! lose its writes.
//!
//! [`load_list`] and [`load_value`] never fail from the caller's point of
//! view: missing, unreadable or malformed entries come back as an empty
//! default and are logged. [`read_value`] reports those cases instead.

mod file_store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

pub use file_store::FileStore;

const SESSIONS_KEY: &str = "pomodoro_sessions";
const TASKS_KEY: &str = "pomodoro_tasks";
const SETTINGS_KEY: &str = "timer_settings";
const PROGRESS_KEY: &str = "progress";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key/value string persistence.
pub trait PreferenceStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Storage keys, optionally namespaced to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    pub sessions: String,
    pub tasks: String,
    pub settings: String,
    pub progress: String,
}

impl StoreKeys {
    /// Appends `-<user>` to the per-user keys. Progress records carry their
    /// owner inside each record, so that key is shared.
    pub fn for_user(user: Option<&str>) -> Self {
        let scoped = |base: &str| match user {
            Some(uid) if !uid.trim().is_empty() => format!("{base}-{}", uid.trim()),
            _ => base.to_string(),
        };
        Self {
            sessions: scoped(SESSIONS_KEY),
            tasks: scoped(TASKS_KEY),
            settings: scoped(SETTINGS_KEY),
            progress: PROGRESS_KEY.to_string(),
        }
    }
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::for_user(None)
    }
}

/// Loads a JSON list, substituting an empty list for anything unusable.
pub fn load_list<T: DeserializeOwned>(store: &dyn PreferenceStore, key: &str) -> Vec<T> {
    load_value(store, key)
}

/// Loads a JSON value, substituting `T::default()` for anything unusable.
pub fn load_value<T: DeserializeOwned + Default>(store: &dyn PreferenceStore, key: &str) -> T {
    match read_value(store, key) {
        Ok(value) => value.unwrap_or_default(),
        Err(StoreError::Json(e)) => {
            warn!(key, error = %e, "malformed stored value, using default");
            T::default()
        }
        Err(e) => {
            warn!(key, error = %e, "preference store read failed, using default");
            T::default()
        }
    }
}

/// Reads a JSON value; `Ok(None)` when the key was never written.
pub fn read_value<T: DeserializeOwned>(
    store: &dyn PreferenceStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn save_json<T: Serialize + ?Sized>(
    store: &mut dyn PreferenceStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(value)?;
    store.set(key, &json)
}

/// In-memory store. Clones share the same entries, so a test can keep a
/// handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `set` fail, simulating a full or revoked store.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
