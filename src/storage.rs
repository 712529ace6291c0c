//! Client-local persistent storage.
//!
//! Records are written as versioned JSON envelopes (`{"version": 1, "data": …}`).
//! Reading never fails the caller: a missing, malformed or foreign-version record
//! is logged and reported as absent. Multiple tabs sharing one store race with
//! last-writer-wins semantics; nothing here locks across writers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Error;

/// Current envelope version for every record this crate writes.
pub const SCHEMA_VERSION: u32 = 1;

/// String key/value storage with `localStorage` semantics.
pub trait KeyValueStore: Send + Sync {
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the backing medium cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the value cannot be persisted.
    fn set(&self, key: &str, value: String) -> Result<(), Error>;

    /// # Errors
    ///
    /// Returns [`Error::Storage`] if an existing value cannot be deleted.
    fn remove(&self, key: &str) -> Result<(), Error>;
}

/// Names of the records this crate persists, under a shared prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    prefix: String,
}

impl StorageKeys {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn session(&self) -> String {
        format!("{}.session", self.prefix)
    }

    #[must_use]
    pub fn quick_login(&self) -> String {
        format!("{}.quick-login", self.prefix)
    }

    #[must_use]
    pub fn logout(&self) -> String {
        format!("{}.logout", self.prefix)
    }

    #[must_use]
    pub fn code_verifier(&self) -> String {
        format!("{}.code-verifier", self.prefix)
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    data: JsonValue,
}

/// Writes `value` under `key` wrapped in the current schema envelope.
///
/// # Errors
///
/// Returns [`Error::Storage`] if serialization or the underlying write fails.
pub fn write_record<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), Error> {
    let json = serde_json::to_string(&EnvelopeRef {
        version: SCHEMA_VERSION,
        data: value,
    })
    .map_err(|e| Error::Storage(format!("failed to serialize {key}: {e}")))?;
    store.set(key, json)
}

/// Reads the raw `data` payload of a record, or `None` if it is unusable.
pub fn read_record_value(store: &dyn KeyValueStore, key: &str) -> Option<JsonValue> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(key, error = %e, "Storage read failed, treating record as absent");
            return None;
        }
    };

    let envelope: Envelope = match serde_json::from_str(&raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(key, error = %e, "Malformed stored record, treating as absent");
            return None;
        }
    };

    if envelope.version != SCHEMA_VERSION {
        tracing::warn!(
            key,
            version = envelope.version,
            expected = SCHEMA_VERSION,
            "Stored record has unsupported schema version, treating as absent"
        );
        return None;
    }

    Some(envelope.data)
}

/// Reads and decodes a record, or `None` if it is missing or does not match `T`.
pub fn read_record<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let data = read_record_value(store, key)?;
    match serde_json::from_value(data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, error = %e, "Stored record does not match schema, treating as absent");
            None
        }
    }
}

/// In-memory storage. Clones share the same map, like tabs sharing one origin.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|guard| guard.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Storage("lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), Error> {
        self.entries
            .write()
            .map_err(|_| Error::Storage("lock poisoned".into()))?
            .insert(key.to_owned(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.entries
            .write()
            .map_err(|_| Error::Storage("lock poisoned".into()))?
            .remove(key);
        Ok(())
    }
}

/// Directory-backed storage: one `{key}.json` file per key.
///
/// Keys are restricted to ASCII alphanumerics, `.`, `-` and `_`; anything else
/// is rejected so a key can never escape the directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Creates the store, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the directory cannot be created.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, Error> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .map_err(|e| Error::Storage(format!("failed to create storage directory: {e}")))?;
        Ok(Self { directory })
    }

    fn path(&self, key: &str) -> Result<PathBuf, Error> {
        let safe = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !safe {
            return Err(Error::Storage(format!("invalid storage key {key:?}")));
        }
        Ok(self.directory.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let path = self.path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!("failed to read {key}: {e}"))),
        }
    }

    fn set(&self, key: &str, value: String) -> Result<(), Error> {
        let path = self.path(key)?;
        std::fs::write(&path, value)
            .map_err(|e| Error::Storage(format!("failed to write {key}: {e}")))
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        let path = self.path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("failed to delete {key}: {e}"))),
        }
    }
}
