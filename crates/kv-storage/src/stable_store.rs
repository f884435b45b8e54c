//! # stable_store
//!
//! why: persist the consensus engine's small metadata (term, vote) across restarts
//! relations: read and written by the engine in kv-node
//! what: StableStore trait, JsonStableStore, InMemoryStableStore, well-known keys

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::error;

use crate::error::StorageError;
use crate::{ensure_parent, read_json, write_json};

/// Keys the engine keeps in the stable store.
pub mod keys {
    pub const CURRENT_TERM: &str = "CurrentTerm";
    pub const LAST_VOTE_TERM: &str = "LastVoteTerm";
    pub const LAST_VOTE_CAND: &str = "LastVoteCand";
}

/// Durable string-keyed metadata.
///
/// A missing key reads as `None`, never as an empty value or zero.
pub trait StableStore: Send + Sync {
    /// Store `value`, which must be utf-8.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a counter as its decimal text
    fn set_counter(&self, key: &str, value: u64) -> Result<(), StorageError> {
        self.set(key, value.to_string().as_bytes())
    }

    fn get_counter(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        let invalid = || StorageError::InvalidCounter {
            key: key.to_string(),
            value: String::from_utf8_lossy(&raw).into_owned(),
        };
        let text = std::str::from_utf8(&raw).map_err(|_| invalid())?;
        text.parse::<u64>().map(Some).map_err(|_| invalid())
    }
}

fn to_text(key: &str, value: &[u8]) -> Result<String, StorageError> {
    String::from_utf8(value.to_vec()).map_err(|_| StorageError::NonUtf8Value {
        key: key.to_string(),
    })
}

fn lock(values: &Mutex<BTreeMap<String, String>>) -> MutexGuard<'_, BTreeMap<String, String>> {
    values.lock().unwrap_or_else(PoisonError::into_inner)
}

// -- json file implementation --

/// Stable store backed by a json object of string keys to string values.
#[derive(Debug)]
pub struct JsonStableStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonStableStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        ensure_parent(&path)?;
        let values = read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StableStore for JsonStableStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let text = to_text(key, value)?;
        let mut current = lock(&self.values);
        let mut next = current.clone();
        next.insert(key.to_string(), text);
        if let Err(err) = write_json(&self.path, &next) {
            error!(path = %self.path.display(), key, error = %err, "failed to persist stable store");
            return Err(err);
        }
        *current = next;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(lock(&self.values).get(key).map(|v| v.clone().into_bytes()))
    }
}

// -- in-memory implementation --

/// In-memory stable store for testing
#[derive(Debug, Default)]
pub struct InMemoryStableStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl InMemoryStableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StableStore for InMemoryStableStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let text = to_text(key, value)?;
        lock(&self.values).insert(key.to_string(), text);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(lock(&self.values).get(key).map(|v| v.clone().into_bytes()))
    }
}
