//! # kv-storage
//!
//! why: provide durable persistence for the consensus engine using standard rust fs apis
//! relations: stores kv-core log records; driven by the engine in kv-node
//! what: LogStore and StableStore traits, json file and in-memory implementations,
//!       file snapshot store, atomic write helper
//!
//! Every mutating call rewrites its whole store file. That keeps crash
//! consistency trivial (write a temp file, then rename over the old one) at
//! the cost of write amplification proportional to the store size.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod error;
pub mod log_store;
pub mod snapshot_store;
pub mod stable_store;

pub use error::StorageError;
pub use log_store::{InMemoryLogStore, JsonLogStore, LogStore};
pub use snapshot_store::{FileSnapshotStore, SnapshotMeta, SnapshotWriter};
pub use stable_store::{keys, InMemoryStableStore, JsonStableStore, StableStore};

/// Replace `path` with `bytes` so readers see either the old or the new file.
///
/// Writes a sibling temp file, syncs it, then renames it over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let temp_path = temp_path_for(path);
    let mut file = File::create(&temp_path).map_err(StorageError::io(&temp_path))?;
    file.write_all(bytes).map_err(StorageError::io(&temp_path))?;
    file.sync_all().map_err(StorageError::io(&temp_path))?;
    fs::rename(&temp_path, path).map_err(StorageError::io(path))?;
    Ok(())
}

pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(StorageError::Encode)?;
    write_atomic(path, &bytes)
}

/// Load a json file, `None` when it does not exist yet.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path)(e)),
    };
    let value = serde_json::from_slice(&bytes).map_err(|source| StorageError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

pub(crate) fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(StorageError::io(parent))
        }
        _ => Ok(()),
    }
}
