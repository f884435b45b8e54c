//! # log_store
//!
//! why: keep the replicated log ordered, indexed and crash consistent
//! relations: written and compacted by the consensus engine, replayed into kv-core's fsm
//! what: LogStore trait, JsonLogStore, InMemoryLogStore

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use kv_core::LogRecord;
use tracing::{debug, error};

use crate::error::StorageError;
use crate::{ensure_parent, read_json, write_json};

type RecordIndex = BTreeMap<u64, LogRecord>;

/// Durable storage for log records, keyed by index.
///
/// Every call runs under one exclusive section. Mutations are synchronous:
/// when they return `Ok` the records are on disk.
pub trait LogStore: Send + Sync {
    /// Lowest stored index, 0 when empty
    fn first_index(&self) -> Result<u64, StorageError>;

    /// Highest stored index, 0 when empty
    fn last_index(&self) -> Result<u64, StorageError>;

    fn get(&self, index: u64) -> Result<Option<LogRecord>, StorageError>;

    /// Records with `low <= index <= high`, ascending
    fn get_range(&self, low: u64, high: u64) -> Result<Vec<LogRecord>, StorageError>;

    fn append(&self, record: &LogRecord) -> Result<(), StorageError> {
        self.append_batch(std::slice::from_ref(record))
    }

    /// Insert all records in one persisted step. A record whose index is
    /// already stored replaces the old one.
    fn append_batch(&self, records: &[LogRecord]) -> Result<(), StorageError>;

    /// Remove every stored index in `min..=max` (bounds may come in either order).
    fn delete_range(&self, min: u64, max: u64) -> Result<(), StorageError>;
}

fn first(index: &RecordIndex) -> u64 {
    index.keys().next().copied().unwrap_or(0)
}

fn last(index: &RecordIndex) -> u64 {
    index.keys().next_back().copied().unwrap_or(0)
}

fn range(index: &RecordIndex, low: u64, high: u64) -> Vec<LogRecord> {
    if low > high {
        return Vec::new();
    }
    index.range(low..=high).map(|(_, r)| r.clone()).collect()
}

fn ordered(min: u64, max: u64) -> (u64, u64) {
    if min > max {
        (max, min)
    } else {
        (min, max)
    }
}

fn count_in(index: &RecordIndex, min: u64, max: u64) -> usize {
    index.range(min..=max).count()
}

fn remove_range(index: &mut RecordIndex, min: u64, max: u64) {
    let mut tail = index.split_off(&min);
    let mut above = tail.split_off(&max.saturating_add(1));
    if max == u64::MAX {
        above.clear();
    }
    index.append(&mut above);
}

fn lock(index: &Mutex<RecordIndex>) -> MutexGuard<'_, RecordIndex> {
    index.lock().unwrap_or_else(PoisonError::into_inner)
}

// -- json file implementation --

/// Log store backed by a single json file.
///
/// The file maps each index (as a string) to its record and is rewritten in
/// full on every mutation.
#[derive(Debug)]
pub struct JsonLogStore {
    path: PathBuf,
    records: Mutex<RecordIndex>,
}

impl JsonLogStore {
    /// Open the store at `path`, loading any records already on disk.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        ensure_parent(&path)?;
        let records: RecordIndex = read_json(&path)?.unwrap_or_default();
        debug!(
            path = %path.display(),
            records = records.len(),
            first = first(&records),
            last = last(&records),
            "opened log store"
        );
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // build the next image, persist it, and only then make it visible
    fn commit(
        &self,
        current: &mut RecordIndex,
        mutate: impl FnOnce(&mut RecordIndex),
    ) -> Result<(), StorageError> {
        let mut next = current.clone();
        mutate(&mut next);
        if let Err(err) = write_json(&self.path, &next) {
            error!(path = %self.path.display(), error = %err, "failed to persist log store");
            return Err(err);
        }
        *current = next;
        Ok(())
    }
}

impl LogStore for JsonLogStore {
    fn first_index(&self) -> Result<u64, StorageError> {
        Ok(first(&lock(&self.records)))
    }

    fn last_index(&self) -> Result<u64, StorageError> {
        Ok(last(&lock(&self.records)))
    }

    fn get(&self, index: u64) -> Result<Option<LogRecord>, StorageError> {
        Ok(lock(&self.records).get(&index).cloned())
    }

    fn get_range(&self, low: u64, high: u64) -> Result<Vec<LogRecord>, StorageError> {
        Ok(range(&lock(&self.records), low, high))
    }

    fn append_batch(&self, records: &[LogRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut current = lock(&self.records);
        self.commit(&mut current, |next| {
            for record in records {
                next.insert(record.index, record.clone());
            }
        })?;
        debug!(count = records.len(), last = last(&current), "appended log records");
        Ok(())
    }

    fn delete_range(&self, min: u64, max: u64) -> Result<(), StorageError> {
        let (min, max) = ordered(min, max);
        let mut current = lock(&self.records);
        let removed = count_in(&current, min, max);
        if removed == 0 {
            return Ok(());
        }
        self.commit(&mut current, |next| remove_range(next, min, max))?;
        debug!(min, max, removed, "deleted log range");
        Ok(())
    }
}

// -- in-memory implementation --

/// In-memory log store for testing
///
/// Same ordering semantics as [`JsonLogStore`], no persistence across restarts.
#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    records: Mutex<RecordIndex>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for InMemoryLogStore {
    fn first_index(&self) -> Result<u64, StorageError> {
        Ok(first(&lock(&self.records)))
    }

    fn last_index(&self) -> Result<u64, StorageError> {
        Ok(last(&lock(&self.records)))
    }

    fn get(&self, index: u64) -> Result<Option<LogRecord>, StorageError> {
        Ok(lock(&self.records).get(&index).cloned())
    }

    fn get_range(&self, low: u64, high: u64) -> Result<Vec<LogRecord>, StorageError> {
        Ok(range(&lock(&self.records), low, high))
    }

    fn append_batch(&self, records: &[LogRecord]) -> Result<(), StorageError> {
        let mut current = lock(&self.records);
        for record in records {
            current.insert(record.index, record.clone());
        }
        Ok(())
    }

    fn delete_range(&self, min: u64, max: u64) -> Result<(), StorageError> {
        let (min, max) = ordered(min, max);
        remove_range(&mut lock(&self.records), min, max);
        Ok(())
    }
}
