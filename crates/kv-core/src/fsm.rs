//! # fsm
//!
//! why: apply committed log records to the replicated key-value map deterministically
//! relations: receives records from the consensus engine, decodes them with command.rs,
//!            hands snapshots to snapshot.rs
//! what: StateMachine trait, ApplyResult, ReplicatedMap

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info};

use crate::command::Command;
use crate::error::{KeyNotFound, MalformedCommand, SnapshotError};
use crate::log::{LogKind, LogRecord};
use crate::snapshot::SnapshotHandle;

/// Calls the consensus engine makes into the application.
///
/// The engine delivers records one at a time in index order; implementations
/// must never interleave two `apply` calls.
pub trait StateMachine: Send + Sync {
    fn apply(&self, record: &LogRecord) -> ApplyResult;

    fn snapshot(&self) -> Result<SnapshotHandle, SnapshotError>;

    fn restore(&self, source: &mut dyn Read) -> Result<(), SnapshotError>;
}

/// Outcome of applying one record, handed back to whoever submitted it.
///
/// Every variant is a value, including the failures: the engine relays it to
/// the submitter and keeps going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyResult {
    /// A put upserted its key
    Stored,
    /// A delete removed its key
    Deleted,
    KeyNotFound(KeyNotFound),
    Malformed(MalformedCommand),
    /// Configuration and no-op records leave the map untouched
    Ignored,
}

/// The replicated map. Sole owner of the key-value state.
///
/// One mutex guards the map, so `get` never sees a half-applied record and
/// `restore` swaps the whole map at once.
#[derive(Debug, Default)]
pub struct ReplicatedMap {
    data: Mutex<BTreeMap<String, String>>,
}

impl ReplicatedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point lookup against the locally applied state.
    pub fn get(&self, key: &str) -> Result<String, KeyNotFound> {
        self.data()
            .get(key)
            .cloned()
            .ok_or_else(|| KeyNotFound(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    // a panic cannot leave the map half-mutated: every mutation is a single
    // insert, remove or swap
    fn data(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_command(&self, command: Command) -> ApplyResult {
        let mut data = self.data();
        match command {
            Command::Put { key, value } => {
                data.insert(key, value);
                ApplyResult::Stored
            }
            Command::Delete { key } => match data.remove(&key) {
                Some(_) => {
                    debug!(key = %key, "deleted key");
                    ApplyResult::Deleted
                }
                None => {
                    debug!(key = %key, "delete of absent key");
                    ApplyResult::KeyNotFound(KeyNotFound(key))
                }
            },
        }
    }
}

impl StateMachine for ReplicatedMap {
    fn apply(&self, record: &LogRecord) -> ApplyResult {
        if record.kind != LogKind::Command {
            return ApplyResult::Ignored;
        }

        match Command::decode(&record.data) {
            Ok(command) => self.apply_command(command),
            Err(err) => {
                error!(
                    index = record.index,
                    term = record.term,
                    error = %err,
                    "undecodable command in committed log"
                );
                ApplyResult::Malformed(err)
            }
        }
    }

    fn snapshot(&self) -> Result<SnapshotHandle, SnapshotError> {
        let copy = self.data().clone();
        // lock released; encoding runs alongside apply/get
        let bytes = serde_json::to_vec(&copy).map_err(SnapshotError::Encode)?;
        debug!(keys = copy.len(), bytes = bytes.len(), "captured snapshot");
        Ok(SnapshotHandle::new(bytes))
    }

    fn restore(&self, source: &mut dyn Read) -> Result<(), SnapshotError> {
        let mut data = self.data();
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;
        let restored: BTreeMap<String, String> =
            serde_json::from_slice(&bytes).map_err(SnapshotError::Decode)?;
        info!(keys = restored.len(), "restored state from snapshot");
        *data = restored;
        Ok(())
    }
}
