//! # log
//!
//! why: describe the records the consensus engine orders, persists and delivers
//! relations: stored by kv-storage log stores, consumed by fsm.rs
//! what: LogRecord struct, LogKind enum

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a log record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
    /// An encoded [`crate::Command`] for the state machine
    Command,
    /// A serialized member list, written by the engine on membership changes
    Configuration,
    /// Written by a new leader to commit its term; never reaches the map
    NoOp,
}

/// A single entry in the replicated log.
///
/// Records are immutable once appended. Stores only ever drop them by index
/// range, never rewrite them in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position in the log (1-indexed)
    pub index: u64,
    /// The term when this record was created
    pub term: u64,
    pub kind: LogKind,
    /// Opaque payload; for [`LogKind::Command`] the codec wire format
    pub data: Vec<u8>,
    pub appended_at: DateTime<Utc>,
}

impl LogRecord {
    /// Create a record stamped with the current time
    pub fn new(index: u64, term: u64, kind: LogKind, data: Vec<u8>) -> Self {
        Self {
            index,
            term,
            kind,
            data,
            appended_at: Utc::now(),
        }
    }

    /// Create a command record
    pub fn command(index: u64, term: u64, data: Vec<u8>) -> Self {
        Self::new(index, term, LogKind::Command, data)
    }

    pub fn is_command(&self) -> bool {
        self.kind == LogKind::Command
    }
}
