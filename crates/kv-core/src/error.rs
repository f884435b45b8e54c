//! # error
//!
//! why: give every failure the core can observe its own typed shape
//! relations: returned by command.rs, fsm.rs and snapshot.rs; wrapped by kv-node errors
//! what: MalformedCommand, KeyNotFound, SnapshotError

use std::io;

use thiserror::Error;

/// A log payload that does not decode into a [`crate::Command`].
///
/// A local encoder never produces one of these, so seeing it means the log
/// was corrupted or a peer speaks a different wire format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedCommand {
    #[error("malformed command: missing tag separator")]
    MissingTag,

    #[error("malformed command: unknown tag {0:?}")]
    UnknownTag(String),

    #[error("malformed command: missing {0} length")]
    MissingLength(&'static str),

    #[error("malformed command: {field} length {raw:?} is not an unsigned integer")]
    BadLength { field: &'static str, raw: String },

    #[error("malformed command: declared {declared} payload bytes, found {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("malformed command: {0} is not valid utf-8")]
    NotUtf8(&'static str),
}

/// Lookup or delete of a key the map does not hold.
///
/// This is an ordinary outcome, never a fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("key not found: {0}")]
pub struct KeyNotFound(pub String);

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("snapshot decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("snapshot io failed: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot was already released")]
    Released,
}
