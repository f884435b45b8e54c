//! # error
//!
//! why: separate routing signals, expected outcomes and genuine faults at the client boundary
//! relations: EngineError comes from engine.rs implementations, ClientError leaves client.rs
//! what: EngineError, ClientError, ConfigError

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use kv_core::{KeyNotFound, LeaderInfo, MalformedCommand, SnapshotError};
use kv_storage::StorageError;
use thiserror::Error;

use crate::client::LeaderRoute;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("this node is not the leader (known leader: {})", leader_hint(.leader))]
    NotLeader { leader: Option<LeaderInfo> },

    #[error("no commit decision within {0:?}")]
    Timeout(Duration),

    #[error("consensus engine is shut down")]
    Shutdown,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// The stored log cannot be replayed to a state every replica agrees on
    #[error("log diverged at index {index}: {reason}")]
    Divergence { index: u64, reason: String },
}

fn leader_hint(leader: &Option<LeaderInfo>) -> String {
    match leader {
        Some(l) => format!("{} at {}", l.id, l.address),
        None => "none".to_string(),
    }
}

/// What a client-facing operation reports when it does not simply succeed.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    KeyNotFound(#[from] KeyNotFound),

    /// Resubmit to the leader; `None` while an election is in progress
    #[error("write must go to the leader ({})", route_hint(.0))]
    LeaderElsewhere(Option<LeaderRoute>),

    #[error("committed command was rejected: {0}")]
    MalformedResult(MalformedCommand),

    #[error("submission failed: {0}")]
    Fault(#[source] EngineError),
}

fn route_hint(route: &Option<LeaderRoute>) -> String {
    match route {
        Some(r) => match &r.client_address {
            Some(client) => format!("{} serving clients at {client}", r.id),
            None => format!("{} at {}", r.id, r.address),
        },
        None => "no leader elected".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
