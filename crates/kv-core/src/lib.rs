//! # kv-core
//!
//! why: hold the deterministic part of the replicated key-value store in pure, portable rust
//! relations: persisted by kv-storage, driven by the consensus engine seam in kv-node
//! what: command codec, log record model, replicated map state machine, snapshot handle

pub mod command;
pub mod error;
pub mod fsm;
pub mod log;
pub mod node;
pub mod snapshot;

pub use command::Command;
pub use error::{KeyNotFound, MalformedCommand, SnapshotError};
pub use fsm::{ApplyResult, ReplicatedMap, StateMachine};
pub use log::{LogKind, LogRecord};
pub use node::{ClusterMember, LeaderInfo, NodeRole, ServerEntry, Suffrage};
pub use snapshot::SnapshotHandle;
