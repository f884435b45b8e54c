//! # engine
//!
//! why: keep the consensus protocol behind a narrow seam so this crate never reimplements it
//! relations: implemented by solo.rs (and by adapters over a real consensus library),
//!            called by client.rs
//! what: ConsensusEngine trait

use std::time::Duration;

use kv_core::{ApplyResult, LeaderInfo, NodeRole, ServerEntry};

use crate::error::EngineError;

/// Calls this crate makes on the consensus engine.
///
/// Leadership and membership answers are best-effort: they reflect the
/// engine's view at the moment of the call and may already be stale.
pub trait ConsensusEngine: Send + Sync {
    /// Replicate `payload` as a command record and wait up to `timeout` for
    /// the state machine's result.
    ///
    /// `timeout` bounds the caller's wait only; engine I/O already in flight
    /// is not cancelled.
    fn submit(&self, payload: Vec<u8>, timeout: Duration) -> Result<ApplyResult, EngineError>;

    /// Current leader, `None` during an election. Never blocks for one.
    fn leader_with_id(&self) -> Option<LeaderInfo>;

    fn leader_address(&self) -> Option<String> {
        self.leader_with_id().map(|leader| leader.address)
    }

    fn role(&self) -> NodeRole;

    /// Latest membership configuration known to the engine
    fn configuration(&self) -> Result<Vec<ServerEntry>, EngineError>;

    /// Snapshot the state machine now rather than waiting for the threshold.
    fn snapshot_now(&self) -> Result<(), EngineError>;
}
