//! # node
//!
//! why: name the membership and leadership facts the client layer reasons about
//! relations: reported by the consensus engine, turned into routing answers by kv-node
//! what: NodeRole enum, ServerEntry, LeaderInfo, ClusterMember

use serde::{Deserialize, Serialize};

/// The role the consensus engine currently holds this node in.
///
/// Transitions belong to the engine; this crate only observes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Passive state - accepts entries from a leader
    Follower,
    /// Requesting votes; there is no known leader
    Candidate,
    /// Orders and commits client writes
    Leader,
    /// The engine has stopped
    Shutdown,
}

impl Default for NodeRole {
    fn default() -> Self {
        Self::Follower
    }
}

/// Whether a configured server takes part in quorum decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Suffrage {
    #[default]
    Voter,
    Nonvoter,
}

/// One server in the engine's membership configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub id: String,
    /// Consensus transport address
    pub address: String,
    #[serde(default)]
    pub suffrage: Suffrage,
}

impl ServerEntry {
    pub fn voter(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            suffrage: Suffrage::Voter,
        }
    }
}

/// The leader as last observed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub address: String,
    pub id: String,
}

/// A member as reported to callers. Derived on every query, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub address: String,
    pub id: String,
    pub is_leader: bool,
}

impl ClusterMember {
    /// Flag `server` as leader when its id matches the current leader's
    pub fn from_server(server: &ServerEntry, leader: Option<&LeaderInfo>) -> Self {
        Self {
            address: server.address.clone(),
            id: server.id.clone(),
            is_leader: leader.is_some_and(|l| l.id == server.id),
        }
    }
}
