//! # client
//!
//! why: give the request layer put/delete/get/members/snapshot without exposing consensus details
//! relations: submits through engine.rs, reads kv-core's ReplicatedMap directly
//! what: ClusterClient, SubmitOutcome, LeaderRoute, batch reports

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kv_core::{
    ApplyResult, ClusterMember, Command, KeyNotFound, LeaderInfo, NodeRole, ReplicatedMap,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::engine::ConsensusEngine;
use crate::error::{ClientError, EngineError};

const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a rejected write should be resubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderRoute {
    pub id: String,
    /// Consensus transport address
    pub address: String,
    /// Client-facing address, when the listener table knows it
    pub client_address: Option<String>,
}

impl LeaderRoute {
    /// `http://<client address>/<path>`, if the client address is known
    pub fn url(&self, path: &str) -> Option<String> {
        self.client_address
            .as_ref()
            .map(|addr| format!("http://{addr}/{}", path.trim_start_matches('/')))
    }
}

/// How the engine settled one submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Committed and applied; the result may itself be `KeyNotFound` or `Malformed`
    Applied(ApplyResult),
    /// This node cannot accept writes right now
    LeaderElsewhere(Option<LeaderRoute>),
    Fault(EngineError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub not_found: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupReport {
    pub found: BTreeMap<String, String>,
    pub not_found: Vec<String>,
}

/// Client-facing wrapper around the consensus engine and the local map.
pub struct ClusterClient<E: ConsensusEngine + ?Sized> {
    engine: Arc<E>,
    fsm: Arc<ReplicatedMap>,
    routes: BTreeMap<String, String>,
    submit_timeout: Duration,
}

impl<E: ConsensusEngine + ?Sized> ClusterClient<E> {
    pub fn new(engine: Arc<E>, fsm: Arc<ReplicatedMap>) -> Self {
        Self {
            engine,
            fsm,
            routes: BTreeMap::new(),
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }

    pub fn from_config(engine: Arc<E>, fsm: Arc<ReplicatedMap>, config: &NodeConfig) -> Self {
        Self::new(engine, fsm)
            .with_routes(config.http_listeners.clone())
            .with_submit_timeout(config.submit_timeout())
    }

    /// Server id to client-facing address, used to build redirects
    pub fn with_routes(mut self, routes: BTreeMap<String, String>) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Encode `command`, hand it to the engine and classify what came back.
    pub fn submit(&self, command: &Command, timeout: Duration) -> SubmitOutcome {
        match self.engine.role() {
            NodeRole::Leader => {}
            NodeRole::Shutdown => return SubmitOutcome::Fault(EngineError::Shutdown),
            role => {
                let route = self.leader_route();
                debug!(?role, key = command.key(), "not leader, redirecting");
                return SubmitOutcome::LeaderElsewhere(route);
            }
        }

        match self.engine.submit(command.encode(), timeout) {
            Ok(result) => SubmitOutcome::Applied(result),
            Err(EngineError::NotLeader { leader }) => {
                // leadership moved between the role check and the submit
                let route = leader
                    .or_else(|| self.engine.leader_with_id())
                    .map(|leader| self.route_to(leader));
                warn!(key = command.key(), ?route, "lost leadership during submit");
                SubmitOutcome::LeaderElsewhere(route)
            }
            Err(err) => {
                error!(key = command.key(), error = %err, "submission failed");
                SubmitOutcome::Fault(err)
            }
        }
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<(), ClientError> {
        let command = Command::put(key, value);
        let outcome = self.submit(&command, self.submit_timeout);
        settle(&command, outcome)
    }

    pub fn delete(&self, key: impl Into<String>) -> Result<(), ClientError> {
        let command = Command::delete(key);
        let outcome = self.submit(&command, self.submit_timeout);
        settle(&command, outcome)
    }

    /// Local read, see [`ClusterClient::read_local`]
    pub fn get(&self, key: &str) -> Result<String, KeyNotFound> {
        self.read_local(key)
    }

    /// Read from this node's map without going through consensus.
    ///
    /// A follower may answer with state older than the leader's.
    pub fn read_local(&self, key: &str) -> Result<String, KeyNotFound> {
        self.fsm.get(key)
    }

    /// Submit each pair in order; stops at the first pair that fails.
    ///
    /// Pairs before the failing one stay applied. Returns how many were stored.
    pub fn put_many<I, K, V>(&self, pairs: I) -> Result<usize, ClientError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut stored = 0;
        for (key, value) in pairs {
            self.put(key, value)?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Delete each key in order, sorting outcomes into deleted and not found.
    ///
    /// Stops at the first redirect or fault, like [`ClusterClient::put_many`].
    pub fn delete_many<I, K>(&self, keys: I) -> Result<DeleteReport, ClientError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut report = DeleteReport::default();
        for key in keys {
            let key = key.into();
            match self.delete(key.clone()) {
                Ok(()) => report.deleted.push(key),
                Err(ClientError::KeyNotFound(_)) => report.not_found.push(key),
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    pub fn get_many<I, K>(&self, keys: I) -> LookupReport
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut report = LookupReport::default();
        for key in keys {
            let key = key.as_ref();
            match self.read_local(key) {
                Ok(value) => {
                    report.found.insert(key.to_string(), value);
                }
                Err(KeyNotFound(key)) => report.not_found.push(key),
            }
        }
        report
    }

    /// Leader as currently seen by the engine; `None` mid-election.
    pub fn current_leader(&self) -> Option<LeaderInfo> {
        let leader = self.engine.leader_with_id();
        match &leader {
            Some(l) => info!(leader_id = %l.id, leader_address = %l.address, "current leader"),
            None => info!("no leader known"),
        }
        leader
    }

    /// Current leader plus its client-facing address
    pub fn leader_route(&self) -> Option<LeaderRoute> {
        self.current_leader().map(|leader| self.route_to(leader))
    }

    /// Members in configuration order, the current leader flagged.
    ///
    /// Not linearizable with membership changes; callers must tolerate staleness.
    pub fn members(&self) -> Result<Vec<ClusterMember>, ClientError> {
        let servers = self.engine.configuration().map_err(ClientError::Fault)?;
        let leader = self.engine.leader_with_id();
        Ok(servers
            .iter()
            .map(|server| ClusterMember::from_server(server, leader.as_ref()))
            .collect())
    }

    pub fn trigger_snapshot(&self) -> Result<(), ClientError> {
        info!("snapshot requested");
        self.engine.snapshot_now().map_err(|err| {
            error!(error = %err, "requested snapshot failed");
            ClientError::Fault(err)
        })
    }

    fn route_to(&self, leader: LeaderInfo) -> LeaderRoute {
        LeaderRoute {
            client_address: self.routes.get(&leader.id).cloned(),
            id: leader.id,
            address: leader.address,
        }
    }
}

fn settle(command: &Command, outcome: SubmitOutcome) -> Result<(), ClientError> {
    match outcome {
        SubmitOutcome::Applied(ApplyResult::Stored)
        | SubmitOutcome::Applied(ApplyResult::Deleted)
        | SubmitOutcome::Applied(ApplyResult::Ignored) => Ok(()),
        SubmitOutcome::Applied(ApplyResult::KeyNotFound(missing)) => {
            warn!(key = %missing.0, "delete of missing key");
            Err(ClientError::KeyNotFound(missing))
        }
        SubmitOutcome::Applied(ApplyResult::Malformed(reason)) => {
            // our own encoder produced this payload, so the log or the wire is corrupt
            error!(key = command.key(), error = %reason, "locally encoded command rejected as malformed");
            Err(ClientError::MalformedResult(reason))
        }
        SubmitOutcome::LeaderElsewhere(route) => Err(ClientError::LeaderElsewhere(route)),
        SubmitOutcome::Fault(err) => Err(ClientError::Fault(err)),
    }
}
