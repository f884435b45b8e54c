//! # kv-node
//!
//! why: wire the deterministic core and the durable stores into a running node
//! relations: drives kv-core's ReplicatedMap over kv-storage's json stores
//! what: node config, consensus engine seam, single-voter engine, cluster client,
//!       tracing setup

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod solo;
pub mod telemetry;

use std::sync::Arc;

use kv_core::ReplicatedMap;
use kv_storage::{FileSnapshotStore, JsonLogStore, JsonStableStore};

pub use client::{ClusterClient, DeleteReport, LeaderRoute, LookupReport, SubmitOutcome};
pub use config::{load_http_listeners, load_servers, NodeConfig};
pub use engine::ConsensusEngine;
pub use error::{ClientError, ConfigError, EngineError};
pub use solo::SoloEngine;
pub use telemetry::init_tracing;

pub type SoloNode = SoloEngine<JsonLogStore, JsonStableStore>;

/// Open the json stores under `config.data_dir`, recover, and return a client
/// bound to the recovered map.
pub fn open_solo(config: &NodeConfig) -> Result<ClusterClient<SoloNode>, EngineError> {
    let log = Arc::new(JsonLogStore::open(config.log_store_path())?);
    let stable = Arc::new(JsonStableStore::open(config.stable_store_path())?);
    let snapshots = FileSnapshotStore::open(config.snapshot_dir(), config.snapshot_retain)?;
    let fsm = Arc::new(ReplicatedMap::new());

    let engine = SoloEngine::open(config, log, stable, snapshots, fsm.clone())?;
    Ok(ClusterClient::from_config(Arc::new(engine), fsm, config))
}
