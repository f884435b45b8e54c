//! # config
//!
//! why: gather everything a node needs to open its stores and answer routing questions
//! relations: consumed by solo.rs and client.rs, loaded from json files on disk
//! what: NodeConfig with defaults and validation, bootstrap server and http listener loaders

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kv_core::{ServerEntry, Suffrage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Per-node settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub server_id: String,
    /// Consensus transport address of this node
    pub bind_address: String,
    /// Root for the log store, stable store and snapshots
    pub data_dir: PathBuf,
    /// How long a client write waits for its commit decision
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    /// Applied entries between automatic snapshots
    #[serde(default = "default_snapshot_threshold")]
    pub snapshot_threshold: u64,
    #[serde(default = "default_snapshot_retain")]
    pub snapshot_retain: usize,
    /// Log entries kept behind the newest snapshot
    #[serde(default = "default_trailing_logs")]
    pub trailing_logs: u64,
    /// Bootstrap membership
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
    /// Server id to client-facing address
    #[serde(default)]
    pub http_listeners: BTreeMap<String, String>,
}

fn default_submit_timeout_secs() -> u64 {
    30
}

fn default_snapshot_threshold() -> u64 {
    400
}

fn default_snapshot_retain() -> usize {
    3
}

fn default_trailing_logs() -> u64 {
    10_240
}

impl NodeConfig {
    pub fn new(
        server_id: impl Into<String>,
        bind_address: impl Into<String>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            bind_address: bind_address.into(),
            data_dir: data_dir.into(),
            submit_timeout_secs: default_submit_timeout_secs(),
            snapshot_threshold: default_snapshot_threshold(),
            snapshot_retain: default_snapshot_retain(),
            trailing_logs: default_trailing_logs(),
            servers: Vec::new(),
            http_listeners: BTreeMap::new(),
        }
    }

    /// Load and validate a json config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_id.trim().is_empty() {
            return Err(ConfigError::Invalid("server_id must be set".into()));
        }
        if self.submit_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "submit_timeout_secs must be positive".into(),
            ));
        }
        let mut seen = BTreeSet::new();
        for server in &self.servers {
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "server id {:?} listed twice",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn log_store_path(&self) -> PathBuf {
        self.data_dir.join("logstore.json")
    }

    pub fn stable_store_path(&self) -> PathBuf {
        self.data_dir.join("stablestore.json")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Bootstrap membership, or just this node when none is configured
    pub fn initial_configuration(&self) -> Vec<ServerEntry> {
        if self.servers.is_empty() {
            vec![ServerEntry::voter(&self.server_id, &self.bind_address)]
        } else {
            self.servers.clone()
        }
    }
}

#[derive(Deserialize)]
struct BootstrapServer {
    #[serde(rename = "Suffrage", default)]
    suffrage: u8,
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Address")]
    address: String,
}

#[derive(Deserialize)]
struct HttpListener {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "HttpListenerAddress")]
    address: String,
}

/// Read a bootstrap membership file: `[{"Suffrage": 0, "ID": "...", "Address": "..."}]`.
///
/// Suffrage 0 is a voter; anything else is treated as a non-voter.
pub fn load_servers(path: impl AsRef<Path>) -> Result<Vec<ServerEntry>, ConfigError> {
    let servers: Vec<BootstrapServer> = read_json(path.as_ref())?;
    Ok(servers
        .into_iter()
        .map(|s| ServerEntry {
            id: s.id,
            address: s.address,
            suffrage: if s.suffrage == 0 {
                Suffrage::Voter
            } else {
                Suffrage::Nonvoter
            },
        })
        .collect())
}

/// Read the client-facing listener table: `[{"ID": "...", "HttpListenerAddress": "..."}]`.
pub fn load_http_listeners(path: impl AsRef<Path>) -> Result<BTreeMap<String, String>, ConfigError> {
    let listeners: Vec<HttpListener> = read_json(path.as_ref())?;
    Ok(listeners.into_iter().map(|l| (l.id, l.address)).collect())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
