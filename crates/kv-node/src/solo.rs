//! # solo
//!
//! why: drive the storage and state machine contract for a single-voter cluster
//! relations: implements engine.rs over kv-storage stores and a kv-core StateMachine
//! what: SoloEngine with startup recovery, submit, snapshot and log compaction
//!
//! A single voter is always its own leader, so there is no election and no
//! replication here. Records are persisted before they are applied, and
//! startup replays the log suffix on top of the newest snapshot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use kv_core::{
    ApplyResult, LeaderInfo, LogKind, LogRecord, NodeRole, ServerEntry, SnapshotHandle,
    StateMachine,
};
use kv_storage::{keys, FileSnapshotStore, LogStore, StableStore};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::engine::ConsensusEngine;
use crate::error::EngineError;

#[derive(Debug)]
struct SoloState {
    term: u64,
    last_index: u64,
    applied_since_snapshot: u64,
    configuration: Vec<ServerEntry>,
    shutdown: bool,
}

/// State copied under the engine lock, written out after it is released.
struct PendingSnapshot {
    handle: SnapshotHandle,
    index: u64,
    term: u64,
    configuration: Vec<ServerEntry>,
}

pub struct SoloEngine<L, S> {
    id: String,
    address: String,
    log: Arc<L>,
    stable: Arc<S>,
    snapshots: FileSnapshotStore,
    fsm: Arc<dyn StateMachine>,
    snapshot_threshold: u64,
    trailing_logs: u64,
    state: Mutex<SoloState>,
    /// Held while a snapshot is written; always taken before `state`
    snapshot_gate: Mutex<()>,
}

impl<L: LogStore, S: StableStore> SoloEngine<L, S> {
    /// Recover `fsm` from disk and take leadership of a new term.
    ///
    /// Fails with [`EngineError::Divergence`] on a gap in the log or an
    /// unreadable configuration record. Malformed commands replay as no-ops,
    /// exactly as they applied live.
    pub fn open(
        config: &NodeConfig,
        log: Arc<L>,
        stable: Arc<S>,
        snapshots: FileSnapshotStore,
        fsm: Arc<dyn StateMachine>,
    ) -> Result<Self, EngineError> {
        let term = stable.get_counter(keys::CURRENT_TERM)?.unwrap_or(0) + 1;
        stable.set_counter(keys::CURRENT_TERM, term)?;
        stable.set_counter(keys::LAST_VOTE_TERM, term)?;
        stable.set(keys::LAST_VOTE_CAND, config.server_id.as_bytes())?;

        let mut configuration = config.initial_configuration();
        let mut snapshot_index = 0;
        if let Some(latest) = snapshots.latest()? {
            let (meta, mut data) = snapshots.open_snapshot(&latest.id)?;
            fsm.restore(&mut data)?;
            snapshot_index = meta.index;
            configuration = meta.configuration;
            info!(id = %meta.id, index = meta.index, "restored snapshot");
        }

        let (last_index, replayed) =
            replay(log.as_ref(), fsm.as_ref(), snapshot_index, &mut configuration)?;

        let engine = Self {
            id: config.server_id.clone(),
            address: config.bind_address.clone(),
            log,
            stable,
            snapshots,
            fsm,
            snapshot_threshold: config.snapshot_threshold.max(1),
            trailing_logs: config.trailing_logs,
            state: Mutex::new(SoloState {
                term,
                last_index,
                applied_since_snapshot: replayed,
                configuration,
                shutdown: false,
            }),
            snapshot_gate: Mutex::new(()),
        };

        {
            let mut state = engine.state();
            if state.last_index == 0 {
                let members = serde_json::to_vec(&state.configuration).map_err(|e| {
                    EngineError::Divergence {
                        index: 1,
                        reason: format!("cannot encode configuration: {e}"),
                    }
                })?;
                engine.append(&mut state, LogKind::Configuration, members)?;
                info!(members = state.configuration.len(), "bootstrapped cluster configuration");
            }
            // a new leader commits an entry of its own term first
            engine.append(&mut state, LogKind::NoOp, Vec::new())?;
            info!(
                id = %engine.id,
                term,
                last_index = state.last_index,
                replayed,
                "solo engine leading"
            );
        }

        Ok(engine)
    }

    pub fn term(&self) -> u64 {
        self.state().term
    }

    pub fn last_index(&self) -> u64 {
        self.state().last_index
    }

    pub fn stable_store(&self) -> &Arc<S> {
        &self.stable
    }

    pub fn log_store(&self) -> &Arc<L> {
        &self.log
    }

    /// Stop accepting writes. Stores stay consistent; nothing is in flight.
    pub fn shutdown(&self) {
        let mut state = self.state();
        if !state.shutdown {
            state.shutdown = true;
            info!(id = %self.id, "solo engine shut down");
        }
    }

    fn state(&self) -> MutexGuard<'_, SoloState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(
        &self,
        state: &mut SoloState,
        kind: LogKind,
        data: Vec<u8>,
    ) -> Result<LogRecord, EngineError> {
        let record = LogRecord::new(state.last_index + 1, state.term, kind, data);
        self.log.append(&record)?;
        state.last_index = record.index;
        Ok(record)
    }

    /// Copy the map and its position under the engine lock.
    ///
    /// With `only_if_due` the copy is skipped unless the threshold is reached,
    /// since another snapshot may have reset the count meanwhile.
    fn capture_snapshot(&self, only_if_due: bool) -> Result<Option<PendingSnapshot>, EngineError> {
        let mut state = self.state();
        if state.shutdown {
            return Err(EngineError::Shutdown);
        }
        if state.last_index == 0
            || (only_if_due && state.applied_since_snapshot < self.snapshot_threshold)
        {
            return Ok(None);
        }
        // nothing is applied between the copy and `index` while the lock is held
        let handle = self.fsm.snapshot()?;
        state.applied_since_snapshot = 0;
        Ok(Some(PendingSnapshot {
            handle,
            index: state.last_index,
            term: state.term,
            configuration: state.configuration.clone(),
        }))
    }

    /// Caller holds `snapshot_gate`, not `state`.
    fn take_snapshot(&self, only_if_due: bool) -> Result<(), EngineError> {
        let Some(pending) = self.capture_snapshot(only_if_due)? else {
            return Ok(());
        };
        let PendingSnapshot {
            mut handle,
            index,
            term,
            configuration,
        } = pending;
        let mut writer = self.snapshots.create(index, term, configuration)?;
        handle.persist(&mut writer)?;
        handle.release();
        let meta = writer.commit()?;
        self.compact(meta.index)
    }

    fn auto_snapshot(&self) {
        let _gate = match self.snapshot_gate.try_lock() {
            Ok(gate) => gate,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!("snapshot already in progress, deferring");
                return;
            }
        };
        // the write is already committed; a failed snapshot is retried next threshold
        if let Err(err) = self.take_snapshot(true) {
            warn!(error = %err, "automatic snapshot failed");
        }
    }

    fn compact(&self, snapshot_index: u64) -> Result<(), EngineError> {
        let Some(upto) = snapshot_index.checked_sub(self.trailing_logs) else {
            return Ok(());
        };
        let first = self.log.first_index()?;
        if first == 0 || first > upto {
            return Ok(());
        }
        self.log.delete_range(first, upto)?;
        debug!(first, upto, "compacted log");
        Ok(())
    }
}

/// Apply every record after `snapshot_index` in order.
///
/// Returns the last index seen and how many command records were applied.
fn replay<L: LogStore + ?Sized>(
    log: &L,
    fsm: &dyn StateMachine,
    snapshot_index: u64,
    configuration: &mut Vec<ServerEntry>,
) -> Result<(u64, u64), EngineError> {
    let last = log.last_index()?;
    if last <= snapshot_index {
        return Ok((snapshot_index, 0));
    }

    let mut expected = snapshot_index + 1;
    let mut applied = 0;
    for record in log.get_range(expected, last)? {
        if record.index != expected {
            return Err(EngineError::Divergence {
                index: expected,
                reason: format!("log has a gap, next stored index is {}", record.index),
            });
        }
        match record.kind {
            LogKind::Command => {
                // a malformed command was a no-op when first applied and stays one
                if let ApplyResult::Malformed(reason) = fsm.apply(&record) {
                    warn!(index = record.index, error = %reason, "replayed malformed command");
                }
                applied += 1;
            }
            LogKind::Configuration => {
                *configuration = serde_json::from_slice(&record.data).map_err(|e| {
                    EngineError::Divergence {
                        index: record.index,
                        reason: format!("unreadable configuration: {e}"),
                    }
                })?;
            }
            LogKind::NoOp => {}
        }
        expected += 1;
    }
    if expected <= last {
        return Err(EngineError::Divergence {
            index: expected,
            reason: "log ends early".to_string(),
        });
    }
    debug!(from = snapshot_index + 1, to = last, applied, "replayed log");
    Ok((last, applied))
}

impl<L: LogStore, S: StableStore> ConsensusEngine for SoloEngine<L, S> {
    fn submit(&self, payload: Vec<u8>, timeout: Duration) -> Result<ApplyResult, EngineError> {
        let started = Instant::now();
        let (result, due) = {
            let mut state = self.state();
            if state.shutdown {
                return Err(EngineError::Shutdown);
            }
            if started.elapsed() > timeout {
                return Err(EngineError::Timeout(timeout));
            }

            let record = self.append(&mut state, LogKind::Command, payload)?;
            let result = self.fsm.apply(&record);
            state.applied_since_snapshot += 1;
            debug!(index = record.index, ?result, "applied command");
            (result, state.applied_since_snapshot >= self.snapshot_threshold)
        };

        if due {
            self.auto_snapshot();
        }
        Ok(result)
    }

    fn leader_with_id(&self) -> Option<LeaderInfo> {
        if self.state().shutdown {
            return None;
        }
        Some(LeaderInfo {
            address: self.address.clone(),
            id: self.id.clone(),
        })
    }

    fn role(&self) -> NodeRole {
        if self.state().shutdown {
            NodeRole::Shutdown
        } else {
            NodeRole::Leader
        }
    }

    fn configuration(&self) -> Result<Vec<ServerEntry>, EngineError> {
        Ok(self.state().configuration.clone())
    }

    fn snapshot_now(&self) -> Result<(), EngineError> {
        let _gate = self
            .snapshot_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.take_snapshot(false)
    }
}
