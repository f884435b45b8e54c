//! # snapshot_store
//!
//! why: keep the few most recent state machine snapshots on disk for recovery and log compaction
//! relations: filled from kv-core SnapshotHandle by the engine, read back on startup
//! what: FileSnapshotStore, SnapshotWriter, SnapshotMeta
//!
//! Layout: `<dir>/<id>.snap` holds the data and `<dir>/<id>.meta.json` its
//! metadata. The meta file is written last, so a snapshot only becomes
//! visible once its data is complete.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kv_core::ServerEntry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::{read_json, temp_path_for, write_json};

const META_SUFFIX: &str = ".meta.json";
const DATA_SUFFIX: &str = ".snap";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    /// Last log index the snapshot covers
    pub index: u64,
    pub term: u64,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    /// Membership in force at `index`
    pub configuration: Vec<ServerEntry>,
}

#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    retain: usize,
}

impl FileSnapshotStore {
    /// Open (creating if needed) a snapshot directory keeping `retain` snapshots.
    pub fn open(dir: impl Into<PathBuf>, retain: usize) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(StorageError::io(&dir))?;
        Ok(Self {
            dir,
            retain: retain.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start a new snapshot covering the log up to `index`.
    pub fn create(
        &self,
        index: u64,
        term: u64,
        configuration: Vec<ServerEntry>,
    ) -> Result<SnapshotWriter, StorageError> {
        let created_at = Utc::now();
        let id = format!("{term}-{index}-{}", created_at.timestamp_millis());
        let data_path = self.data_path(&id);
        let temp_path = temp_path_for(&data_path);
        let file = File::create(&temp_path).map_err(StorageError::io(&temp_path))?;

        Ok(SnapshotWriter {
            store: self.clone(),
            meta: SnapshotMeta {
                id,
                index,
                term,
                size: 0,
                created_at,
                configuration,
            },
            temp_path,
            file: Some(file),
            committed: false,
        })
    }

    /// All complete snapshots, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotMeta>, StorageError> {
        let entries = fs::read_dir(&self.dir).map_err(StorageError::io(&self.dir))?;
        let mut snapshots = Vec::new();
        for entry in entries {
            let path = entry.map_err(StorageError::io(&self.dir))?.path();
            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(META_SUFFIX));
            if !is_meta {
                continue;
            }
            match read_json::<SnapshotMeta>(&path) {
                Ok(Some(meta)) => snapshots.push(meta),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable snapshot meta"),
            }
        }
        snapshots.sort_by(|a, b| {
            (b.term, b.index, b.created_at, &b.id).cmp(&(a.term, a.index, a.created_at, &a.id))
        });
        Ok(snapshots)
    }

    pub fn latest(&self) -> Result<Option<SnapshotMeta>, StorageError> {
        Ok(self.list()?.into_iter().next())
    }

    /// Open a snapshot's data for reading.
    pub fn open_snapshot(&self, id: &str) -> Result<(SnapshotMeta, File), StorageError> {
        let meta_path = self.meta_path(id);
        let meta = read_json::<SnapshotMeta>(&meta_path)?.ok_or_else(|| StorageError::Io {
            path: meta_path.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, format!("no snapshot {id}")),
        })?;
        let data_path = self.data_path(id);
        let file = File::open(&data_path).map_err(StorageError::io(&data_path))?;
        Ok((meta, file))
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{DATA_SUFFIX}"))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{META_SUFFIX}"))
    }

    fn prune(&self) -> Result<(), StorageError> {
        let snapshots = self.list()?;
        if let Some(newest) = snapshots.first() {
            self.sweep_orphans((newest.term, newest.index))?;
        }
        for stale in snapshots.into_iter().skip(self.retain) {
            let meta_path = self.meta_path(&stale.id);
            fs::remove_file(&meta_path).map_err(StorageError::io(&meta_path))?;
            let data_path = self.data_path(&stale.id);
            if let Err(err) = fs::remove_file(&data_path) {
                if err.kind() != io::ErrorKind::NotFound {
                    return Err(StorageError::io(&data_path)(err));
                }
            }
            debug!(id = %stale.id, "pruned snapshot");
        }
        Ok(())
    }

    /// Remove data files with no meta that are older than `newest`.
    ///
    /// Newer ones may belong to a commit still in progress.
    fn sweep_orphans(&self, newest: (u64, u64)) -> Result<(), StorageError> {
        let entries = fs::read_dir(&self.dir).map_err(StorageError::io(&self.dir))?;
        for entry in entries {
            let path = entry.map_err(StorageError::io(&self.dir))?.path();
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(DATA_SUFFIX))
            else {
                continue;
            };
            let older = position_of(id).is_some_and(|position| position < newest);
            if !older || self.meta_path(id).exists() {
                continue;
            }
            fs::remove_file(&path).map_err(StorageError::io(&path))?;
            debug!(id, "removed orphaned snapshot data");
        }
        Ok(())
    }
}

/// `(term, index)` from an id of the form `<term>-<index>-<millis>`
fn position_of(id: &str) -> Option<(u64, u64)> {
    let mut parts = id.splitn(3, '-');
    let term = parts.next()?.parse().ok()?;
    let index = parts.next()?.parse().ok()?;
    Some((term, index))
}

/// An in-progress snapshot. Dropping it without [`SnapshotWriter::commit`]
/// discards the partial data.
#[derive(Debug)]
pub struct SnapshotWriter {
    store: FileSnapshotStore,
    meta: SnapshotMeta,
    temp_path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl SnapshotWriter {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Publish the snapshot and prune older ones beyond the retain count.
    pub fn commit(mut self) -> Result<SnapshotMeta, StorageError> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(StorageError::io(&self.temp_path))?;
        }
        let data_path = self.store.data_path(&self.meta.id);
        fs::rename(&self.temp_path, &data_path).map_err(StorageError::io(&data_path))?;
        self.committed = true;

        if let Err(err) = write_json(&self.store.meta_path(&self.meta.id), &self.meta) {
            // data without meta is invisible to list and prune
            if let Err(cleanup) = fs::remove_file(&data_path) {
                warn!(path = %data_path.display(), error = %cleanup, "could not remove unpublished snapshot data");
            }
            return Err(err);
        }
        info!(
            id = %self.meta.id,
            index = self.meta.index,
            term = self.meta.term,
            size = self.meta.size,
            "snapshot committed"
        );
        self.store.prune()?;
        Ok(self.meta.clone())
    }

    /// Abandon the snapshot
    pub fn cancel(self) {}
}

impl Write for SnapshotWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "snapshot writer closed"))?;
        let written = file.write(buf)?;
        self.meta.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}
