//! # snapshot
//!
//! why: carry a point-in-time copy of the map out of the state machine without holding its lock
//! relations: produced by fsm.rs, written into kv-storage's snapshot store by the engine
//! what: SnapshotHandle with persist/release

use std::io::Write;

use crate::error::SnapshotError;

/// Serialized map bytes retained until the engine persists or drops them.
#[derive(Debug)]
pub struct SnapshotHandle {
    data: Option<Vec<u8>>,
}

impl SnapshotHandle {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: Some(data) }
    }

    /// Size of the retained bytes, 0 once released
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the retained bytes to the engine-supplied destination.
    pub fn persist<W: Write + ?Sized>(&self, sink: &mut W) -> Result<(), SnapshotError> {
        let data = self.data.as_deref().ok_or(SnapshotError::Released)?;
        sink.write_all(data)?;
        sink.flush()?;
        Ok(())
    }

    /// Drop the retained buffer. Safe to call more than once, or without persisting.
    pub fn release(&mut self) {
        self.data = None;
    }
}
