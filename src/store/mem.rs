//! In-memory block store.
//!
//! The reference store: a vector of immutable frames behind a lock. Reads
//! share frames via `Arc`, so pins are zero-copy. Used by tests and by
//! embedders that keep whole indexes resident.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{IndexError, Result};
use crate::page::{PageBuf, PageHeader};
use crate::store::{BlockStore, Frame, PinnedBlock};
use crate::types::BlockId;

/// A block store backed by process memory
#[derive(Default)]
pub struct MemBlockStore {
    frames: RwLock<Vec<Arc<Frame>>>,
}

impl MemBlockStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any pin is outstanding on `block`; diagnostic only
    pub fn is_pinned(&self, block: BlockId) -> bool {
        self.frames
            .read()
            .get(block.value() as usize)
            .is_some_and(|frame| frame.is_pinned())
    }
}

impl BlockStore for MemBlockStore {
    fn read(&self, block: BlockId) -> Result<PinnedBlock> {
        let frames = self.frames.read();
        let frame = frames
            .get(block.value() as usize)
            .ok_or(IndexError::BlockNotFound(block))?;
        Ok(PinnedBlock::new(Arc::clone(frame)))
    }

    fn write_new(&self, page: PageBuf) -> Result<BlockId> {
        let mut frames = self.frames.write();
        let block = BlockId::new(frames.len() as u64);
        frames.push(Arc::new(Frame::new(block, page)));
        Ok(block)
    }

    fn set_rightlink(&self, prev: BlockId, next: BlockId) -> Result<()> {
        let mut frames = self.frames.write();
        let slot = frames
            .get_mut(prev.value() as usize)
            .ok_or(IndexError::BlockNotFound(prev))?;

        // Frames are immutable once shared; replace with a patched copy.
        // Outstanding pins keep reading the old bytes, which only happens
        // during build where no concurrent reader exists.
        let mut patched = PageBuf::from_bytes(PinnedBlock::new(Arc::clone(slot)).data());
        PageHeader::patch_rightlink(patched.as_bytes_mut(), next);
        *slot = Arc::new(Frame::new(prev, patched));
        Ok(())
    }

    fn block_count(&self) -> u64 {
        self.frames.read().len() as u64
    }
}
