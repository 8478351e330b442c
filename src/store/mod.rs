//! Block store: the paged storage the index is built into and scanned from.
//!
//! The engine talks to storage through the [`BlockStore`] trait so the
//! embedder can supply its own buffer manager. Reads hand out pin-counted
//! RAII guards; all pointers derived from a pinned page become invalid once
//! the guard drops, so callers copy out anything they keep.
//!
//! Two implementations ship with the crate: [`MemBlockStore`] for tests and
//! lightweight embedding, and [`FileBlockStore`] with a checksummed file
//! header and an LRU frame cache.

mod file;
mod file_header;
mod lru;
mod mem;

pub use file::FileBlockStore;
pub use file_header::FileHeader;
pub use mem::MemBlockStore;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::page::PageBuf;
use crate::types::BlockId;

/// Interface to the embedder's paged storage.
///
/// Blocks are fixed-size. A committed block is never rewritten, with one
/// build-time exception: `set_rightlink` patches the rightlink word of the
/// previously emitted page while its level is still being written.
pub trait BlockStore: Send + Sync {
    /// Pin and read a block
    fn read(&self, block: BlockId) -> Result<PinnedBlock>;

    /// Append a new block, returning its id
    fn write_new(&self, page: PageBuf) -> Result<BlockId>;

    /// Stitch the rightlink of `prev` to point at `next`
    fn set_rightlink(&self, prev: BlockId, next: BlockId) -> Result<()>;

    /// Total number of blocks written so far
    fn block_count(&self) -> u64;

    /// Advise the store that `block` will be read soon. Best-effort; the
    /// default implementation does nothing.
    fn prefetch(&self, _block: BlockId) {}
}

/// An immutable in-memory copy of one block, shared between pins
pub struct Frame {
    block: BlockId,
    data: PageBuf,
    pins: AtomicU32,
}

impl Frame {
    /// Wrap a page buffer as an unpinned frame
    pub fn new(block: BlockId, data: PageBuf) -> Self {
        Self {
            block,
            data,
            pins: AtomicU32::new(0),
        }
    }

    /// Whether any pin is outstanding
    pub fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }
}

/// RAII pin on a block.
///
/// Holding the guard keeps the frame's bytes valid; dropping it releases
/// the pin.
pub struct PinnedBlock {
    frame: Arc<Frame>,
}

impl PinnedBlock {
    /// Pin a frame
    pub fn new(frame: Arc<Frame>) -> Self {
        frame.pins.fetch_add(1, Ordering::AcqRel);
        Self { frame }
    }

    /// Id of the pinned block
    pub fn block(&self) -> BlockId {
        self.frame.block
    }

    /// The page bytes; valid only while this pin is held
    pub fn data(&self) -> &[u8] {
        self.frame.data.as_bytes()
    }
}

impl Drop for PinnedBlock {
    fn drop(&mut self) {
        self.frame.pins.fetch_sub(1, Ordering::AcqRel);
    }
}
