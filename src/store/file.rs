//! File-backed block store.
//!
//! Blocks live at fixed offsets after a checksummed header page. Writes are
//! append-only during build; reads go through a pin-counted frame cache with
//! LRU eviction. Frames are never dirty — the index is read-only once built —
//! so eviction is a plain drop.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{IndexError, Result};
use crate::page::{PageBuf, RIGHTLINK_OFFSET};
use crate::store::file_header::{FileHeader, FILE_HEADER_SIZE};
use crate::store::lru::LruList;
use crate::store::{BlockStore, Frame, PinnedBlock};
use crate::types::{BlockId, PAGE_SIZE};

/// Default frame-cache capacity in blocks
const DEFAULT_CACHE_BLOCKS: usize = 1024;

struct FrameCache {
    frames: HashMap<u64, Arc<Frame>>,
    lru: LruList,
    capacity: usize,
}

impl FrameCache {
    fn insert(&mut self, block: BlockId, frame: Arc<Frame>) {
        if self.frames.len() >= self.capacity {
            // Evict the coldest unpinned frame; if everything is pinned the
            // cache temporarily overshoots its capacity.
            let victim = self
                .lru
                .iter_lru()
                .find(|b| self.frames.get(b).is_some_and(|f| !f.is_pinned()));
            if let Some(victim) = victim {
                self.frames.remove(&victim);
                self.lru.remove(victim);
            }
        }
        self.frames.insert(block.value(), frame);
        self.lru.touch(block.value());
    }

    fn get(&mut self, block: BlockId) -> Option<Arc<Frame>> {
        let frame = self.frames.get(&block.value()).cloned()?;
        self.lru.touch(block.value());
        Some(frame)
    }

    fn remove(&mut self, block: BlockId) {
        self.frames.remove(&block.value());
        self.lru.remove(block.value());
    }
}

/// A block store backed by a single index file
pub struct FileBlockStore {
    file: Mutex<File>,
    header: RwLock<FileHeader>,
    cache: Mutex<FrameCache>,
}

impl FileBlockStore {
    /// Create a new index file, truncating any existing one
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let header = FileHeader::new();
        let mut buf = vec![0u8; FILE_HEADER_SIZE];
        header.write(&mut buf);
        (&file).write_all(&buf)?;

        Ok(Self::with_parts(file, header))
    }

    /// Open an existing index file, verifying its header
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if file.metadata()?.len() < FILE_HEADER_SIZE as u64 {
            return Err(IndexError::invalid_store("file shorter than header"));
        }

        let mut buf = vec![0u8; FILE_HEADER_SIZE];
        let mut reader = &file;
        reader.read_exact(&mut buf)?;
        let header = FileHeader::read(&buf)?;

        Ok(Self::with_parts(file, header))
    }

    fn with_parts(file: File, header: FileHeader) -> Self {
        Self {
            file: Mutex::new(file),
            header: RwLock::new(header),
            cache: Mutex::new(FrameCache {
                frames: HashMap::with_capacity(DEFAULT_CACHE_BLOCKS),
                lru: LruList::new(DEFAULT_CACHE_BLOCKS),
                capacity: DEFAULT_CACHE_BLOCKS,
            }),
        }
    }

    /// Persist the tree shape and sync the file; called once at build end
    pub fn finalize(&self, root: BlockId, height: u32, leaf_count: u64) -> Result<()> {
        let mut header = self.header.write();
        header.root_block = root;
        header.height = height;
        header.leaf_count = leaf_count;

        let mut buf = vec![0u8; FILE_HEADER_SIZE];
        header.write(&mut buf);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }

    /// Root block recorded in the file header
    pub fn root_block(&self) -> BlockId {
        self.header.read().root_block
    }

    /// Tree height recorded in the file header
    pub fn height(&self) -> u32 {
        self.header.read().height
    }

    /// Leaf count recorded in the file header
    pub fn leaf_count(&self) -> u64 {
        self.header.read().leaf_count
    }

    fn block_offset(block: BlockId) -> u64 {
        FILE_HEADER_SIZE as u64 + block.value() * PAGE_SIZE as u64
    }

    fn load_frame(&self, block: BlockId) -> Result<Arc<Frame>> {
        if block.value() >= self.header.read().block_count {
            return Err(IndexError::BlockNotFound(block));
        }

        if let Some(frame) = self.cache.lock().get(block) {
            return Ok(frame);
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(Self::block_offset(block)))?;
            file.read_exact(&mut buf)?;
        }

        let frame = Arc::new(Frame::new(block, PageBuf::from_bytes(&buf)));
        self.cache.lock().insert(block, Arc::clone(&frame));
        Ok(frame)
    }
}

impl BlockStore for FileBlockStore {
    fn read(&self, block: BlockId) -> Result<PinnedBlock> {
        Ok(PinnedBlock::new(self.load_frame(block)?))
    }

    fn write_new(&self, page: PageBuf) -> Result<BlockId> {
        let block = {
            let mut header = self.header.write();
            let block = BlockId::new(header.block_count);
            header.block_count += 1;
            block
        };

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::block_offset(block)))?;
        file.write_all(page.as_bytes())?;
        Ok(block)
    }

    fn set_rightlink(&self, prev: BlockId, next: BlockId) -> Result<()> {
        if prev.value() >= self.header.read().block_count {
            return Err(IndexError::BlockNotFound(prev));
        }

        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(Self::block_offset(prev) + RIGHTLINK_OFFSET as u64))?;
            file.write_all(&next.value().to_le_bytes())?;
        }

        // A cached copy of the patched page is stale now
        self.cache.lock().remove(prev);
        Ok(())
    }

    fn block_count(&self) -> u64 {
        self.header.read().block_count
    }

    fn prefetch(&self, block: BlockId) {
        // Warm the frame cache; failures here surface on the real read
        let _ = self.load_frame(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_write_reopen() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");

        let store = FileBlockStore::create(&path)?;
        let mut page = PageBuf::new();
        page.as_bytes_mut()[500] = 7;
        let block = store.write_new(page)?;
        store.write_new(PageBuf::new())?;
        store.finalize(BlockId::new(1), 2, 1)?;
        drop(store);

        let reopened = FileBlockStore::open(&path)?;
        assert_eq!(reopened.block_count(), 2);
        assert_eq!(reopened.root_block(), BlockId::new(1));
        assert_eq!(reopened.height(), 2);
        assert_eq!(reopened.leaf_count(), 1);

        let pin = reopened.read(block)?;
        assert_eq!(pin.data()[500], 7);
        Ok(())
    }

    #[test]
    fn test_rightlink_patch_visible_after_cache_drop() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");

        let store = FileBlockStore::create(&path)?;
        let a = store.write_new(PageBuf::new())?;
        let b = store.write_new(PageBuf::new())?;

        // Populate the cache, then patch
        let _ = store.read(a)?;
        store.set_rightlink(a, b)?;

        let pin = store.read(a)?;
        assert_eq!(
            u64::from_le_bytes(pin.data()[8..16].try_into().unwrap()),
            b.value()
        );
        Ok(())
    }

    #[test]
    fn test_read_past_end() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        let store = FileBlockStore::create(&path)?;
        assert!(matches!(
            store.read(BlockId::new(0)),
            Err(IndexError::BlockNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_prefetch_warms_cache() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        let store = FileBlockStore::create(&path)?;
        let block = store.write_new(PageBuf::new())?;

        store.prefetch(block);
        assert!(store.cache.lock().get(block).is_some());
        Ok(())
    }
}
