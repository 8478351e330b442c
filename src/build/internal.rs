//! Internal-level builder.
//!
//! Groups the leaf list into internal pages bottom-up until one page
//! remains. Each internal entry is `(min_key_of_child, child_block)`; levels
//! are chained left-to-right like leaves.

use log::debug;

use crate::build::packer::LeafInfo;
use crate::error::Result;
use crate::page::codec::encode_internal;
use crate::store::BlockStore;
use crate::types::{BlockId, IndexOptions, Schema, PAGE_BODY_CAPACITY};

/// One child reference while a level is under construction
#[derive(Debug, Clone)]
pub struct NodeEntry {
    /// Minimum key of the child's subtree
    pub min_key: Vec<u8>,
    /// The child block
    pub block: BlockId,
}

/// Entry buffer for the level being built.
///
/// Sized from the fanout estimate up front; underfull fanout (tiny pages,
/// test caps) overruns the estimate and doubles.
struct LevelBuf {
    entries: Vec<NodeEntry>,
    cap: usize,
}

impl LevelBuf {
    fn with_estimate(cap: usize) -> Self {
        Self {
            entries: Vec::with_capacity(cap),
            cap,
        }
    }

    fn push(&mut self, entry: NodeEntry) {
        if self.entries.len() == self.cap {
            self.cap *= 2;
            self.entries.reserve_exact(self.cap - self.entries.len());
            debug!("internal level buffer doubled to {} entries", self.cap);
        }
        self.entries.push(entry);
    }
}

/// Result of building the upper levels
#[derive(Debug, Clone, Copy)]
pub struct TreeShape {
    /// The root block; a single-leaf tree's root is that leaf
    pub root: BlockId,
    /// Total levels including the leaf level; 0 for an empty tree
    pub height: u32,
    /// Internal pages written
    pub internal_pages: u64,
}

/// Build internal levels above `leaves` until a single root page remains
pub fn build_levels(
    leaves: &[LeafInfo],
    schema: &Schema,
    options: &IndexOptions,
    store: &dyn BlockStore,
) -> Result<TreeShape> {
    if leaves.is_empty() {
        return Ok(TreeShape {
            root: BlockId::NONE,
            height: 0,
            internal_pages: 0,
        });
    }

    let key_width = schema.key_width();
    let schema_id = schema.fingerprint();

    // Entries that fit one internal page body; fanout below 2 cannot shrink
    // a level
    let natural_fanout = PAGE_BODY_CAPACITY / (key_width + 8);
    let fanout = options
        .knobs
        .fanout_cap
        .unwrap_or(natural_fanout)
        .min(natural_fanout)
        .max(2);

    let mut level: Vec<NodeEntry> = leaves
        .iter()
        .map(|leaf| NodeEntry {
            min_key: leaf.first_key.clone(),
            block: leaf.block,
        })
        .collect();
    let mut height = 1u32;
    let mut internal_pages = 0u64;

    while level.len() > 1 {
        height += 1;
        let estimate = (level.len().div_ceil(2) + 2).max(2);
        let mut next = LevelBuf::with_estimate(estimate);
        let mut prev_block: Option<BlockId> = None;

        for chunk in level.chunks(fanout) {
            let entries: Vec<(Vec<u8>, BlockId)> = chunk
                .iter()
                .map(|e| (e.min_key.clone(), e.block))
                .collect();
            let page = encode_internal(&entries, height as u16 - 1, key_width, schema_id);
            let block = store.write_new(page)?;
            if let Some(prev) = prev_block {
                store.set_rightlink(prev, block)?;
            }
            prev_block = Some(block);
            internal_pages += 1;

            next.push(NodeEntry {
                min_key: chunk[0].min_key.clone(),
                block,
            });
        }

        debug!(
            "built level {}: {} pages over {} children (fanout {})",
            height - 1,
            next.entries.len(),
            level.len(),
            fanout
        );
        level = next.entries;
    }

    Ok(TreeShape {
        root: level[0].block,
        height,
        internal_pages,
    })
}
