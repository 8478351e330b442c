//! Build pipeline: sorted collector, leaf packer, internal levels.
//!
//! Data flows top to bottom exactly once per index: the embedder pushes a
//! sorted stream into the collector, the packer slices it into leaf pages,
//! and the internal-level builder stacks separators bottom-up until a root
//! remains. The build transaction owns all intermediate buffers; the block
//! store keeps only the finished pages.

pub mod collector;
pub mod internal;
pub mod packer;

pub use collector::{SortedView, TupleCollector};
pub use internal::{build_levels, NodeEntry, TreeShape};
pub use packer::{pack_leaves, LeafInfo, PackCounters};

use log::debug;

use crate::error::{IndexError, Result};
use crate::stats::IndexStats;
use crate::store::BlockStore;
use crate::types::{IndexOptions, Schema};

/// Everything `finish` hands back to the index handle
pub struct BuildOutput {
    /// Root and height
    pub shape: TreeShape,
    /// Leaves in chain order
    pub leaves: Vec<LeafInfo>,
    /// Inspector statistics
    pub stats: IndexStats,
}

/// Accumulates the build stream and drives the pipeline.
///
/// ```rust,ignore
/// let mut builder = IndexBuilder::new(schema, IndexOptions::default());
/// for (key, value) in sorted_stream {
///     builder.push(&key, None, &[&value], 0)?;
/// }
/// let index = builder.finish(store)?;
/// ```
pub struct IndexBuilder {
    collector: TupleCollector,
    options: IndexOptions,
}

impl IndexBuilder {
    /// Create a builder for `schema`
    pub fn new(schema: Schema, options: IndexOptions) -> Self {
        Self {
            collector: TupleCollector::new(schema),
            options,
        }
    }

    /// The build options
    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// The schema tuples are collected under
    pub fn schema(&self) -> &Schema {
        self.collector.schema()
    }

    /// Tuples pushed so far
    pub fn len(&self) -> usize {
        self.collector.len()
    }

    /// Whether nothing has been pushed yet
    pub fn is_empty(&self) -> bool {
        self.collector.is_empty()
    }

    /// Push one tuple of the sorted stream; see [`TupleCollector::push`]
    pub fn push(
        &mut self,
        key1: &[u8],
        key2: Option<&[u8]>,
        payload: &[&[u8]],
        null_mask: u32,
    ) -> Result<()> {
        self.collector.push(key1, key2, payload, null_mask)
    }

    /// Pack leaves, build internal levels, and return the finished tree.
    ///
    /// On error every block already emitted is abandoned to the store; the
    /// embedder discards the store contents with the failed build.
    pub fn finish(self, store: &dyn BlockStore) -> Result<BuildOutput> {
        let view = self.collector.finish();
        let schema = self.collector.schema();

        let (leaves, counters) = pack_leaves(&view, &self.options, store)?;
        verify_leaf_order(&leaves)?;
        let shape = build_levels(&leaves, schema, &self.options, store)?;
        let stats = IndexStats::from_build(&counters, &shape, leaves.len() as u64);

        debug!(
            "build finished: {} tuples, {} pages, height {}",
            stats.tuple_count, stats.total_pages, stats.height
        );

        Ok(BuildOutput {
            shape,
            leaves,
            stats,
        })
    }
}

/// Cross-page ordering self-check: every leaf seam must be non-decreasing.
///
/// The collector debug-asserts adjacent pushes; this re-checks the packed
/// page boundaries in release builds too, failing the build before internal
/// levels are stacked on top of an unsorted leaf chain.
fn verify_leaf_order(leaves: &[LeafInfo]) -> Result<()> {
    for pair in leaves.windows(2) {
        if pair[0].last_key > pair[1].first_key {
            return Err(IndexError::corruption(format!(
                "unsorted build stream: leaf {} ends after leaf {} begins",
                pair[0].block, pair[1].block
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::FormatTag;
    use crate::store::MemBlockStore;
    use crate::types::BlockId;

    #[test]
    fn test_leaf_seam_order_check() {
        let leaf = |block: u64, first: u32, last: u32| LeafInfo {
            block: BlockId::new(block),
            first_key: first.to_be_bytes().to_vec(),
            last_key: last.to_be_bytes().to_vec(),
            nitems: 1,
            format: FormatTag::Plain,
        };

        assert!(verify_leaf_order(&[]).is_ok());
        assert!(verify_leaf_order(&[leaf(0, 1, 5), leaf(1, 5, 9)]).is_ok());

        // A seam where the left leaf ends past the right leaf's start
        assert!(matches!(
            verify_leaf_order(&[leaf(0, 1, 7), leaf(1, 6, 9)]),
            Err(IndexError::Corruption(_))
        ));
    }

    #[test]
    fn test_empty_build() -> Result<()> {
        let schema = Schema::single_key(4).unwrap();
        let builder = IndexBuilder::new(schema, IndexOptions::default());
        let store = MemBlockStore::new();

        let out = builder.finish(&store)?;
        assert_eq!(out.shape.height, 0);
        assert_eq!(out.stats.total_pages, 0);
        assert!(out.leaves.is_empty());
        Ok(())
    }

    #[test]
    fn test_build_leaves_then_levels() -> Result<()> {
        let schema = Schema::single_key(4).unwrap();
        let mut builder = IndexBuilder::new(schema, IndexOptions::default());
        for k in 0..10_000u32 {
            builder.push(&k.to_be_bytes(), None, &[], 0)?;
        }
        let store = MemBlockStore::new();
        let out = builder.finish(&store)?;

        assert_eq!(out.stats.tuple_count, 10_000);
        assert!(out.shape.height >= 2);
        assert_eq!(
            out.stats.total_pages,
            store.block_count()
        );
        // Leaves occupy the low block ids, internal levels follow
        assert_eq!(out.leaves[0].block.value(), 0);
        assert!(out.shape.root.value() >= out.leaves.len() as u64 - 1);
        Ok(())
    }
}
