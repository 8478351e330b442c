//! # BTree Index Engine
//!
//! A read-only, compressed B+tree index engine for analytical index-only
//! scans over append-only data.
//!
//! ## Architecture
//!
//! The engine is composed of modular, swappable components:
//!
//! - **Page Layer** (`page`): four leaf formats (plain, key-RLE,
//!   include-RLE, zero-copy) plus internal nodes, behind one codec
//! - **Store Layer** (`store`): paged block storage with pin/unpin reads;
//!   in-memory and file-backed implementations included
//! - **Build Pipeline** (`build`): sorted collector, format-selecting leaf
//!   packer, bottom-up internal levels
//! - **Scan Engine** (`scan`): forward/backward cursors with page-level
//!   pruning, runtime keys, prefetch, and a parallel claim coordinator
//!
//! ## Usage
//!
//! ```rust,ignore
//! use btree_index::{Index, IndexBuilder, IndexOptions, MemBlockStore, Schema};
//! use btree_index::{ScanBounds, ScanRequest};
//! use std::sync::Arc;
//!
//! let mut builder = IndexBuilder::new(Schema::single_key(8)?, IndexOptions::default());
//! for key in sorted_keys {
//!     builder.push(&key, None, &[], 0)?;
//! }
//! let index = Index::create(builder, Arc::new(MemBlockStore::new()))?;
//!
//! let mut scan = index.scan(ScanRequest::forward(ScanBounds::unbounded()))?;
//! while let Some(tuple) = scan.next()? {
//!     // tuple.key, tuple.payload
//! }
//! ```
//!
//! A tree is created by exactly one build and is read-only afterwards:
//! mutation entry points exist only to fail with `ReadOnly`.

pub mod build;
pub mod error;
pub mod page;
pub mod scan;
pub mod stats;
pub mod store;
pub mod types;

pub use build::IndexBuilder;
pub use error::{IndexError, Result};
pub use scan::{
    BoundOp, Direction, ParallelScan, RuntimeKey, ScanBounds, ScanCursor, ScanKey, ScanRequest,
    Tuple,
};
pub use stats::IndexStats;
pub use store::{BlockStore, FileBlockStore, MemBlockStore};
pub use types::{
    BlockId, Collation, IncludeColumn, IndexOptions, KeyColumn, Schema, PAGE_SIZE,
};

use std::sync::Arc;

use crate::build::{PackCounters, TreeShape};
use crate::page::{bloom, DecodedPage, FormatTag, PageView};

/// Shape and configuration of one built tree.
///
/// The embedder's catalog owns this between sessions; the file store
/// persists the tree shape in its header so [`Index::open_file`] can restore
/// it without the catalog.
#[derive(Debug, Clone)]
pub struct IndexMeta {
    /// Tuple schema the index was built under
    pub schema: Schema,
    /// Options the index was built (and is scanned) with
    pub options: IndexOptions,
    /// Root block; `BlockId::NONE` for an empty index
    pub root: BlockId,
    /// Levels including leaves; 0 for an empty index
    pub height: u32,
    /// Leaves occupy block ids `0..leaf_count`
    pub leaf_count: u64,
    /// All blocks, leaves and internal
    pub block_count: u64,
    /// Inspector statistics collected at build
    pub stats: IndexStats,
}

/// Handle to one built, read-only index
#[derive(Clone)]
pub struct Index {
    store: Arc<dyn BlockStore>,
    meta: Arc<IndexMeta>,
}

impl Index {
    /// Run the build pipeline and wrap the finished tree
    pub fn create(builder: IndexBuilder, store: Arc<dyn BlockStore>) -> Result<Self> {
        let schema = builder.schema().clone();
        let options = builder.options().clone();
        let output = builder.finish(store.as_ref())?;

        let meta = IndexMeta {
            schema,
            options,
            root: output.shape.root,
            height: output.shape.height,
            leaf_count: output.leaves.len() as u64,
            block_count: store.block_count(),
            stats: output.stats,
        };
        Ok(Self {
            store,
            meta: Arc::new(meta),
        })
    }

    /// Build into a file store and persist the tree shape in its header
    pub fn create_in_file(builder: IndexBuilder, store: Arc<FileBlockStore>) -> Result<Self> {
        let index = Self::create(builder, store.clone())?;
        store.finalize(index.meta.root, index.meta.height, index.meta.leaf_count)?;
        Ok(index)
    }

    /// Reopen an index from its file store; statistics are recomputed by
    /// walking the leaves
    pub fn open_file(
        store: Arc<FileBlockStore>,
        schema: Schema,
        options: IndexOptions,
    ) -> Result<Self> {
        let meta = IndexMeta {
            schema,
            options,
            root: store.root_block(),
            height: store.height(),
            leaf_count: store.leaf_count(),
            block_count: store.block_count(),
            stats: IndexStats::default(),
        };
        let mut index = Self {
            store,
            meta: Arc::new(meta),
        };
        let stats = index.inspect()?;
        Arc::get_mut(&mut index.meta)
            .expect("meta is unshared during open")
            .stats = stats;
        Ok(index)
    }

    /// The tree shape and configuration
    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub(crate) fn store(&self) -> &dyn BlockStore {
        self.store.as_ref()
    }

    /// Build-time inspector statistics
    pub fn stats(&self) -> &IndexStats {
        &self.meta.stats
    }

    /// Open a scan
    pub fn scan(&self, request: ScanRequest) -> Result<ScanCursor<'_>> {
        ScanCursor::open(self, request)
    }

    /// Run `workers` cooperating workers over one parallel scan and return
    /// the bag union of their results
    pub fn parallel_scan(&self, request: ScanRequest, workers: usize) -> Result<Vec<Tuple>> {
        let workers = self
            .meta
            .options
            .knobs
            .force_parallel_workers
            .unwrap_or(workers)
            .max(1);
        let scan = ParallelScan::new(self, request)?;

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers).map(|_| scope.spawn(|| scan.run())).collect();
            let mut all = Vec::new();
            for handle in handles {
                all.extend(handle.join().expect("scan worker panicked")?);
            }
            Ok(all)
        })
    }

    /// Planner cost estimate for reading `est_pages` pages and emitting
    /// `est_tuples` tuples; scalar only, no correctness effect
    pub fn scan_cost(&self, est_pages: u64, est_tuples: u64) -> f64 {
        est_pages as f64 * self.meta.options.cost_page
            + est_tuples as f64 * self.meta.options.cost_tup
    }

    /// Recompute inspector statistics by walking every leaf
    pub fn inspect(&self) -> Result<IndexStats> {
        let meta = &*self.meta;
        let key_width = meta.schema.key_width();
        let mut counters = PackCounters::default();

        for id in 0..meta.leaf_count {
            let block = BlockId::new(id);
            let pin = self.store.read(block)?;
            let page = DecodedPage::parse(pin.data(), block, &meta.schema)?;
            let view = PageView::new(pin.data(), &page);
            let n = view.count() as usize;

            let mut plain = n * key_width;
            for (col, spec) in meta.schema.include_columns().iter().enumerate() {
                plain += match spec.width {
                    Some(w) => n * w,
                    None => {
                        (n + 1) * 2
                            + (0..n).map(|pos| view.payload_at(pos, col).len()).sum::<usize>()
                    }
                };
            }

            let nruns = page.header.nruns as usize;
            let mut used = match page.header.tag {
                FormatTag::Plain => plain,
                FormatTag::ZeroCopy => n * key_width,
                FormatTag::KeyRle => nruns * (key_width + 2) + (plain - n * key_width),
                FormatTag::IncludeRle => {
                    nruns
                        * (key_width
                            + 2
                            + meta.schema.fixed_payload_width().unwrap_or(0))
                }
                FormatTag::Internal => unreachable!("leaf region holds leaves only"),
            };
            if page.header.flags.has_bloom() {
                used += bloom::section_size();
            }

            match page.header.tag {
                FormatTag::Plain => counters.plain_pages += 1,
                FormatTag::KeyRle => counters.key_rle_pages += 1,
                FormatTag::IncludeRle => counters.inc_rle_pages += 1,
                FormatTag::ZeroCopy => counters.zerocopy_pages += 1,
                FormatTag::Internal => unreachable!(),
            }
            counters.used_bytes += used as u64;
            counters.plain_bytes += plain as u64;
            counters.tuple_count += n as u64;
        }

        let shape = TreeShape {
            root: meta.root,
            height: meta.height,
            internal_pages: meta.block_count - meta.leaf_count,
        };
        Ok(IndexStats::from_build(&counters, &shape, meta.leaf_count))
    }

    /// Unsupported: the index is created by a single build transaction
    pub fn insert(&self, _key: &[u8], _payload: &[&[u8]]) -> Result<()> {
        Err(IndexError::ReadOnly("INSERT"))
    }

    /// Unsupported: the index is created by a single build transaction
    pub fn update(&self, _key: &[u8], _payload: &[&[u8]]) -> Result<()> {
        Err(IndexError::ReadOnly("UPDATE"))
    }

    /// Unsupported: the index is created by a single build transaction
    pub fn delete(&self, _key: &[u8]) -> Result<()> {
        Err(IndexError::ReadOnly("DELETE"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{InternalView, PageHeader};
    use crate::scan::interrupt;
    use crate::types::Toggle;

    fn be4(k: u32) -> Vec<u8> {
        k.to_be_bytes().to_vec()
    }

    fn build_u32_index(
        keys: impl IntoIterator<Item = u32>,
        payload: impl Fn(u32) -> Option<Vec<u8>>,
        options: IndexOptions,
    ) -> (Index, Arc<MemBlockStore>) {
        let schema = match payload(0) {
            Some(_) => Schema::new(
                vec![KeyColumn::fixed(4).unwrap()],
                vec![IncludeColumn::fixed(4).unwrap()],
            )
            .unwrap(),
            None => Schema::single_key(4).unwrap(),
        };
        let mut builder = IndexBuilder::new(schema, options);
        for k in keys {
            match payload(k) {
                Some(value) => builder.push(&k.to_be_bytes(), None, &[&value], 0).unwrap(),
                None => builder.push(&k.to_be_bytes(), None, &[], 0).unwrap(),
            }
        }
        let store = Arc::new(MemBlockStore::new());
        let index = Index::create(builder, store.clone()).unwrap();
        (index, store)
    }

    fn forward_all(index: &Index) -> Vec<Tuple> {
        let mut cursor = index
            .scan(ScanRequest::forward(ScanBounds::unbounded()))
            .unwrap();
        cursor.collect_remaining().unwrap()
    }

    // Scenario: unique 4-byte keys with a computed INCLUDE column
    #[test]
    fn test_unique_keys_with_include() -> Result<()> {
        let (index, _) = build_u32_index(
            1..=100_000,
            |k| Some((k * 2).to_le_bytes().to_vec()),
            IndexOptions::default(),
        );

        let bounds = ScanBounds::range(Some((be4(50_000), true)), None);
        let mut cursor = index.scan(ScanRequest::forward(bounds))?;
        let tuples = cursor.collect_remaining()?;

        assert_eq!(tuples.len(), 50_001);
        let sum: u64 = tuples
            .iter()
            .map(|t| u32::from_le_bytes(t.payload[0].as_slice().try_into().unwrap()) as u64)
            .sum();
        let expected: u64 = 2 * (50_000..=100_000u64).sum::<u64>();
        assert_eq!(sum, expected);
        Ok(())
    }

    // Scenario: heavy duplicates with a constant INCLUDE column
    #[test]
    fn test_heavy_duplicates_compress() -> Result<()> {
        let (index, _) = build_u32_index(
            (0..100_000u32).map(|i| i / 10_000),
            |_| Some(111u32.to_le_bytes().to_vec()),
            IndexOptions::default(),
        );

        let mut cursor = index.scan(ScanRequest::forward(ScanBounds::equality(be4(5))))?;
        let tuples = cursor.collect_remaining()?;
        assert_eq!(tuples.len(), 10_000);
        assert!(tuples.iter().all(|t| t.payload[0] == 111u32.to_le_bytes()));

        let stats = index.stats();
        assert!(stats.inc_rle_pages > 0);
        assert!(stats.compression_pct <= 50.0);

        // A reopened inspector walk agrees with the build-time counters
        let walked = index.inspect()?;
        assert_eq!(walked.inc_rle_pages, stats.inc_rle_pages);
        assert_eq!(walked.tuple_count, stats.tuple_count);
        Ok(())
    }

    // Scenario: two-key correlated index with a runtime key on the second column
    #[test]
    fn test_two_key_with_runtime_key() -> Result<()> {
        let schema = Schema::new(
            vec![KeyColumn::fixed(2).unwrap(), KeyColumn::fixed(2).unwrap()],
            vec![],
        )
        .unwrap();

        let mut pairs: Vec<(u16, u16)> = (1..=100_000u32)
            .map(|i| ((i % 1000) as u16, (i % 100) as u16))
            .collect();
        pairs.sort_unstable();

        let mut builder = IndexBuilder::new(schema, IndexOptions::default());
        for (k1, k2) in &pairs {
            builder.push(&k1.to_be_bytes(), Some(&k2.to_be_bytes()), &[], 0)?;
        }
        let index = Index::create(builder, Arc::new(MemBlockStore::new()))?;

        let mut lower = 500u16.to_be_bytes().to_vec();
        lower.extend_from_slice(&0u16.to_be_bytes());
        let bounds = ScanBounds::range(Some((lower, true)), None);

        let second_key_is_50: RuntimeKey =
            Arc::new(|t: &crate::scan::TupleRef<'_>| t.key()[2..4] == 50u16.to_be_bytes());
        let mut cursor = index.scan(
            ScanRequest::forward(bounds).with_runtime_key(second_key_is_50),
        )?;
        let tuples = cursor.collect_remaining()?;

        assert_eq!(tuples.len(), 500);
        assert!(tuples.windows(2).all(|w| w[0].key <= w[1].key));
        let k1_floor = 500u16.to_be_bytes();
        assert!(tuples
            .iter()
            .all(|t| &t.key[0..2] >= &k1_floor[..] && t.key[2..4] == 50u16.to_be_bytes()));
        Ok(())
    }

    // Scenario: backward scan over one long equality run
    #[test]
    fn test_backward_equality_run() -> Result<()> {
        let schema = Schema::new(
            vec![KeyColumn::fixed(4).unwrap()],
            vec![IncludeColumn::fixed(4).unwrap()],
        )
        .unwrap();
        let mut builder = IndexBuilder::new(schema, IndexOptions::default());
        for x in 1..=20_000u32 {
            builder.push(&7u32.to_be_bytes(), None, &[&x.to_be_bytes()], 0)?;
        }
        let index = Index::create(builder, Arc::new(MemBlockStore::new()))?;

        let mut cursor = index.scan(ScanRequest::backward(ScanBounds::equality(be4(7))))?;
        let mut top = Vec::new();
        for _ in 0..5 {
            let tuple = cursor.next()?.expect("run has 20000 tuples");
            top.push(u32::from_be_bytes(tuple.payload[0].as_slice().try_into().unwrap()));
        }
        assert_eq!(top, vec![20_000, 19_999, 19_998, 19_997, 19_996]);
        Ok(())
    }

    // Scenario: tall tree navigation under fanout and page caps
    #[test]
    fn test_tall_tree_backward_navigation() -> Result<()> {
        let mut options = IndexOptions::default();
        options.knobs.fanout_cap = Some(10);
        options.knobs.tuples_per_page_cap = Some(50);

        let (index, _) = build_u32_index(0..100_000, |_| None, options);
        assert!(index.meta().height >= 4);

        let bounds = ScanBounds::range(None, Some((be4(10_000), true)));
        let mut cursor = index.scan(ScanRequest::backward(bounds))?;
        let tuples = cursor.collect_remaining()?;

        assert_eq!(tuples.len(), 10_001);
        assert_eq!(tuples[0].key, be4(10_000));
        assert_eq!(tuples.last().unwrap().key, be4(0));
        assert!(tuples.windows(2).all(|w| w[0].key >= w[1].key));
        Ok(())
    }

    // Scenario: mutation attempts surface ReadOnly
    #[test]
    fn test_read_only_enforcement() {
        let (index, _) = build_u32_index(0..100, |_| None, IndexOptions::default());
        assert!(matches!(
            index.insert(&be4(5), &[]),
            Err(IndexError::ReadOnly("INSERT"))
        ));
        assert!(matches!(
            index.update(&be4(5), &[]),
            Err(IndexError::ReadOnly("UPDATE"))
        ));
        assert!(matches!(index.delete(&be4(5)), Err(IndexError::ReadOnly("DELETE"))));
    }

    #[test]
    fn test_round_trip_forward_and_backward() -> Result<()> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(42);
        let mut keys: Vec<u32> = (0..30_000).map(|_| rng.gen_range(0..3_000)).collect();
        keys.sort_unstable();

        let (index, _) = build_u32_index(keys.iter().copied(), |_| None, IndexOptions::default());

        let forward = forward_all(&index);
        assert_eq!(forward.len(), keys.len());
        assert!(forward
            .iter()
            .zip(&keys)
            .all(|(tuple, k)| tuple.key == k.to_be_bytes()));

        let mut cursor = index.scan(ScanRequest::backward(ScanBounds::unbounded()))?;
        let backward = cursor.collect_remaining()?;
        assert_eq!(backward.len(), keys.len());
        assert!(backward
            .iter()
            .zip(keys.iter().rev())
            .all(|(tuple, k)| tuple.key == k.to_be_bytes()));
        Ok(())
    }

    #[test]
    fn test_range_scans_match_naive_filter() -> Result<()> {
        let keys: Vec<u32> = (0..5_000).map(|i| i / 3).collect();
        let (index, _) = build_u32_index(keys.iter().copied(), |_| None, IndexOptions::default());

        for (lower, lower_inc, upper, upper_inc) in [
            (100u32, true, 900u32, true),
            (100, false, 900, false),
            (0, true, 0, true),
            (4_999, false, 5_000, true),
        ] {
            let bounds = ScanBounds::range(
                Some((be4(lower), lower_inc)),
                Some((be4(upper), upper_inc)),
            );
            let mut cursor = index.scan(ScanRequest::forward(bounds))?;
            let got = cursor.collect_remaining()?;

            let expected: Vec<u32> = keys
                .iter()
                .copied()
                .filter(|&k| {
                    (if lower_inc { k >= lower } else { k > lower })
                        && (if upper_inc { k <= upper } else { k < upper })
                })
                .collect();
            assert_eq!(got.len(), expected.len(), "bounds {:?}", (lower, upper));
            assert!(got
                .iter()
                .zip(&expected)
                .all(|(tuple, k)| tuple.key == k.to_be_bytes()));
        }
        Ok(())
    }

    #[test]
    fn test_empty_index_scans_empty() -> Result<()> {
        let (index, _) = build_u32_index(0..0, |_| None, IndexOptions::default());
        assert_eq!(index.meta().height, 0);
        assert_eq!(index.stats().total_pages, 0);

        assert!(forward_all(&index).is_empty());
        let mut cursor = index.scan(ScanRequest::backward(ScanBounds::unbounded()))?;
        assert!(cursor.next()?.is_none());

        let mut eq = index.scan(ScanRequest::forward(ScanBounds::equality(be4(1))))?;
        assert!(eq.next()?.is_none());
        Ok(())
    }

    #[test]
    fn test_single_leaf_backward_without_prev() -> Result<()> {
        let (index, _) = build_u32_index(0..100, |_| None, IndexOptions::default());
        assert_eq!(index.meta().height, 1);

        let mut cursor = index.scan(ScanRequest::backward(ScanBounds::unbounded()))?;
        let tuples = cursor.collect_remaining()?;
        assert_eq!(tuples.len(), 100);
        assert_eq!(tuples[0].key, be4(99));
        Ok(())
    }

    #[test]
    fn test_no_movement_direction_emits_nothing() -> Result<()> {
        let (index, _) = build_u32_index(0..100, |_| None, IndexOptions::default());
        let mut cursor = index.scan(ScanRequest::default())?;
        assert!(cursor.next()?.is_none());
        Ok(())
    }

    #[test]
    fn test_not_index_only_rejected() {
        let (index, _) = build_u32_index(0..10, |_| None, IndexOptions::default());
        let request = ScanRequest {
            fetch_heap_rows: true,
            ..ScanRequest::forward(ScanBounds::unbounded())
        };
        assert!(matches!(index.scan(request), Err(IndexError::NotIndexOnly)));
    }

    #[test]
    fn test_equality_at_page_boundary() -> Result<()> {
        // 10 tuples per page; key 77 spans the boundary between two pages
        let mut options = IndexOptions::default();
        options.knobs.tuples_per_page_cap = Some(10);

        let mut keys: Vec<u32> = (0..75).collect();
        keys.extend(std::iter::repeat(77).take(10));
        keys.extend(100..150);

        let (index, _) = build_u32_index(keys.iter().copied(), |_| None, options);
        let mut cursor = index.scan(ScanRequest::forward(ScanBounds::equality(be4(77))))?;
        let tuples = cursor.collect_remaining()?;
        assert_eq!(tuples.len(), 10);
        assert!(tuples.iter().all(|t| t.key == be4(77)));
        Ok(())
    }

    #[test]
    fn test_rescan_releases_pin_and_reseeks() -> Result<()> {
        let mut options = IndexOptions::default();
        options.knobs.tuples_per_page_cap = Some(10);
        let (index, store) = build_u32_index(0..100, |_| None, options);

        let mut cursor = index.scan(ScanRequest::forward(ScanBounds::unbounded()))?;
        assert!(cursor.next()?.is_some());
        assert!(store.is_pinned(BlockId::new(0)));

        cursor.rescan(ScanBounds::equality(be4(55)));
        assert!(!store.is_pinned(BlockId::new(0)));

        let tuples = cursor.collect_remaining()?;
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].key, be4(55));
        Ok(())
    }

    #[test]
    fn test_deterministic_builds_are_byte_identical() -> Result<()> {
        let keys: Vec<u32> = (0..20_000).map(|i| i / 7).collect();
        let (_, store_a) = build_u32_index(keys.iter().copied(), |_| None, IndexOptions::default());
        let (_, store_b) = build_u32_index(keys.iter().copied(), |_| None, IndexOptions::default());

        assert_eq!(store_a.block_count(), store_b.block_count());
        for id in 0..store_a.block_count() {
            let a = store_a.read(BlockId::new(id))?;
            let b = store_b.read(BlockId::new(id))?;
            assert_eq!(a.data(), b.data(), "block {} differs", id);
        }
        Ok(())
    }

    #[test]
    fn test_structural_invariants_hold() -> Result<()> {
        let mut options = IndexOptions::default();
        options.knobs.tuples_per_page_cap = Some(50);
        options.knobs.fanout_cap = Some(10);
        let (index, store) = build_u32_index((0..20_000).map(|i| i / 4), |_| None, options);
        let meta = index.meta();

        // Leaves: ordered within and across pages, chain covers the region
        let mut prev_last: Option<Vec<u8>> = None;
        for id in 0..meta.leaf_count {
            let block = BlockId::new(id);
            let pin = store.read(block)?;
            let page = DecodedPage::parse(pin.data(), block, &meta.schema)?;
            let view = PageView::new(pin.data(), &page);

            assert!(view.first_key() <= view.last_key());
            assert!(view.count() as usize <= crate::types::MAX_ITEMS_PER_PAGE);
            if let Some(prev) = &prev_last {
                assert!(prev.as_slice() <= view.first_key());
            }
            prev_last = Some(view.last_key().to_vec());

            let expected_link = if id + 1 == meta.leaf_count {
                BlockId::NONE
            } else {
                BlockId::new(id + 1)
            };
            assert_eq!(view.rightlink(), expected_link);
        }

        // Internal entries: separator equals the child's minimum key
        fn check_subtree(
            store: &dyn BlockStore,
            meta: &IndexMeta,
            block: BlockId,
            level: u32,
        ) -> Result<Vec<u8>> {
            let pin = store.read(block)?;
            if level == 0 {
                let page = DecodedPage::parse(pin.data(), block, &meta.schema)?;
                return Ok(PageView::new(pin.data(), &page).first_key().to_vec());
            }
            let node = InternalView::parse(pin.data(), block, meta.schema.key_width())?;
            let entries: Vec<(Vec<u8>, BlockId)> = (0..node.count())
                .map(|i| (node.separator_at(i).to_vec(), node.child_at(i)))
                .collect();
            drop(pin);

            let mut min_key = None;
            for (sep, child) in entries {
                let child_min = check_subtree(store, meta, child, level - 1)?;
                assert_eq!(sep, child_min, "separator mismatch at level {}", level);
                min_key.get_or_insert(child_min);
            }
            Ok(min_key.expect("internal pages are never empty"))
        }
        if meta.height > 1 {
            check_subtree(store.as_ref(), meta, meta.root, meta.height - 1)?;
        }
        Ok(())
    }

    #[test]
    fn test_parallel_equivalence_through_index_handle() -> Result<()> {
        let mut options = IndexOptions::default();
        options.knobs.force_parallel_workers = Some(4);
        let (index, _) = build_u32_index(0..30_000, |_| None, options);

        let bounds = ScanBounds::range(Some((be4(1_000), true)), Some((be4(29_000), false)));
        let mut sequential = index
            .scan(ScanRequest::forward(bounds.clone()))?
            .collect_remaining()?;
        let mut parallel = index.parallel_scan(ScanRequest::forward(bounds), 1)?;

        sequential.sort_by(|a, b| a.key.cmp(&b.key));
        parallel.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(parallel, sequential);
        Ok(())
    }

    #[test]
    fn test_bloom_rejection_knob_skips_pages() -> Result<()> {
        let mut options = IndexOptions::default();
        options.build_bloom_filters = true;
        let (index, _) = build_u32_index(0..1_000, |_| None, options.clone());

        let mut cursor = index.scan(ScanRequest::forward(ScanBounds::equality(be4(500))))?;
        assert_eq!(cursor.collect_remaining()?.len(), 1);

        options.knobs.force_bloom_reject = true;
        let (rejecting, _) = build_u32_index(0..1_000, |_| None, options);
        let mut cursor = rejecting.scan(ScanRequest::forward(ScanBounds::equality(be4(500))))?;
        assert!(cursor.collect_remaining()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_invalid_nhash_surfaces_bad_nhash() {
        let mut options = IndexOptions::default();
        options.build_bloom_filters = true;
        options.knobs.force_invalid_nhash = true;
        let (index, _) = build_u32_index(0..1_000, |_| None, options);

        let mut cursor = index
            .scan(ScanRequest::forward(ScanBounds::equality(be4(500))))
            .unwrap();
        assert!(matches!(
            cursor.collect_remaining(),
            Err(IndexError::BadNhash { .. })
        ));
    }

    #[test]
    fn test_zero_copy_end_to_end() -> Result<()> {
        let schema = Schema::single_key(8).unwrap();
        let mut builder = IndexBuilder::new(
            schema,
            IndexOptions {
                enable_zero_copy: Toggle::On,
                ..Default::default()
            },
        );
        for k in 0..10_000u64 {
            builder.push(&k.to_be_bytes(), None, &[], 0)?;
        }
        let index = Index::create(builder, Arc::new(MemBlockStore::new()))?;

        let stats = index.stats();
        assert!(stats.zerocopy_pages > 0);
        assert!(stats.zerocopy_pct > 99.0);

        let tuples = forward_all(&index);
        assert_eq!(tuples.len(), 10_000);
        assert_eq!(tuples[9_999].key, 9_999u64.to_be_bytes());
        Ok(())
    }

    #[test]
    fn test_interrupt_stops_scan_at_leaf_boundary() -> Result<()> {
        let mut options = IndexOptions::default();
        options.knobs.tuples_per_page_cap = Some(10);
        let (index, _) = build_u32_index(0..100, |_| None, options);

        // Drain the first page so the next call must cross a leaf boundary
        let mut cursor = index.scan(ScanRequest::forward(ScanBounds::unbounded()))?;
        for _ in 0..10 {
            cursor.next()?;
        }

        interrupt::request();
        let outcome = cursor.next();
        interrupt::reset();
        assert!(matches!(outcome, Err(IndexError::Interrupted)));
        Ok(())
    }

    #[test]
    fn test_file_store_round_trip() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nums.idx");

        let schema = Schema::single_key(4).unwrap();
        let mut builder = IndexBuilder::new(schema.clone(), IndexOptions::default());
        for k in 0..50_000u32 {
            builder.push(&k.to_be_bytes(), None, &[], 0)?;
        }
        let store = Arc::new(FileBlockStore::create(&path)?);
        let built = Index::create_in_file(builder, store)?;
        let built_stats = built.stats().clone();
        drop(built);

        let store = Arc::new(FileBlockStore::open(&path)?);
        let index = Index::open_file(store, schema, IndexOptions::default())?;
        assert_eq!(index.stats().tuple_count, built_stats.tuple_count);
        assert_eq!(index.stats().leaf_pages, built_stats.leaf_pages);

        let bounds = ScanBounds::range(Some((be4(49_000), true)), None);
        let mut cursor = index.scan(ScanRequest::forward(bounds))?;
        assert_eq!(cursor.collect_remaining()?.len(), 1_000);
        Ok(())
    }

    #[test]
    fn test_prefetch_depth_reads_ahead() -> Result<()> {
        let mut options = IndexOptions::default();
        options.prefetch_depth = 4;
        options.knobs.tuples_per_page_cap = Some(10);
        let (index, _) = build_u32_index(0..200, |_| None, options);

        // Exercises the prefetch loop including its end-of-region break
        let tuples = forward_all(&index);
        assert_eq!(tuples.len(), 200);
        Ok(())
    }

    #[test]
    fn test_run_split_at_length_cap_preserves_tuples() -> Result<()> {
        let mut options = IndexOptions::default();
        options.knobs.max_run_len = Some(100);
        let (index, store) = build_u32_index(
            std::iter::repeat(7u32).take(5_000),
            |_| None,
            options,
        );

        // Runs were split on the page; decode agrees with the tuple count
        let pin = store.read(BlockId::new(0))?;
        let header = PageHeader::read(pin.data(), BlockId::new(0))?;
        assert!(header.nruns as usize >= header.nitems as usize / 100);

        let tuples = forward_all(&index);
        assert_eq!(tuples.len(), 5_000);
        Ok(())
    }

    #[test]
    fn test_scan_cost_uses_configured_costs() {
        let mut options = IndexOptions::default();
        options.cost_page = 2.0;
        options.cost_tup = 0.5;
        let (index, _) = build_u32_index(0..10, |_| None, options);
        assert_eq!(index.scan_cost(10, 100), 10.0 * 2.0 + 100.0 * 0.5);
    }
}
