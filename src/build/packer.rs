//! Leaf packer: slices the sorted view into pages.
//!
//! The packer greedily sizes each batch under the plain format, re-encodes
//! the batch under the RLE formats when they are smaller, applies the
//! zero-copy gate, and stitches the leaf chain as it emits pages.

use log::{debug, warn};

use crate::build::collector::SortedView;
use crate::error::{IndexError, Result};
use crate::page::rle::{include_rle_size, key_rle_size, key_runs, tuple_runs};
use crate::page::{
    bloom, encode_include_rle, encode_key_rle, encode_plain, encode_zero_copy, FormatTag,
    Tuples,
};
use crate::scan::interrupt;
use crate::store::BlockStore;
use crate::types::{
    BlockId, IndexOptions, Schema, Toggle, MAX_ITEMS_PER_PAGE, MAX_RUNS_PER_PAGE, MAX_RUN_LEN,
    PAGE_BODY_CAPACITY, PAGE_HEADER_SIZE, ROW_WIDTH_WARN_LIMIT,
};

/// Zero-progress iterations tolerated before the build fails.
///
/// The guard catches arithmetic errors in the capacity estimator; it fails
/// loudly instead of spinning.
const LOOP_GUARD_LIMIT: u32 = 3;

/// Positions sampled for the zero-copy uniqueness gate
const UNIQUENESS_SAMPLES: usize = 256;

/// Per-page metadata recorded for each emitted leaf
#[derive(Debug, Clone)]
pub struct LeafInfo {
    /// Block the leaf was written to
    pub block: BlockId,
    /// Minimum key on the page
    pub first_key: Vec<u8>,
    /// Maximum key on the page
    pub last_key: Vec<u8>,
    /// Tuples on the page
    pub nitems: u32,
    /// Chosen format
    pub format: FormatTag,
}

/// Counters accumulated while packing
#[derive(Debug, Clone, Copy, Default)]
pub struct PackCounters {
    pub plain_pages: u64,
    pub key_rle_pages: u64,
    pub inc_rle_pages: u64,
    pub zerocopy_pages: u64,
    /// Body bytes actually used across all leaves
    pub used_bytes: u64,
    /// Body bytes the same tuples would use under the plain format
    pub plain_bytes: u64,
    pub tuple_count: u64,
}

/// Pack the sorted view into leaf pages, left to right.
///
/// Returns the emitted leaves in chain order. Leaf blocks are allocated
/// consecutively, so the chain occupies the id range `0..leaves.len()`.
pub fn pack_leaves(
    view: &SortedView<'_>,
    options: &IndexOptions,
    store: &dyn BlockStore,
) -> Result<(Vec<LeafInfo>, PackCounters)> {
    let schema = view.schema();
    let key_width = schema.key_width();
    let n = view.len();

    let bloom_reserve = if options.build_bloom_filters {
        bloom::section_size()
    } else {
        0
    };
    let capacity = PAGE_BODY_CAPACITY - bloom_reserve;
    let items_cap = options
        .knobs
        .tuples_per_page_cap
        .map_or(MAX_ITEMS_PER_PAGE, |c| c as usize)
        .min(MAX_ITEMS_PER_PAGE);
    let runs_cap = options
        .knobs
        .runs_per_page_cap
        .unwrap_or(MAX_RUNS_PER_PAGE)
        .min(MAX_RUNS_PER_PAGE);
    let max_run_len = options.knobs.max_run_len.unwrap_or(MAX_RUN_LEN).max(1);

    // Per-tuple plain cost ignores the one extra offset entry each varlen
    // column pays per page; that constant is charged up front.
    let n_varlen = schema
        .include_columns()
        .iter()
        .filter(|c| c.is_varlen())
        .count();
    let page_base = n_varlen * 2;

    let rle_payload_ok = !schema.has_varlen_payload();
    let ir_eligible = rle_payload_ok && schema.include_count() > 0;
    let rle_version = options.rle_version_for(schema.has_text_key());

    let mut leaves: Vec<LeafInfo> = Vec::new();
    let mut counters = PackCounters::default();
    let mut prev_block: Option<BlockId> = None;
    let mut i = 0usize;
    let mut stall = 0u32;

    while i < n {
        interrupt::check()?;

        // Greedy fill under plain, counting runs as we go
        let mut j = i;
        let mut used = page_base;
        let mut key_run_count = 0usize;
        let mut key_run_len = 0usize;
        let mut tuple_run_count = 0usize;
        let mut tuple_run_len = 0usize;

        while j < n && j - i < items_cap {
            let cost = tuple_plain_cost(view, j, schema);
            if used + cost > capacity {
                break;
            }

            let new_key_run = j == i || view.key(j) != view.key(j - 1) || key_run_len >= max_run_len;
            let next_key_runs = key_run_count + usize::from(new_key_run);
            if rle_payload_ok && next_key_runs > runs_cap {
                break;
            }

            if new_key_run {
                key_run_count = next_key_runs;
                key_run_len = 1;
            } else {
                key_run_len += 1;
            }

            if ir_eligible {
                let new_tuple_run = j == i
                    || view.key(j) != view.key(j - 1)
                    || (0..schema.include_count())
                        .any(|c| view.payload(j, c) != view.payload(j - 1, c))
                    || tuple_run_len >= max_run_len;
                if new_tuple_run {
                    tuple_run_count += 1;
                    tuple_run_len = 1;
                } else {
                    tuple_run_len += 1;
                }
            }

            used += cost;
            j += 1;
        }

        if options.knobs.force_loop_guard {
            j = i;
        }
        if j == i {
            stall += 1;
            if stall >= LOOP_GUARD_LIMIT {
                return Err(IndexError::BuildStalled {
                    iterations: LOOP_GUARD_LIMIT,
                });
            }
            continue;
        }
        stall = 0;

        let range = i..j;
        // The greedy fill accumulated exactly the plain-format body size
        let plain_size = used;

        // Pick the smallest encoding; ties go to the simpler format
        let mut format = FormatTag::Plain;
        let mut best_size = plain_size;
        if rle_payload_ok {
            let kr = key_rle_size(view, &range, key_run_count, schema);
            if kr < best_size {
                format = FormatTag::KeyRle;
                best_size = kr;
            }
        }
        if ir_eligible && tuple_run_count <= runs_cap {
            let ir = include_rle_size(tuple_run_count, schema);
            if ir < best_size {
                format = FormatTag::IncludeRle;
                best_size = ir;
            }
        }
        if format == FormatTag::Plain
            && zero_copy_allowed(view, &range, options, schema, key_width, n)
        {
            format = FormatTag::ZeroCopy;
        }

        let (mut page, body_end) = match format {
            FormatTag::Plain => encode_plain(view, range.clone(), schema),
            FormatTag::ZeroCopy => encode_zero_copy(view, range.clone(), schema),
            FormatTag::KeyRle => {
                let runs = key_runs(view, range.clone(), max_run_len);
                encode_key_rle(view, range.clone(), &runs, schema, rle_version)
            }
            FormatTag::IncludeRle => {
                let runs = tuple_runs(view, range.clone(), schema.include_count(), max_run_len);
                encode_include_rle(view, range.clone(), &runs, schema, rle_version)
            }
            FormatTag::Internal => unreachable!("packer emits leaves only"),
        };

        let mut page_used = body_end - PAGE_HEADER_SIZE;
        if options.build_bloom_filters {
            bloom::attach(
                &mut page,
                body_end,
                view,
                range.clone(),
                options.knobs.force_invalid_nhash,
            );
            page_used += bloom::section_size();
        }

        let block = store.write_new(page)?;
        if let Some(prev) = prev_block {
            store.set_rightlink(prev, block)?;
        }
        prev_block = Some(block);

        match format {
            FormatTag::Plain => counters.plain_pages += 1,
            FormatTag::KeyRle => counters.key_rle_pages += 1,
            FormatTag::IncludeRle => counters.inc_rle_pages += 1,
            FormatTag::ZeroCopy => counters.zerocopy_pages += 1,
            FormatTag::Internal => unreachable!(),
        }
        counters.used_bytes += page_used as u64;
        counters.plain_bytes += plain_size as u64;
        counters.tuple_count += (j - i) as u64;

        leaves.push(LeafInfo {
            block,
            first_key: view.key(i).to_vec(),
            last_key: view.key(j - 1).to_vec(),
            nitems: (j - i) as u32,
            format,
        });

        i = j;
    }

    if counters.tuple_count > 0 {
        let avg = counters.plain_bytes / counters.tuple_count;
        if avg as usize > ROW_WIDTH_WARN_LIMIT {
            warn!(
                "rows average {} packed bytes (limit {}); index-only scans will be page-bound",
                avg, ROW_WIDTH_WARN_LIMIT
            );
        }
    }

    debug!(
        "packed {} tuples into {} leaves ({} plain, {} key-RLE, {} include-RLE, {} zero-copy)",
        counters.tuple_count,
        leaves.len(),
        counters.plain_pages,
        counters.key_rle_pages,
        counters.inc_rle_pages,
        counters.zerocopy_pages
    );

    Ok((leaves, counters))
}

/// Plain-format bytes the tuple at `pos` adds to a page
fn tuple_plain_cost(view: &SortedView<'_>, pos: usize, schema: &Schema) -> usize {
    let mut cost = schema.key_width();
    for (col, spec) in schema.include_columns().iter().enumerate() {
        cost += match spec.width {
            Some(w) => w,
            None => 2 + view.payload(pos, col).len(),
        };
    }
    cost
}

/// The zero-copy gate: configuration, key shape, and sampled uniqueness
fn zero_copy_allowed(
    view: &SortedView<'_>,
    range: &std::ops::Range<usize>,
    options: &IndexOptions,
    schema: &Schema,
    key_width: usize,
    total_tuples: usize,
) -> bool {
    match options.enable_zero_copy {
        Toggle::Off => return false,
        Toggle::On => {}
        Toggle::Auto => {
            // Size cap applies only to the auto gate; explicit `on` is an
            // operator decision.
            let projected = total_tuples as u64 * key_width as u64;
            if projected > u64::from(options.zero_copy_threshold_mb) * 1024 * 1024 {
                return false;
            }
        }
    }

    if schema.key_columns().len() != 1
        || schema.has_text_key()
        || schema.include_count() != 0
        || key_width < 8
    {
        return false;
    }

    sampled_uniqueness(view, range) >= options.zero_copy_uniqueness_threshold
}

/// Fraction of sampled positions whose key differs from the previously
/// sampled one. Deterministic: evenly spaced positions, no RNG, so repeated
/// builds stay byte-identical.
fn sampled_uniqueness(view: &SortedView<'_>, range: &std::ops::Range<usize>) -> f64 {
    let n = range.len();
    if n <= 1 {
        return 1.0;
    }
    let samples = n.min(UNIQUENESS_SAMPLES);
    let mut distinct = 1usize;
    let mut prev = range.start;
    for s in 1..samples {
        let pos = range.start + s * (n - 1) / (samples - 1);
        if view.key(pos) != view.key(prev) {
            distinct += 1;
        }
        prev = pos;
    }
    distinct as f64 / samples as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::collector::TupleCollector;
    use crate::store::MemBlockStore;
    use crate::types::{IncludeColumn, KeyColumn};

    fn collect_u32(keys: impl IntoIterator<Item = u32>) -> TupleCollector {
        let schema = Schema::single_key(4).unwrap();
        let mut collector = TupleCollector::new(schema);
        for k in keys {
            collector.push(&k.to_be_bytes(), None, &[], 0).unwrap();
        }
        collector
    }

    #[test]
    fn test_unique_keys_pack_plain() -> Result<()> {
        let collector = collect_u32(0..5000);
        let view = collector.finish();
        let store = MemBlockStore::new();
        let (leaves, counters) = pack_leaves(&view, &IndexOptions::default(), &store)?;

        assert!(leaves.len() > 1);
        assert_eq!(counters.tuple_count, 5000);
        assert_eq!(counters.plain_pages, leaves.len() as u64);
        assert_eq!(
            leaves.iter().map(|l| l.nitems as u64).sum::<u64>(),
            5000
        );
        // Chain order matches block order
        for (i, leaf) in leaves.iter().enumerate() {
            assert_eq!(leaf.block, BlockId::new(i as u64));
        }
        Ok(())
    }

    #[test]
    fn test_duplicate_keys_pick_key_rle() -> Result<()> {
        let collector = collect_u32((0..4000).map(|k| k / 500));
        let view = collector.finish();
        let store = MemBlockStore::new();
        let (leaves, counters) = pack_leaves(&view, &IndexOptions::default(), &store)?;

        assert!(counters.key_rle_pages > 0);
        assert!(counters.used_bytes < counters.plain_bytes / 2);
        assert_eq!(
            leaves.iter().map(|l| l.nitems as u64).sum::<u64>(),
            4000
        );
        Ok(())
    }

    #[test]
    fn test_constant_payload_picks_include_rle() -> Result<()> {
        let schema = Schema::new(
            vec![KeyColumn::fixed(4).unwrap()],
            vec![IncludeColumn::fixed(4).unwrap()],
        )
        .unwrap();
        let mut collector = TupleCollector::new(schema);
        for k in 0..4000u32 {
            collector
                .push(&(k / 500).to_be_bytes(), None, &[&111u32.to_le_bytes()], 0)
                .unwrap();
        }
        let view = collector.finish();
        let store = MemBlockStore::new();
        let (_, counters) = pack_leaves(&view, &IndexOptions::default(), &store)?;

        assert!(counters.inc_rle_pages > 0);
        assert!(counters.used_bytes < counters.plain_bytes / 2);
        Ok(())
    }

    #[test]
    fn test_zero_copy_gate() -> Result<()> {
        let schema = Schema::single_key(8).unwrap();
        let mut collector = TupleCollector::new(schema);
        for k in 0..2000u64 {
            collector.push(&k.to_be_bytes(), None, &[], 0).unwrap();
        }
        let view = collector.finish();

        let store = MemBlockStore::new();
        let (leaves, counters) = pack_leaves(&view, &IndexOptions::default(), &store)?;
        assert_eq!(counters.zerocopy_pages, leaves.len() as u64);

        let off = IndexOptions {
            enable_zero_copy: Toggle::Off,
            ..Default::default()
        };
        let store = MemBlockStore::new();
        let (_, counters) = pack_leaves(&view, &off, &store)?;
        assert_eq!(counters.zerocopy_pages, 0);
        Ok(())
    }

    #[test]
    fn test_zero_copy_respects_size_cap() -> Result<()> {
        // Key shape and uniqueness both pass; only the projected-size gate
        // trips under the auto toggle
        let schema = Schema::single_key(8).unwrap();
        let mut collector = TupleCollector::new(schema);
        for k in 0..2000u64 {
            collector.push(&k.to_be_bytes(), None, &[], 0).unwrap();
        }
        let view = collector.finish();

        let capped = IndexOptions {
            zero_copy_threshold_mb: 0,
            ..Default::default()
        };
        let store = MemBlockStore::new();
        let (leaves, counters) = pack_leaves(&view, &capped, &store)?;
        assert_eq!(counters.zerocopy_pages, 0);
        assert_eq!(counters.plain_pages, leaves.len() as u64);

        // An explicit `on` is an operator decision and skips the size cap
        let forced = IndexOptions {
            enable_zero_copy: Toggle::On,
            zero_copy_threshold_mb: 0,
            ..Default::default()
        };
        let store = MemBlockStore::new();
        let (leaves, counters) = pack_leaves(&view, &forced, &store)?;
        assert_eq!(counters.zerocopy_pages, leaves.len() as u64);
        Ok(())
    }

    #[test]
    fn test_zero_copy_needs_uniqueness() -> Result<()> {
        let schema = Schema::single_key(8).unwrap();
        let mut collector = TupleCollector::new(schema);
        for k in 0..2000u64 {
            collector.push(&(k / 100).to_be_bytes(), None, &[], 0).unwrap();
        }
        let view = collector.finish();
        let store = MemBlockStore::new();
        let (_, counters) = pack_leaves(&view, &IndexOptions::default(), &store)?;
        assert_eq!(counters.zerocopy_pages, 0);
        Ok(())
    }

    #[test]
    fn test_tuples_per_page_cap_knob() -> Result<()> {
        let collector = collect_u32(0..500);
        let view = collector.finish();
        let mut options = IndexOptions::default();
        options.knobs.tuples_per_page_cap = Some(50);

        let store = MemBlockStore::new();
        let (leaves, _) = pack_leaves(&view, &options, &store)?;
        assert_eq!(leaves.len(), 10);
        assert!(leaves.iter().all(|l| l.nitems == 50));
        Ok(())
    }

    #[test]
    fn test_runs_cap_emits_new_page() -> Result<()> {
        // 100 distinct keys, capped at 10 runs per page: ten pages, no loss
        let collector = collect_u32((0..1000).map(|k| k / 10));
        let view = collector.finish();
        let mut options = IndexOptions::default();
        options.knobs.runs_per_page_cap = Some(10);

        let store = MemBlockStore::new();
        let (leaves, counters) = pack_leaves(&view, &options, &store)?;
        assert_eq!(counters.tuple_count, 1000);
        assert_eq!(leaves.len(), 10);
        Ok(())
    }

    #[test]
    fn test_loop_guard_fails_loudly() {
        let collector = collect_u32(0..10);
        let view = collector.finish();
        let mut options = IndexOptions::default();
        options.knobs.force_loop_guard = true;

        let store = MemBlockStore::new();
        assert!(matches!(
            pack_leaves(&view, &options, &store),
            Err(IndexError::BuildStalled { iterations: 3 })
        ));
    }

    #[test]
    fn test_bloom_sections_attached() -> Result<()> {
        let collector = collect_u32(0..100);
        let view = collector.finish();
        let options = IndexOptions {
            build_bloom_filters: true,
            ..Default::default()
        };
        let store = MemBlockStore::new();
        let (leaves, _) = pack_leaves(&view, &options, &store)?;

        let pin = store.read(leaves[0].block)?;
        let header = crate::page::PageHeader::read(pin.data(), leaves[0].block)?;
        assert!(header.flags.has_bloom());
        assert!(header.bloom_offset as usize >= PAGE_HEADER_SIZE);
        Ok(())
    }
}
