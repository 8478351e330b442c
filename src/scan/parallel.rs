//! Parallel scan coordinator.
//!
//! Cooperating workers share one atomic cursor over the leaf chain. The
//! first worker to arrive performs the root descent and publishes the
//! starting leaf through a release store of the `initialized` flag; everyone
//! else acquire-loads the flag and claims batches with fetch-and-add. A
//! compare-exchange elects the single initializer, so a slow second arrival
//! can never clobber a cursor that others have already advanced.
//!
//! Workers are symmetric: the leader participates like any other worker, and
//! no ordering is guaranteed between tuples emitted by different workers.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use log::trace;

use crate::error::Result;
use crate::page::{DecodedPage, PageView};
use crate::scan::bounds::ScanBounds;
use crate::scan::cursor::{
    descend_to_leaf, Direction, RuntimeKey, ScanRequest, SeekTarget, Tuple, TupleRef,
};
use crate::scan::interrupt;
use crate::types::BlockId;
use crate::Index;

const UNINITIALIZED: u8 = 0;
const READY: u8 = 1;
const INITIALIZING: u8 = 2;

/// Sentinel origin for "no candidate leaf"
const NO_ORIGIN: u64 = u64::MAX;

/// Shared state of one parallel scan
pub struct ParallelScan {
    index: Index,
    direction: Direction,
    bounds: ScanBounds,
    runtime_keys: Vec<RuntimeKey>,
    batch: u64,
    /// First candidate leaf, written by the elected initializer
    origin: AtomicU64,
    /// Leaves claimed so far, in batches, counted from the origin
    next_leaf: AtomicU64,
    /// Release/acquire handshake guarding `origin`
    initialized: AtomicU8,
    /// Set once any worker proves later leaves cannot match
    exhausted: AtomicBool,
    /// One-shot trigger for the `simulate_atomic_race` knob
    race_armed: AtomicBool,
}

impl ParallelScan {
    /// Set up a parallel scan; workers then call [`ParallelScan::run`]
    pub fn new(index: &Index, request: ScanRequest) -> Result<Arc<Self>> {
        if request.fetch_heap_rows {
            return Err(crate::error::IndexError::NotIndexOnly);
        }
        let options = &index.meta().options;
        Ok(Arc::new(Self {
            index: index.clone(),
            direction: request.direction.unwrap_or(Direction::NoMovement),
            bounds: request.bounds,
            runtime_keys: request.runtime_keys,
            batch: options.claim_batch(),
            origin: AtomicU64::new(0),
            next_leaf: AtomicU64::new(0),
            initialized: AtomicU8::new(UNINITIALIZED),
            exhausted: AtomicBool::new(false),
            race_armed: AtomicBool::new(options.knobs.simulate_atomic_race),
        }))
    }

    /// First-touch initialization: exactly one worker descends, everyone
    /// else waits for the release store and reads the published origin.
    fn ensure_init(&self) -> Result<()> {
        let mut observed = self.initialized.load(Ordering::Acquire);
        if self.race_armed.swap(false, Ordering::Relaxed) {
            // Pretend the fast path missed so the election runs
            observed = UNINITIALIZED;
        }
        if observed == READY {
            return Ok(());
        }

        match self.initialized.compare_exchange(
            UNINITIALIZED,
            INITIALIZING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => match self.locate_origin() {
                Ok(origin) => {
                    self.origin.store(origin, Ordering::Relaxed);
                    self.initialized.store(READY, Ordering::Release);
                    trace!("parallel cursor initialized at leaf {}", origin);
                    Ok(())
                }
                Err(e) => {
                    // Un-elect so another worker can retry; the cursor state
                    // stays valid for everyone else
                    self.initialized.store(UNINITIALIZED, Ordering::Release);
                    Err(e)
                }
            },
            Err(_) => {
                while self.initialized.load(Ordering::Acquire) != READY {
                    std::hint::spin_loop();
                }
                Ok(())
            }
        }
    }

    /// Root descent to the first candidate leaf of this scan
    fn locate_origin(&self) -> Result<u64> {
        let target = match self.direction {
            Direction::NoMovement => return Ok(NO_ORIGIN),
            Direction::Forward => match &self.bounds.lower {
                Some(bound) => SeekTarget::LowerBound(&bound.key),
                None => SeekTarget::Leftmost,
            },
            Direction::Backward => match &self.bounds.upper {
                Some(bound) => SeekTarget::UpperBound(&bound.key),
                None => SeekTarget::Rightmost,
            },
        };
        Ok(descend_to_leaf(&self.index, &target)?
            .map_or(NO_ORIGIN, |block| block.value()))
    }

    /// Reserve the next batch of leaves; `None` when the chain is consumed
    pub fn claim(&self) -> Result<Option<Vec<BlockId>>> {
        self.ensure_init()?;
        interrupt::check()?;

        if self.exhausted.load(Ordering::Acquire) {
            return Ok(None);
        }
        let origin = self.origin.load(Ordering::Relaxed);
        if origin == NO_ORIGIN {
            return Ok(None);
        }

        let claimed = self.next_leaf.fetch_add(self.batch, Ordering::AcqRel);
        let leaf_count = self.index.meta().leaf_count;

        let blocks: Vec<BlockId> = match self.direction {
            Direction::Forward => {
                let start = origin + claimed;
                if start >= leaf_count {
                    return Ok(None);
                }
                let end = (start + self.batch).min(leaf_count);
                (start..end).map(BlockId::new).collect()
            }
            Direction::Backward => {
                if claimed > origin {
                    return Ok(None);
                }
                let hi = origin - claimed;
                let lo = hi.saturating_sub(self.batch - 1);
                (lo..=hi).rev().map(BlockId::new).collect()
            }
            Direction::NoMovement => return Ok(None),
        };
        Ok(Some(blocks))
    }

    /// Work the scan to completion, returning this worker's share of the
    /// result. Order within the share follows the scan direction; order
    /// across workers is unspecified.
    pub fn run(&self) -> Result<Vec<Tuple>> {
        let mut out = Vec::new();
        'claims: while let Some(blocks) = self.claim()? {
            // Read ahead over the rest of the claim
            let depth = self.index.meta().options.prefetch_depth as usize;
            if depth > 1 {
                for block in blocks.iter().skip(1).take(depth - 1) {
                    self.index.store().prefetch(*block);
                }
            }

            for block in blocks {
                interrupt::check()?;
                if !self.scan_leaf(block, &mut out)? {
                    self.exhausted.store(true, Ordering::Release);
                    break 'claims;
                }
            }
        }
        Ok(out)
    }

    /// Emit this leaf's matching tuples; `false` ends the whole scan
    /// because no later leaf in scan direction can match.
    fn scan_leaf(&self, block: BlockId, out: &mut Vec<Tuple>) -> Result<bool> {
        let pin = self.index.store().read(block)?;
        let page = DecodedPage::parse(pin.data(), block, &self.index.meta().schema)?;
        let view = PageView::new(pin.data(), &page);

        match self.direction {
            Direction::Forward if self.bounds.prunes_at_or_after(view.first_key()) => {
                return Ok(false)
            }
            Direction::Backward if self.bounds.prunes_at_or_before(view.last_key()) => {
                return Ok(false)
            }
            _ => {}
        }

        if let Some(target) = self.bounds.equality_key() {
            let force = self.index.meta().options.knobs.force_bloom_reject;
            if view.probe_bloom(target, force)? == Some(false) {
                // Proven absent here; later leaves may still hold the run
                return Ok(true);
            }
        }

        let start = match &self.bounds.lower {
            Some(bound) if bound.inclusive => view.lower_bound(&bound.key),
            Some(bound) => view.upper_bound(&bound.key),
            None => 0,
        };
        let end = match &self.bounds.upper {
            Some(bound) if bound.inclusive => view.upper_bound(&bound.key),
            Some(bound) => view.lower_bound(&bound.key),
            None => view.count() as usize,
        };

        let ncols = self.index.meta().schema.include_count();
        let mut emit = |pos: usize| {
            let tuple_ref = TupleRef::new(&view, pos);
            if self.runtime_keys.iter().all(|key| key(&tuple_ref)) {
                out.push(Tuple {
                    key: view.key_at(pos).to_vec(),
                    payload: (0..ncols)
                        .map(|col| view.payload_at(pos, col).to_vec())
                        .collect(),
                });
            }
        };
        match self.direction {
            Direction::Forward => (start..end).for_each(&mut emit),
            Direction::Backward => (start..end).rev().for_each(&mut emit),
            Direction::NoMovement => {}
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::IndexBuilder;
    use crate::scan::bounds::ScanBounds;
    use crate::store::MemBlockStore;
    use crate::types::{IndexOptions, Schema};

    fn build_index(options: IndexOptions) -> Index {
        let schema = Schema::single_key(4).unwrap();
        let mut builder = IndexBuilder::new(schema.clone(), options.clone());
        for k in 0..20_000u32 {
            builder.push(&k.to_be_bytes(), None, &[], 0).unwrap();
        }
        Index::create(builder, Arc::new(MemBlockStore::new())).unwrap()
    }

    fn run_workers(scan: &Arc<ParallelScan>, workers: usize) -> Vec<Tuple> {
        let mut all: Vec<Tuple> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers).map(|_| s.spawn(|| scan.run())).collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap().unwrap())
                .collect()
        });
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let index = build_index(IndexOptions::default());
        let bounds = ScanBounds::range(
            Some((5_000u32.to_be_bytes().to_vec(), true)),
            Some((15_000u32.to_be_bytes().to_vec(), false)),
        );

        let mut cursor = index.scan(ScanRequest::forward(bounds.clone())).unwrap();
        let sequential = cursor.collect_remaining().unwrap();

        let scan = ParallelScan::new(&index, ScanRequest::forward(bounds)).unwrap();
        let parallel = run_workers(&scan, 4);

        assert_eq!(parallel.len(), sequential.len());
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_backward_parallel_claims() {
        let index = build_index(IndexOptions::default());
        let scan = ParallelScan::new(
            &index,
            ScanRequest::backward(ScanBounds::unbounded()),
        )
        .unwrap();
        let all = run_workers(&scan, 3);
        assert_eq!(all.len(), 20_000);
    }

    #[test]
    fn test_single_worker_equals_whole_result() {
        let index = build_index(IndexOptions::default());
        let scan = ParallelScan::new(
            &index,
            ScanRequest::forward(ScanBounds::unbounded()),
        )
        .unwrap();
        let tuples = scan.run().unwrap();
        assert_eq!(tuples.len(), 20_000);
        // A lone worker sees direction-correct order
        assert!(tuples.windows(2).all(|w| w[0].key <= w[1].key));
    }

    #[test]
    fn test_simulated_race_takes_slow_path() {
        let mut options = IndexOptions::default();
        options.knobs.simulate_atomic_race = true;
        let index = build_index(options);

        let scan = ParallelScan::new(
            &index,
            ScanRequest::forward(ScanBounds::unbounded()),
        )
        .unwrap();
        let all = run_workers(&scan, 4);
        assert_eq!(all.len(), 20_000);
    }

    #[test]
    fn test_empty_index_claims_nothing() {
        let schema = Schema::single_key(4).unwrap();
        let builder = IndexBuilder::new(schema, IndexOptions::default());
        let index = Index::create(builder, Arc::new(MemBlockStore::new())).unwrap();

        let scan = ParallelScan::new(
            &index,
            ScanRequest::forward(ScanBounds::unbounded()),
        )
        .unwrap();
        assert!(scan.claim().unwrap().is_none());
    }

    #[test]
    fn test_equality_stop_sets_exhausted() {
        let index = build_index(IndexOptions::default());
        let bounds = ScanBounds::equality(100u32.to_be_bytes().to_vec());
        let scan = ParallelScan::new(&index, ScanRequest::forward(bounds)).unwrap();

        let tuples = scan.run().unwrap();
        assert_eq!(tuples.len(), 1);
        assert!(scan.exhausted.load(Ordering::Acquire));
    }
}
