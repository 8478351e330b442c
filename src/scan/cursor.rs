//! Scan cursor: descent, iteration, and predecessor navigation.
//!
//! A cursor owns at most one leaf pin at a time (plus one internal pin
//! while descending) and copies tuple bytes out before any pin is released.
//! Forward iteration follows the rightlink chain; backward iteration has no
//! leftlink to follow and instead re-descends from the root to find each
//! predecessor leaf.

use std::sync::Arc;

use log::trace;

use crate::error::{IndexError, Result};
use crate::page::{DecodedPage, InternalView, PageHeader, PageView};
use crate::scan::bounds::ScanBounds;
use crate::scan::interrupt;
use crate::store::PinnedBlock;
use crate::types::BlockId;
use crate::Index;

/// Scan direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    /// Emit nothing; a planner artifact, not an error
    NoMovement,
}

/// A copied-out result tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    /// Concatenated key bytes
    pub key: Vec<u8>,
    /// INCLUDE payload values in column order
    pub payload: Vec<Vec<u8>>,
}

/// Borrowed view of the tuple a runtime key is evaluated against
pub struct TupleRef<'a> {
    view: &'a PageView<'a>,
    pos: usize,
}

impl<'a> TupleRef<'a> {
    pub(crate) fn new(view: &'a PageView<'a>, pos: usize) -> Self {
        Self { view, pos }
    }

    /// Concatenated key bytes
    pub fn key(&self) -> &[u8] {
        self.view.key_at(self.pos)
    }

    /// Payload bytes of column `col`
    pub fn payload(&self, col: usize) -> &[u8] {
        self.view.payload_at(self.pos, col)
    }
}

/// A per-tuple predicate the tree cannot prune.
///
/// Total and pure: no I/O, no errors, a plain function of the tuple.
pub type RuntimeKey = Arc<dyn Fn(&TupleRef<'_>) -> bool + Send + Sync>;

/// Everything a scan open needs
#[derive(Clone, Default)]
pub struct ScanRequest {
    /// Direction of travel
    pub direction: Option<Direction>,
    /// Key bounds
    pub bounds: ScanBounds,
    /// Per-tuple rechecks
    pub runtime_keys: Vec<RuntimeKey>,
    /// Heap-row retrieval is unsupported; `true` fails the open
    pub fetch_heap_rows: bool,
}

impl ScanRequest {
    /// Forward scan over `bounds`
    pub fn forward(bounds: ScanBounds) -> Self {
        Self {
            direction: Some(Direction::Forward),
            bounds,
            ..Default::default()
        }
    }

    /// Backward scan over `bounds`
    pub fn backward(bounds: ScanBounds) -> Self {
        Self {
            direction: Some(Direction::Backward),
            bounds,
            ..Default::default()
        }
    }

    /// Add a runtime key
    pub fn with_runtime_key(mut self, key: RuntimeKey) -> Self {
        self.runtime_keys.push(key);
        self
    }
}

/// Where a descent should land
pub(crate) enum SeekTarget<'k> {
    /// The leaf that may contain the first key `>= q` (left-biased: lands
    /// one leaf early rather than skipping over duplicates)
    LowerBound(&'k [u8]),
    /// The leaf containing the last key `<= q`
    UpperBound(&'k [u8]),
    Leftmost,
    Rightmost,
}

/// Descend from the root to a leaf block. `None` only for an empty tree.
pub(crate) fn descend_to_leaf(index: &Index, target: &SeekTarget<'_>) -> Result<Option<BlockId>> {
    let meta = index.meta();
    if meta.height == 0 {
        return Ok(None);
    }

    let key_width = meta.schema.key_width();
    let mut block = meta.root;
    for _ in 1..meta.height {
        let pin = index.store().read(block)?;
        let node = InternalView::parse(pin.data(), block, key_width)?;
        let child = match target {
            SeekTarget::LowerBound(q) => node.child_before(q),
            SeekTarget::UpperBound(q) => node.child_for(q),
            SeekTarget::Leftmost => 0,
            SeekTarget::Rightmost => node.count() - 1,
        };
        block = node.child_at(child);
    }
    Ok(Some(block))
}

/// Locate the leaf immediately preceding `current`.
///
/// There is no leftlink: re-descend from the root toward the current leaf's
/// first key, biased strictly left so the landing point is at or before any
/// duplicate span, then walk the rightlink chain up to the boundary. The
/// strictly-less descent degenerates to rightmost-child navigation when the
/// predecessor sits in an earlier subtree.
pub(crate) fn prev_leaf(
    index: &Index,
    current: BlockId,
    first_key: &[u8],
) -> Result<Option<BlockId>> {
    let meta = index.meta();
    if meta.height <= 1 {
        return Ok(None);
    }

    let Some(mut block) = descend_to_leaf(index, &SeekTarget::LowerBound(first_key))? else {
        return Ok(None);
    };
    if block == current {
        // Only the leftmost leaf descends onto itself under the
        // strictly-less bias
        return Ok(None);
    }

    loop {
        let pin = index.store().read(block)?;
        let header = PageHeader::read(pin.data(), block)?;
        drop(pin);
        match header.rightlink {
            next if next == current => return Ok(Some(block)),
            BlockId::NONE => {
                return Err(IndexError::corruption(format!(
                    "leaf chain ended before reaching block {}",
                    current
                )))
            }
            next => block = next,
        }
    }
}

/// One pinned leaf with its decoded layout
struct BoundLeaf {
    pin: PinnedBlock,
    page: DecodedPage,
}

impl BoundLeaf {
    fn view(&self) -> PageView<'_> {
        PageView::new(self.pin.data(), &self.page)
    }

    fn count(&self) -> usize {
        self.page.header.nitems as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedRun {
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NotStarted,
    Active,
    Done,
}

/// What one iteration step decided, computed under the leaf borrow
enum Step {
    Emit(Tuple),
    Skip,
    NextLeaf,
    End,
}

/// An open scan over one index
pub struct ScanCursor<'a> {
    index: &'a Index,
    direction: Direction,
    bounds: ScanBounds,
    runtime_keys: Vec<RuntimeKey>,
    state: State,
    leaf: Option<BoundLeaf>,
    pos: usize,
    cached_run: Option<CachedRun>,
}

impl<'a> ScanCursor<'a> {
    /// Open a scan; fails with `NotIndexOnly` if heap rows were requested
    pub(crate) fn open(index: &'a Index, request: ScanRequest) -> Result<Self> {
        if request.fetch_heap_rows {
            return Err(IndexError::NotIndexOnly);
        }
        Ok(Self {
            index,
            direction: request.direction.unwrap_or(Direction::NoMovement),
            bounds: request.bounds,
            runtime_keys: request.runtime_keys,
            state: State::NotStarted,
            leaf: None,
            pos: 0,
            cached_run: None,
        })
    }

    /// Re-open with fresh bounds, releasing any pinned page first
    pub fn rescan(&mut self, bounds: ScanBounds) {
        self.leaf = None;
        self.cached_run = None;
        self.bounds = bounds;
        self.state = State::NotStarted;
    }

    /// Fetch the next tuple in scan direction, or `None` at the end
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            match self.state {
                State::NotStarted => self.seek()?,
                State::Done => return Ok(None),
                State::Active => {}
            }
            if self.state != State::Active {
                return Ok(None);
            }

            let step = self.step()?;
            match step {
                Step::Emit(tuple) => {
                    self.move_on()?;
                    return Ok(Some(tuple));
                }
                Step::Skip => self.move_on()?,
                Step::NextLeaf => self.advance_leaf()?,
                Step::End => {
                    self.finish();
                    return Ok(None);
                }
            }
        }
    }

    /// Drain the rest of the scan
    pub fn collect_remaining(&mut self) -> Result<Vec<Tuple>> {
        let mut out = Vec::new();
        while let Some(tuple) = self.next()? {
            out.push(tuple);
        }
        Ok(out)
    }

    /// Evaluate the tuple at the current position without mutating anything
    /// except the run cache.
    fn step(&mut self) -> Result<Step> {
        let Some(leaf) = &self.leaf else {
            return Ok(Step::End);
        };

        if self.direction == Direction::Forward && self.pos >= leaf.count() {
            return Ok(Step::NextLeaf);
        }

        let view = leaf.view();
        let in_cached_run = self
            .cached_run
            .is_some_and(|r| self.pos >= r.start && self.pos < r.end);

        if !in_cached_run {
            let key = view.key_at(self.pos);
            let passes = match self.direction {
                Direction::Forward => self.bounds.satisfies_upper(key),
                Direction::Backward => self.bounds.satisfies_lower(key),
                Direction::NoMovement => false,
            };
            if !passes {
                return Ok(Step::End);
            }
            // A whole run inside the bounds skips per-tuple key checks
            let (start, end) = view.run_bounds(self.pos);
            if end - start > 1
                && self.bounds.satisfies_lower(key)
                && self.bounds.satisfies_upper(key)
            {
                self.cached_run = Some(CachedRun { start, end });
            }
        }

        let tuple_ref = TupleRef {
            view: &view,
            pos: self.pos,
        };
        if !self.runtime_keys.iter().all(|key| key(&tuple_ref)) {
            return Ok(Step::Skip);
        }

        let ncols = self.index.meta().schema.include_count();
        let tuple = Tuple {
            key: view.key_at(self.pos).to_vec(),
            payload: (0..ncols)
                .map(|col| view.payload_at(self.pos, col).to_vec())
                .collect(),
        };
        Ok(Step::Emit(tuple))
    }

    /// Position on the first candidate tuple
    fn seek(&mut self) -> Result<()> {
        self.state = State::Active;
        self.cached_run = None;

        let target = match self.direction {
            Direction::NoMovement => {
                self.finish();
                return Ok(());
            }
            Direction::Forward => match &self.bounds.lower {
                Some(bound) => SeekTarget::LowerBound(&bound.key),
                None => SeekTarget::Leftmost,
            },
            Direction::Backward => match &self.bounds.upper {
                Some(bound) => SeekTarget::UpperBound(&bound.key),
                None => SeekTarget::Rightmost,
            },
        };

        let Some(block) = descend_to_leaf(self.index, &target)? else {
            self.finish();
            return Ok(());
        };
        let leaf = self.bind(block)?;
        let view = leaf.view();

        let rejected = self.bloom_rejects(&leaf)?;
        match self.direction {
            Direction::Forward => {
                self.pos = if rejected {
                    // Definitely absent from this page; fall through to the
                    // chain advance
                    leaf.count()
                } else {
                    match &self.bounds.lower {
                        Some(bound) if bound.inclusive => view.lower_bound(&bound.key),
                        Some(bound) => view.upper_bound(&bound.key),
                        None => 0,
                    }
                };
                self.leaf = Some(leaf);
                // pos == count is fine: the loop advances along the chain
            }
            Direction::Backward => {
                let idx = if rejected {
                    0
                } else {
                    match &self.bounds.upper {
                        Some(bound) if bound.inclusive => view.upper_bound(&bound.key),
                        Some(bound) => view.lower_bound(&bound.key),
                        None => view.count() as usize,
                    }
                };
                self.leaf = Some(leaf);
                if idx == 0 {
                    self.step_back()?;
                } else {
                    self.pos = idx - 1;
                }
            }
            Direction::NoMovement => unreachable!("handled above"),
        }
        Ok(())
    }

    /// Whether the page's bloom filter proves the equality target absent
    fn bloom_rejects(&self, leaf: &BoundLeaf) -> Result<bool> {
        let Some(target) = self.bounds.equality_key() else {
            return Ok(false);
        };
        let force = self.index.meta().options.knobs.force_bloom_reject;
        Ok(leaf.view().probe_bloom(target, force)? == Some(false))
    }

    /// Advance past the emitted (or skipped) position
    fn move_on(&mut self) -> Result<()> {
        match self.direction {
            Direction::Forward => {
                self.pos += 1;
                Ok(())
            }
            Direction::Backward => {
                if self.pos == 0 {
                    self.step_back()
                } else {
                    self.pos -= 1;
                    Ok(())
                }
            }
            Direction::NoMovement => Ok(()),
        }
    }

    /// Move to the next leaf along the rightlink chain, skipping pages the
    /// bloom filter proves empty for an equality target
    fn advance_leaf(&mut self) -> Result<()> {
        loop {
            interrupt::check()?;

            let next = self
                .leaf
                .as_ref()
                .map_or(BlockId::NONE, |leaf| leaf.page.header.rightlink);
            // Release before pinning the neighbor: one leaf pin at a time
            self.leaf = None;
            self.cached_run = None;

            if !next.is_some() {
                self.finish();
                return Ok(());
            }

            let leaf = self.bind(next)?;
            if self.bounds.prunes_at_or_after(leaf.view().first_key()) {
                // Equality-stop and upper-bound prune: never read into the page
                trace!("forward scan pruned at block {}", next);
                self.finish();
                return Ok(());
            }
            if self.bloom_rejects(&leaf)? {
                self.leaf = Some(leaf);
                continue;
            }

            self.issue_prefetch(next);
            self.leaf = Some(leaf);
            self.pos = 0;
            return Ok(());
        }
    }

    /// Move to the predecessor leaf via root re-descent
    fn step_back(&mut self) -> Result<()> {
        loop {
            interrupt::check()?;

            let Some(current) = self.leaf.as_ref() else {
                self.finish();
                return Ok(());
            };
            let current_block = current.pin.block();
            let first_key = current.view().first_key().to_vec();
            self.leaf = None;
            self.cached_run = None;

            let Some(prev) = prev_leaf(self.index, current_block, &first_key)? else {
                self.finish();
                return Ok(());
            };

            let leaf = self.bind(prev)?;
            if self.bounds.prunes_at_or_before(leaf.view().last_key()) {
                trace!("backward scan pruned at block {}", prev);
                self.finish();
                return Ok(());
            }
            if self.bloom_rejects(&leaf)? {
                self.leaf = Some(leaf);
                continue;
            }

            self.pos = leaf.count() - 1;
            self.leaf = Some(leaf);
            return Ok(());
        }
    }

    fn bind(&self, block: BlockId) -> Result<BoundLeaf> {
        let pin = self.index.store().read(block)?;
        let page = DecodedPage::parse(pin.data(), block, &self.index.meta().schema)?;
        Ok(BoundLeaf { pin, page })
    }

    /// Read ahead along the leaf chain; leaves are laid out consecutively,
    /// so the next `d` chain neighbors are the next `d` block ids.
    fn issue_prefetch(&self, current: BlockId) {
        let depth = self.index.meta().options.prefetch_depth;
        if depth <= 1 || self.direction != Direction::Forward {
            return;
        }
        let leaf_count = self.index.meta().leaf_count;
        for ahead in 1..u64::from(depth) {
            let block = current.value() + ahead;
            if block >= leaf_count {
                break;
            }
            self.index.store().prefetch(BlockId::new(block));
        }
    }

    fn finish(&mut self) {
        self.leaf = None;
        self.cached_run = None;
        self.state = State::Done;
    }
}
