//! Scan engine: cursors, bounds, parallel claiming, cancellation.
//!
//! Scans descend from the root on open (and on every rescan), iterate
//! within and across leaves, and re-check what the tree cannot prune with
//! runtime keys. Parallel workers cooperate through one atomic cursor.

pub mod bounds;
pub mod cursor;
pub mod interrupt;
pub mod parallel;

pub use bounds::{BoundOp, RangeBound, ScanBounds, ScanKey};
pub use cursor::{Direction, RuntimeKey, ScanCursor, ScanRequest, Tuple, TupleRef};
pub use parallel::ParallelScan;
