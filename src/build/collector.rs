//! Sorted tuple collector.
//!
//! Build input accumulates here before packing: a byte arena holding the
//! packed tuples plus an offset index for random access. The embedder must
//! push tuples already sorted under the index comparator; the collector
//! validates shape and NULLs and asserts the ordering.
//!
//! Capacity follows a doubling-then-linear policy: the entry index starts at
//! 1024 slots and doubles until the doubling threshold, after which it grows
//! by a fixed linear step. Doubling a multi-gigabyte build would waste too
//! much peak RAM; the linear tail caps the overshoot.

use log::debug;

use crate::error::{IndexError, Result};
use crate::page::Tuples;
use crate::types::{KeyKind, Schema};

/// Initial entry-index capacity
const INITIAL_CAP: usize = 1024;

/// Entry count beyond which growth switches from doubling to linear
const DOUBLING_LIMIT: usize = 8 * 1024 * 1024;

/// Linear growth step once past the doubling limit
const LINEAR_STEP: usize = 2 * 1024 * 1024;

/// Collects the sorted build stream into a packed arena
pub struct TupleCollector {
    schema: Schema,
    arena: Vec<u8>,
    offsets: Vec<u64>,
    entry_cap: usize,
}

impl TupleCollector {
    /// Create an empty collector for `schema`
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            arena: Vec::new(),
            offsets: Vec::with_capacity(INITIAL_CAP),
            entry_cap: INITIAL_CAP,
        }
    }

    /// The schema tuples are collected under
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of tuples collected so far
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether nothing has been pushed yet
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Push one tuple.
    ///
    /// `key2` must be present exactly when the schema has a second key
    /// column. `null_mask` has bit `i` set when column `i` (keys first, then
    /// INCLUDE columns) is NULL; any set bit is an error.
    pub fn push(
        &mut self,
        key1: &[u8],
        key2: Option<&[u8]>,
        payload: &[&[u8]],
        null_mask: u32,
    ) -> Result<()> {
        if null_mask != 0 {
            return Err(IndexError::NullValue {
                column: null_mask.trailing_zeros() as usize,
            });
        }

        match (self.schema.key_columns().len(), key2) {
            (1, None) | (2, Some(_)) => {}
            (1, Some(_)) => {
                return Err(IndexError::unsupported(
                    "second key column pushed into a single-key index",
                ))
            }
            _ => {
                return Err(IndexError::unsupported(
                    "missing second key column for a two-key index",
                ))
            }
        }
        if payload.len() != self.schema.include_count() {
            return Err(IndexError::unsupported(format!(
                "{} payload columns pushed, schema has {}",
                payload.len(),
                self.schema.include_count()
            )));
        }

        self.grow_for_push();
        let start = self.arena.len() as u64;
        let key_cols = self.schema.key_columns();

        // Keys are stored concatenated at the tuple start so comparisons and
        // page encoders see one contiguous slice.
        let parts = [Some(key1), key2];
        for (col, part) in parts.iter().take(key_cols.len()).enumerate() {
            let bytes = part.expect("checked arity above");
            let spec = &key_cols[col];
            match spec.kind {
                KeyKind::Fixed => {
                    if bytes.len() != spec.width {
                        self.arena.truncate(start as usize);
                        return Err(IndexError::unsupported(format!(
                            "key column {} is {} bytes, declared width is {}",
                            col,
                            bytes.len(),
                            spec.width
                        )));
                    }
                    self.arena.extend_from_slice(bytes);
                }
                KeyKind::Text => {
                    if bytes.len() > spec.width {
                        self.arena.truncate(start as usize);
                        return Err(IndexError::KeyTooWide {
                            width: bytes.len(),
                            max: spec.width,
                        });
                    }
                    self.arena.extend_from_slice(bytes);
                    self.arena
                        .extend(std::iter::repeat(0u8).take(spec.width - bytes.len()));
                }
            }
        }

        for (col, spec) in self.schema.include_columns().iter().enumerate() {
            let bytes = payload[col];
            match spec.width {
                Some(w) => {
                    if bytes.len() != w {
                        self.arena.truncate(start as usize);
                        return Err(IndexError::unsupported(format!(
                            "INCLUDE column {} is {} bytes, declared width is {}",
                            col,
                            bytes.len(),
                            w
                        )));
                    }
                    self.arena.extend_from_slice(bytes);
                }
                None => {
                    if bytes.len() > u16::MAX as usize {
                        self.arena.truncate(start as usize);
                        return Err(IndexError::unsupported(format!(
                            "variable-length value of {} bytes in INCLUDE column {}",
                            bytes.len(),
                            col
                        )));
                    }
                    self.arena
                        .extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                    self.arena.extend_from_slice(bytes);
                }
            }
        }

        self.offsets.push(start);

        // The embedder owns the sort; this only asserts the contract.
        debug_assert!(
            self.offsets.len() < 2 || {
                let view = self.peek_view();
                let prev = view.len() - 2;
                tuple_le(&view, prev, prev + 1)
            },
            "build stream is not sorted"
        );

        Ok(())
    }

    /// Apply the doubling-then-linear policy before an insert
    fn grow_for_push(&mut self) {
        if self.offsets.len() < self.entry_cap {
            return;
        }
        let new_cap = if self.entry_cap < DOUBLING_LIMIT {
            self.entry_cap * 2
        } else {
            self.entry_cap + LINEAR_STEP
        };
        debug!(
            "collector growing from {} to {} entries",
            self.entry_cap, new_cap
        );
        self.offsets.reserve_exact(new_cap - self.offsets.len());
        self.entry_cap = new_cap;
    }

    fn peek_view(&self) -> SortedView<'_> {
        SortedView {
            schema: &self.schema,
            arena: &self.arena,
            offsets: &self.offsets,
        }
    }

    /// Finalize into a random-access sorted view
    pub fn finish(&self) -> SortedView<'_> {
        debug!(
            "collector finalized: {} tuples, {} arena bytes",
            self.offsets.len(),
            self.arena.len()
        );
        self.peek_view()
    }
}

/// Whether tuple `a` orders at or before tuple `b` under `(key, payload)`
fn tuple_le(view: &SortedView<'_>, a: usize, b: usize) -> bool {
    match view.key(a).cmp(view.key(b)) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => {
            for col in 0..view.schema.include_count() {
                match view.payload(a, col).cmp(view.payload(b, col)) {
                    std::cmp::Ordering::Less => return true,
                    std::cmp::Ordering::Greater => return false,
                    std::cmp::Ordering::Equal => {}
                }
            }
            true
        }
    }
}

/// Finalized random-access view over the collected tuples
pub struct SortedView<'a> {
    schema: &'a Schema,
    arena: &'a [u8],
    offsets: &'a [u64],
}

impl<'a> SortedView<'a> {
    /// The schema of the collected tuples
    pub fn schema(&self) -> &Schema {
        self.schema
    }

    /// Byte offset of column `col` within the tuple at `pos`, plus its length
    fn payload_slice(&self, pos: usize, col: usize) -> (usize, usize) {
        let base = self.offsets[pos] as usize;
        let mut off = base + self.schema.key_width();
        for (c, spec) in self.schema.include_columns().iter().enumerate() {
            let len = match spec.width {
                Some(w) => w,
                None => {
                    let n = u16::from_le_bytes([self.arena[off], self.arena[off + 1]]) as usize;
                    off += 2;
                    n
                }
            };
            if c == col {
                return (off, len);
            }
            off += len;
        }
        unreachable!("column index validated by caller");
    }
}

impl Tuples for SortedView<'_> {
    fn len(&self) -> usize {
        self.offsets.len()
    }

    fn key(&self, pos: usize) -> &[u8] {
        let base = self.offsets[pos] as usize;
        &self.arena[base..base + self.schema.key_width()]
    }

    fn payload(&self, pos: usize, col: usize) -> &[u8] {
        let (off, len) = self.payload_slice(pos, col);
        &self.arena[off..off + len]
    }
}
