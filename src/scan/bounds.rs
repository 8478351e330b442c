//! Scan predicates: key bounds and runtime keys.
//!
//! Bounds compare against the concatenated key bytes; equality is both
//! bounds pointing at the same value, which unlocks the equality-stop
//! optimization in the cursor. Predicates the tree cannot prune (a range on
//! the second key of a two-key index, say) arrive as runtime keys and are
//! re-checked per tuple.

use crate::error::{IndexError, Result};

/// Comparison operator of one scan key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundOp {
    Gt,
    Ge,
    Eq,
    Le,
    Lt,
}

/// One scan predicate on the index key, as the embedder hands it over
#[derive(Debug, Clone)]
pub struct ScanKey {
    /// Comparison operator
    pub op: BoundOp,
    /// Comparison value (concatenated key bytes)
    pub value: Vec<u8>,
}

impl ScanKey {
    /// Build a scan key, rejecting SQL NULL comparison values
    pub fn new(op: BoundOp, value: Option<Vec<u8>>, column: usize) -> Result<Self> {
        match value {
            Some(value) => Ok(Self { op, value }),
            None => Err(IndexError::ScanKeyNull { column }),
        }
    }
}

/// One side of the key range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeBound {
    /// Bound value
    pub key: Vec<u8>,
    /// Whether a key equal to the bound passes
    pub inclusive: bool,
}

/// Key range of a scan; either side may be open
#[derive(Debug, Clone, Default)]
pub struct ScanBounds {
    /// Lower bound (`>`, `>=`, or the `=` pair)
    pub lower: Option<RangeBound>,
    /// Upper bound (`<`, `<=`, or the `=` pair)
    pub upper: Option<RangeBound>,
}

impl ScanBounds {
    /// No bounds: full scan
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Equality: both bounds on `key`
    pub fn equality(key: Vec<u8>) -> Self {
        Self {
            lower: Some(RangeBound {
                key: key.clone(),
                inclusive: true,
            }),
            upper: Some(RangeBound {
                key,
                inclusive: true,
            }),
        }
    }

    /// Range with the given inclusivity on each set side
    pub fn range(lower: Option<(Vec<u8>, bool)>, upper: Option<(Vec<u8>, bool)>) -> Self {
        Self {
            lower: lower.map(|(key, inclusive)| RangeBound { key, inclusive }),
            upper: upper.map(|(key, inclusive)| RangeBound { key, inclusive }),
        }
    }

    /// Merge embedder scan keys, keeping the tightest bound per side
    pub fn from_scan_keys(keys: &[ScanKey]) -> Self {
        let mut bounds = Self::default();
        for key in keys {
            match key.op {
                BoundOp::Gt | BoundOp::Ge => {
                    bounds.tighten_lower(&key.value, key.op == BoundOp::Ge)
                }
                BoundOp::Lt | BoundOp::Le => {
                    bounds.tighten_upper(&key.value, key.op == BoundOp::Le)
                }
                BoundOp::Eq => {
                    bounds.tighten_lower(&key.value, true);
                    bounds.tighten_upper(&key.value, true);
                }
            }
        }
        bounds
    }

    fn tighten_lower(&mut self, key: &[u8], inclusive: bool) {
        let tighter = match &self.lower {
            None => true,
            Some(cur) => key > cur.key.as_slice() || (key == cur.key && cur.inclusive && !inclusive),
        };
        if tighter {
            self.lower = Some(RangeBound {
                key: key.to_vec(),
                inclusive,
            });
        }
    }

    fn tighten_upper(&mut self, key: &[u8], inclusive: bool) {
        let tighter = match &self.upper {
            None => true,
            Some(cur) => key < cur.key.as_slice() || (key == cur.key && cur.inclusive && !inclusive),
        };
        if tighter {
            self.upper = Some(RangeBound {
                key: key.to_vec(),
                inclusive,
            });
        }
    }

    /// The equality target, when both bounds close over one value
    pub fn equality_key(&self) -> Option<&[u8]> {
        match (&self.lower, &self.upper) {
            (Some(lo), Some(hi))
                if lo.inclusive && hi.inclusive && lo.key == hi.key =>
            {
                Some(&lo.key)
            }
            _ => None,
        }
    }

    /// Whether `key` passes the lower bound
    pub fn satisfies_lower(&self, key: &[u8]) -> bool {
        match &self.lower {
            None => true,
            Some(b) if b.inclusive => key >= b.key.as_slice(),
            Some(b) => key > b.key.as_slice(),
        }
    }

    /// Whether `key` passes the upper bound
    pub fn satisfies_upper(&self, key: &[u8]) -> bool {
        match &self.upper {
            None => true,
            Some(b) if b.inclusive => key <= b.key.as_slice(),
            Some(b) => key < b.key.as_slice(),
        }
    }

    /// Page prune for forward scans: nothing at or after `first_key` can pass
    pub fn prunes_at_or_after(&self, first_key: &[u8]) -> bool {
        !self.satisfies_upper(first_key)
    }

    /// Page prune for backward scans: nothing at or before `last_key` can pass
    pub fn prunes_at_or_before(&self, last_key: &[u8]) -> bool {
        !self.satisfies_lower(last_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_key_null_rejected() {
        assert!(matches!(
            ScanKey::new(BoundOp::Eq, None, 1),
            Err(IndexError::ScanKeyNull { column: 1 })
        ));
        assert!(ScanKey::new(BoundOp::Eq, Some(vec![1]), 0).is_ok());
    }

    #[test]
    fn test_equality_detection() {
        let eq = ScanBounds::equality(vec![7]);
        assert_eq!(eq.equality_key(), Some([7].as_slice()));

        let range = ScanBounds::range(Some((vec![1], true)), Some((vec![9], false)));
        assert_eq!(range.equality_key(), None);
    }

    #[test]
    fn test_satisfies() {
        let bounds = ScanBounds::range(Some((vec![3], false)), Some((vec![8], true)));
        assert!(!bounds.satisfies_lower(&[3]));
        assert!(bounds.satisfies_lower(&[4]));
        assert!(bounds.satisfies_upper(&[8]));
        assert!(!bounds.satisfies_upper(&[9]));

        assert!(bounds.prunes_at_or_after(&[9]));
        assert!(!bounds.prunes_at_or_after(&[8]));
        assert!(bounds.prunes_at_or_before(&[3]));
        assert!(!bounds.prunes_at_or_before(&[4]));
    }

    #[test]
    fn test_from_scan_keys_tightens() {
        let bounds = ScanBounds::from_scan_keys(&[
            ScanKey::new(BoundOp::Ge, Some(vec![2]), 0).unwrap(),
            ScanKey::new(BoundOp::Gt, Some(vec![2]), 0).unwrap(),
            ScanKey::new(BoundOp::Le, Some(vec![9]), 0).unwrap(),
            ScanKey::new(BoundOp::Lt, Some(vec![7]), 0).unwrap(),
        ]);

        let lower = bounds.lower.unwrap();
        assert_eq!(lower.key, vec![2]);
        assert!(!lower.inclusive);
        let upper = bounds.upper.unwrap();
        assert_eq!(upper.key, vec![7]);
        assert!(!upper.inclusive);
    }

    #[test]
    fn test_eq_scan_key_sets_both_sides() {
        let bounds =
            ScanBounds::from_scan_keys(&[ScanKey::new(BoundOp::Eq, Some(vec![5]), 0).unwrap()]);
        assert_eq!(bounds.equality_key(), Some([5].as_slice()));
    }
}
