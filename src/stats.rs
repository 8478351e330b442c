//! Read-only index statistics.

use serde::{Deserialize, Serialize};

use crate::build::{PackCounters, TreeShape};

/// Inspector output: page counts per format and compression figures.
///
/// Collected once at build time; a built index never changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// All pages, leaves and internal
    pub total_pages: u64,
    /// Leaf pages across all formats
    pub leaf_pages: u64,
    /// Internal pages
    pub internal_pages: u64,
    /// Leaves in the plain format
    pub plain_pages: u64,
    /// Leaves in the key-RLE format
    pub key_rle_pages: u64,
    /// Leaves in the include-RLE format
    pub inc_rle_pages: u64,
    /// Leaves in the zero-copy format
    pub zerocopy_pages: u64,
    /// Zero-copy leaves as a percentage of all leaves
    pub zerocopy_pct: f64,
    /// Leaf body bytes used, as a percentage of the plain-format
    /// equivalent; 100 means no compression
    pub compression_pct: f64,
    /// Tree height (0 = empty)
    pub height: u32,
    /// Tuples stored
    pub tuple_count: u64,
}

impl IndexStats {
    /// Assemble stats from the build counters and tree shape
    pub(crate) fn from_build(counters: &PackCounters, shape: &TreeShape, leaf_pages: u64) -> Self {
        let pct = |part: u64, whole: u64| {
            if whole == 0 {
                0.0
            } else {
                part as f64 * 100.0 / whole as f64
            }
        };
        Self {
            total_pages: leaf_pages + shape.internal_pages,
            leaf_pages,
            internal_pages: shape.internal_pages,
            plain_pages: counters.plain_pages,
            key_rle_pages: counters.key_rle_pages,
            inc_rle_pages: counters.inc_rle_pages,
            zerocopy_pages: counters.zerocopy_pages,
            zerocopy_pct: pct(counters.zerocopy_pages, leaf_pages),
            compression_pct: pct(counters.used_bytes, counters.plain_bytes),
            height: shape.height,
            tuple_count: counters.tuple_count,
        }
    }

    /// Serialize for dashboards and the demo CLI
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("stats serialize to plain JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockId;

    #[test]
    fn test_from_build() {
        let counters = PackCounters {
            plain_pages: 2,
            key_rle_pages: 1,
            inc_rle_pages: 1,
            zerocopy_pages: 0,
            used_bytes: 500,
            plain_bytes: 1000,
            tuple_count: 123,
        };
        let shape = TreeShape {
            root: BlockId::new(4),
            height: 2,
            internal_pages: 1,
        };

        let stats = IndexStats::from_build(&counters, &shape, 4);
        assert_eq!(stats.total_pages, 5);
        assert_eq!(stats.leaf_pages, 4);
        assert_eq!(stats.compression_pct, 50.0);
        assert_eq!(stats.zerocopy_pct, 0.0);
        assert_eq!(stats.tuple_count, 123);
    }

    #[test]
    fn test_json_shape() {
        let stats = IndexStats::default();
        let json = stats.to_json();
        assert!(json.contains("\"totalPages\""));
        assert!(json.contains("\"compressionPct\""));
    }
}
