//! Build and scan configuration.

use serde::{Deserialize, Serialize};

/// Run-encoding layout choice for RLE pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RleVersion {
    /// Runs written back-to-back: `(key, run_len)` pairs
    V1,
    /// Keys array followed by a parallel lengths array
    V2,
}

/// Configured RLE version, with `Auto` resolving per key type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RleVersionChoice {
    V1,
    V2,
    /// v1 for text keys, v2 otherwise
    Auto,
}

/// Three-state toggle for zero-copy pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Toggle {
    On,
    Off,
    Auto,
}

/// Index configuration
///
/// All options are fixed at build (or scan open) time; the engine never
/// mutates a configuration it was handed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOptions {
    /// RLE run-encoding layout (default: auto)
    pub rle_key_version: RleVersionChoice,
    /// Build a per-page bloom filter for equality probes (default: off)
    pub build_bloom_filters: bool,
    /// Allow zero-copy leaf pages (default: auto)
    pub enable_zero_copy: Toggle,
    /// Zero-copy is skipped when the projected index exceeds this size
    pub zero_copy_threshold_mb: u32,
    /// Minimum sampled key-uniqueness ratio for zero-copy pages
    pub zero_copy_uniqueness_threshold: f64,
    /// Leaves to read ahead on each leaf transition; 1 disables prefetch
    pub prefetch_depth: u8,
    /// Leaves reserved per atomic claim in parallel scans (1..8)
    pub parallel_claim_batch: u8,
    /// Planner-visible cost of reading one page; no correctness effect
    pub cost_page: f64,
    /// Planner-visible cost of emitting one tuple; no correctness effect
    pub cost_tup: f64,
    /// Test-only behavior overrides
    #[serde(skip)]
    #[doc(hidden)]
    pub knobs: TestKnobs,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            rle_key_version: RleVersionChoice::Auto,
            build_bloom_filters: false,
            enable_zero_copy: Toggle::Auto,
            zero_copy_threshold_mb: 64,
            zero_copy_uniqueness_threshold: 0.9,
            prefetch_depth: 1,
            parallel_claim_batch: 4,
            cost_page: 1.0,
            cost_tup: 0.01,
            knobs: TestKnobs::default(),
        }
    }
}

impl IndexOptions {
    /// Resolve the RLE version for a given key type
    pub fn rle_version_for(&self, text_key: bool) -> RleVersion {
        match self.rle_key_version {
            RleVersionChoice::V1 => RleVersion::V1,
            RleVersionChoice::V2 => RleVersion::V2,
            RleVersionChoice::Auto => {
                if text_key {
                    RleVersion::V1
                } else {
                    RleVersion::V2
                }
            }
        }
    }

    /// Claim batch clamped to the supported 1..8 range
    pub fn claim_batch(&self) -> u64 {
        u64::from(self.parallel_claim_batch.clamp(1, 8))
    }
}

/// Behavior overrides reachable only from tests.
///
/// Deliberately absent from the serialized configuration surface.
#[derive(Debug, Clone, Default)]
#[doc(hidden)]
pub struct TestKnobs {
    /// Cap tuples per leaf page below the natural capacity
    pub tuples_per_page_cap: Option<u16>,
    /// Cap internal-node fanout to force tall trees and level reallocation
    pub fanout_cap: Option<usize>,
    /// Make every bloom probe report "absent" so the fallback path runs
    pub force_bloom_reject: bool,
    /// Write an invalid hash count into bloom sections
    pub force_invalid_nhash: bool,
    /// Override the worker count of convenience parallel scans
    pub force_parallel_workers: Option<usize>,
    /// Trip the packer's zero-progress guard
    pub force_loop_guard: bool,
    /// Force a parallel worker down the cursor-initialization slow path
    pub simulate_atomic_race: bool,
    /// Lower the run-length split limit below `u16::MAX`
    pub max_run_len: Option<usize>,
    /// Lower the per-page run-count limit below its hard cap
    pub runs_per_page_cap: Option<usize>,
}
