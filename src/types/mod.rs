//! Common types used throughout the index engine.

mod block_id;
mod options;
mod schema;

pub use block_id::BlockId;
pub use options::{IndexOptions, RleVersion, RleVersionChoice, TestKnobs, Toggle};
pub use schema::{Collation, IncludeColumn, KeyColumn, KeyKind, Schema};

/// Page size in bytes (8 KiB)
pub const PAGE_SIZE: usize = 8192;

/// Fixed page header size in bytes
pub const PAGE_HEADER_SIZE: usize = 24;

/// Bytes available for the page body (keys, payload, bloom section)
pub const PAGE_BODY_CAPACITY: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Maximum tuples per page
pub const MAX_ITEMS_PER_PAGE: usize = 65534;

/// Maximum RLE runs per page; the packer emits a new page beyond this
pub const MAX_RUNS_PER_PAGE: usize = 32000;

/// Maximum tuples one run entry can describe before it is split
pub const MAX_RUN_LEN: usize = u16::MAX as usize;

/// Maximum key columns per index
pub const MAX_KEY_COLUMNS: usize = 2;

/// Maximum INCLUDE columns per index
pub const MAX_INCLUDE_COLUMNS: usize = 16;

/// Maximum text key width in bytes
pub const MAX_TEXT_KEY_WIDTH: usize = 32;

/// Supported fixed column widths
pub const FIXED_WIDTHS: [usize; 6] = [1, 2, 4, 6, 8, 16];

/// Supported text key widths
pub const TEXT_KEY_WIDTHS: [usize; 3] = [8, 16, 32];

/// Average packed row width above which the build logs a diagnostic
pub const ROW_WIDTH_WARN_LIMIT: usize = 250;
