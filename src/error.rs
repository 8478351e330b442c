//! Error types for the index engine.

use thiserror::Error;

use crate::types::BlockId;

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors surfaced by the index engine
#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A NULL key or NULL INCLUDE value was pushed during build
    #[error("NULL value in column {column} (keys and INCLUDE columns must be non-NULL)")]
    NullValue { column: usize },

    /// Text key exceeds the maximum supported width
    #[error("Key too wide: {width} bytes (max: {max})")]
    KeyTooWide { width: usize, max: usize },

    /// More key columns than the engine supports
    #[error("Too many key columns: {count} (max: {max})")]
    TooManyKeyColumns { count: usize, max: usize },

    /// More INCLUDE columns than the engine supports
    #[error("Too many INCLUDE columns: {count} (max: {max})")]
    TooManyIncludeColumns { count: usize, max: usize },

    /// Column width or value shape outside the supported set
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Text keys only support binary byte-order collation
    #[error("Non-binary collation {0:?} is not supported for text keys")]
    NonBinaryCollation(String),

    /// The leaf packer made no progress for several iterations
    #[error("Build stalled: leaf packer placed no tuples for {iterations} consecutive iterations")]
    BuildStalled { iterations: u32 },

    /// Heap-row retrieval was requested; the engine only serves index-only scans
    #[error("Not an index-only scan: heap row retrieval is not supported")]
    NotIndexOnly,

    /// A scan predicate value was NULL
    #[error("Scan key for column {column} is NULL")]
    ScanKeyNull { column: usize },

    /// Page contents are inconsistent with the header
    #[error("Malformed page {block}: {reason}")]
    MalformedPage { block: BlockId, reason: String },

    /// Page header carries a format tag the engine does not recognize
    #[error("Unknown format tag {tag:#06x} on page {block}")]
    UnknownFormatTag { block: BlockId, tag: u16 },

    /// Bloom filter section carries an invalid hash-function count
    #[error("Bad bloom filter hash count {nhash} on page {block}")]
    BadNhash { block: BlockId, nhash: u16 },

    /// Attempted mutation of a read-only index
    #[error("Index is read-only; {0} is not supported after build")]
    ReadOnly(&'static str),

    /// A cancellation request was observed at a leaf boundary
    #[error("Scan interrupted")]
    Interrupted,

    /// Requested block does not exist in the store
    #[error("Block {0} not found")]
    BlockNotFound(BlockId),

    /// Data corruption detected (e.g., checksum mismatch, broken leaf chain)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Store file is missing, truncated, or has an invalid format
    #[error("Invalid store: {0}")]
    InvalidStore(String),
}

impl IndexError {
    /// Create a malformed-page error
    pub fn malformed(block: BlockId, reason: impl Into<String>) -> Self {
        Self::MalformedPage {
            block,
            reason: reason.into(),
        }
    }

    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an unsupported-type error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedType(msg.into())
    }

    /// Create an invalid-store error
    pub fn invalid_store(msg: impl Into<String>) -> Self {
        Self::InvalidStore(msg.into())
    }
}
