//! Index file header.
//!
//! The first page of an index file holds metadata about the tree; the
//! blocks follow at fixed offsets. The header is CRC-checked on open.

use crate::error::{IndexError, Result};
use crate::types::{BlockId, PAGE_SIZE};

/// Magic bytes identifying an index file
pub const MAGIC: &[u8; 16] = b"BTreeIndexV001\0\0";

/// The header occupies the whole first page
pub const FILE_HEADER_SIZE: usize = PAGE_SIZE;

/// Index file header
///
/// Layout (little-endian):
/// ```text
/// Offset  Size  Description
/// 0       16    Magic string "BTreeIndexV001"
/// 16      4     Page size (currently always 8192)
/// 20      8     Total block count
/// 28      8     Root block id (u64::MAX while unset)
/// 36      4     Tree height
/// 40      8     Leaf block count
/// 48      4     CRC32 of bytes 0..48
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    /// Page size in bytes
    pub page_size: u32,
    /// Number of index blocks in the file (excluding the header page)
    pub block_count: u64,
    /// Root block of the tree
    pub root_block: BlockId,
    /// Height of the tree (0 = empty)
    pub height: u32,
    /// Number of leaf blocks; leaves occupy ids `0..leaf_count`
    pub leaf_count: u64,
}

impl FileHeader {
    /// Header for a freshly created, still-empty index file
    pub fn new() -> Self {
        Self {
            page_size: PAGE_SIZE as u32,
            block_count: 0,
            root_block: BlockId::NONE,
            height: 0,
            leaf_count: 0,
        }
    }

    /// Read and verify a header
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 52 {
            return Err(IndexError::invalid_store("header too short"));
        }
        if &bytes[0..16] != MAGIC {
            return Err(IndexError::invalid_store("invalid magic bytes"));
        }

        let stored_checksum = u32::from_le_bytes(bytes[48..52].try_into().unwrap());
        let computed_checksum = crc32fast::hash(&bytes[0..48]);
        if stored_checksum != computed_checksum {
            return Err(IndexError::corruption("file header checksum mismatch"));
        }

        let page_size = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        if page_size != PAGE_SIZE as u32 {
            return Err(IndexError::invalid_store(format!(
                "unsupported page size: {} (expected {})",
                page_size, PAGE_SIZE
            )));
        }

        Ok(Self {
            page_size,
            block_count: u64::from_le_bytes(bytes[20..28].try_into().unwrap()),
            root_block: BlockId::new(u64::from_le_bytes(bytes[28..36].try_into().unwrap())),
            height: u32::from_le_bytes(bytes[36..40].try_into().unwrap()),
            leaf_count: u64::from_le_bytes(bytes[40..48].try_into().unwrap()),
        })
    }

    /// Write this header (with checksum) into a page-sized buffer
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[..FILE_HEADER_SIZE].fill(0);
        bytes[0..16].copy_from_slice(MAGIC);
        bytes[16..20].copy_from_slice(&self.page_size.to_le_bytes());
        bytes[20..28].copy_from_slice(&self.block_count.to_le_bytes());
        bytes[28..36].copy_from_slice(&self.root_block.value().to_le_bytes());
        bytes[36..40].copy_from_slice(&self.height.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.leaf_count.to_le_bytes());

        let checksum = crc32fast::hash(&bytes[0..48]);
        bytes[48..52].copy_from_slice(&checksum.to_le_bytes());
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FileHeader {
            page_size: PAGE_SIZE as u32,
            block_count: 100,
            root_block: BlockId::new(99),
            height: 3,
            leaf_count: 90,
        };

        let mut bytes = vec![0u8; FILE_HEADER_SIZE];
        header.write(&mut bytes);

        let restored = FileHeader::read(&bytes).unwrap();
        assert_eq!(restored.block_count, 100);
        assert_eq!(restored.root_block, BlockId::new(99));
        assert_eq!(restored.height, 3);
        assert_eq!(restored.leaf_count, 90);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = vec![0u8; FILE_HEADER_SIZE];
        bytes[0..16].copy_from_slice(b"NotAnIndexFile00");
        assert!(FileHeader::read(&bytes).is_err());
    }

    #[test]
    fn test_checksum_validation() {
        let header = FileHeader::new();
        let mut bytes = vec![0u8; FILE_HEADER_SIZE];
        header.write(&mut bytes);

        bytes[20] ^= 0xFF;
        assert!(matches!(
            FileHeader::read(&bytes),
            Err(IndexError::Corruption(_))
        ));
    }
}
