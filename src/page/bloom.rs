//! Optional per-page bloom filters for equality probes.
//!
//! When `build_bloom_filters` is on, the packer appends a small section after
//! the page body and records its offset in the header. Equality scans probe
//! the filter before binary-searching the page; a negative probe skips the
//! page entirely. Filters are orthogonal to correctness — a false positive
//! just means the binary search runs.
//!
//! Section layout: `nbits:u16, nhash:u16, bits[nbits/8]`.

use crate::error::{IndexError, Result};
use crate::page::{PageBuf, PageFlags, Tuples};
use crate::types::BlockId;

/// Filter width in bits
pub const BLOOM_NBITS: usize = 1024;

/// Hash functions per probe
pub const BLOOM_NHASH: u16 = 4;

/// Largest hash count a decoder accepts
pub const MAX_NHASH: u16 = 8;

/// Bytes the section occupies in the page body
pub const fn section_size() -> usize {
    4 + BLOOM_NBITS / 8
}

/// Build the filter over the batch keys and append it at `body_end`.
///
/// Patches the header flags and bloom offset in place. `force_invalid_nhash`
/// writes a hash count of zero so decoder rejection can be exercised.
pub fn attach<T: Tuples>(
    page: &mut PageBuf,
    body_end: usize,
    tuples: &T,
    range: std::ops::Range<usize>,
    force_invalid_nhash: bool,
) {
    let buf = page.as_bytes_mut();
    let off = body_end;
    let nhash = if force_invalid_nhash { 0 } else { BLOOM_NHASH };

    buf[off..off + 2].copy_from_slice(&(BLOOM_NBITS as u16).to_le_bytes());
    buf[off + 2..off + 4].copy_from_slice(&nhash.to_le_bytes());

    let bits = &mut buf[off + 4..off + 4 + BLOOM_NBITS / 8];
    for pos in range {
        let (h1, h2) = hash_pair(tuples.key(pos));
        for i in 0..u64::from(BLOOM_NHASH) {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2)) % BLOOM_NBITS as u64) as usize;
            bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    buf[21] |= PageFlags::HAS_BLOOM;
    buf[22..24].copy_from_slice(&(off as u16).to_le_bytes());
}

/// Probe the filter for `key`: `false` means definitely absent.
///
/// `force_reject` (test knob) reports absent unconditionally so the
/// caller's page-skip path is exercised.
pub fn probe(
    page: &[u8],
    bloom_offset: usize,
    key: &[u8],
    block: BlockId,
    force_reject: bool,
) -> Result<bool> {
    if bloom_offset + 4 > page.len() {
        return Err(IndexError::malformed(block, "bloom offset out of range"));
    }
    let nbits = u16::from_le_bytes([page[bloom_offset], page[bloom_offset + 1]]) as usize;
    let nhash = u16::from_le_bytes([page[bloom_offset + 2], page[bloom_offset + 3]]);
    if nhash == 0 || nhash > MAX_NHASH {
        return Err(IndexError::BadNhash { block, nhash });
    }
    let bits_at = bloom_offset + 4;
    if nbits == 0 || nbits % 8 != 0 || bits_at + nbits / 8 > page.len() {
        return Err(IndexError::malformed(block, "bloom section out of range"));
    }

    if force_reject {
        return Ok(false);
    }

    let bits = &page[bits_at..bits_at + nbits / 8];
    let (h1, h2) = hash_pair(key);
    for i in 0..u64::from(nhash) {
        let bit = (h1.wrapping_add(i.wrapping_mul(h2)) % nbits as u64) as usize;
        if bits[bit / 8] & (1 << (bit % 8)) == 0 {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Two independent FNV-1a hashes, combined by double hashing at probe time.
///
/// Explicit constants: the filter layout is on-disk, so the hash must not
/// depend on `std` hasher internals.
fn hash_pair(key: &[u8]) -> (u64, u64) {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut h1 = FNV_OFFSET;
    for &b in key {
        h1 ^= u64::from(b);
        h1 = h1.wrapping_mul(FNV_PRIME);
    }
    let mut h2 = FNV_OFFSET ^ 0x5bd1_e995;
    for &b in key {
        h2 = h2.wrapping_mul(FNV_PRIME);
        h2 ^= u64::from(b);
    }
    (h1, h2 | 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::plain::testutil::VecTuples;

    fn filtered_page() -> (PageBuf, usize) {
        let keys: Vec<Vec<u8>> = (0..100u32).map(|k| k.to_le_bytes().to_vec()).collect();
        let tuples = VecTuples::keys_only(keys);
        let mut page = PageBuf::new();
        let body_end = 512;
        attach(&mut page, body_end, &tuples, 0..100, false);
        (page, body_end)
    }

    #[test]
    fn test_probe_present_and_absent() {
        let (page, off) = filtered_page();
        let block = BlockId::new(0);

        for k in [0u32, 42, 99] {
            assert!(probe(&page, off, &k.to_le_bytes(), block, false).unwrap());
        }
        // False positives are possible but not at this density for all probes
        let misses = (1000u32..1200)
            .filter(|k| !probe(&page, off, &k.to_le_bytes(), block, false).unwrap())
            .count();
        assert!(misses > 150);
    }

    #[test]
    fn test_force_reject() {
        let (page, off) = filtered_page();
        let hit = probe(&page, off, &42u32.to_le_bytes(), BlockId::new(0), true).unwrap();
        assert!(!hit);
    }

    #[test]
    fn test_bad_nhash_rejected() {
        let keys = vec![1u32.to_le_bytes().to_vec()];
        let tuples = VecTuples::keys_only(keys);
        let mut page = PageBuf::new();
        attach(&mut page, 512, &tuples, 0..1, true);

        assert!(matches!(
            probe(&page, 512, &1u32.to_le_bytes(), BlockId::new(5), false),
            Err(IndexError::BadNhash { nhash: 0, .. })
        ));
    }

    #[test]
    fn test_out_of_range_section_rejected() {
        let page = PageBuf::new();
        assert!(probe(&page, crate::types::PAGE_SIZE - 2, b"k", BlockId::new(1), false).is_err());
    }
}
