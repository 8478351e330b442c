//! Zero-copy leaf format: a dense packed array of fixed-width keys.
//!
//! No payload sections, no run metadata. A decoded page can hand the whole
//! key region back as one slice, which is what makes the format worth a tag
//! of its own.

use std::ops::Range;

use crate::page::{FormatTag, PageBuf, PageHeader, Tuples};
use crate::types::{Schema, PAGE_HEADER_SIZE};

/// Encode `range` as a zero-copy page; returns the page and its body end offset
pub fn encode_zero_copy<T: Tuples>(
    tuples: &T,
    range: Range<usize>,
    schema: &Schema,
) -> (PageBuf, usize) {
    let key_width = schema.key_width();
    let mut page = PageBuf::new();

    let header = PageHeader::new_leaf(
        FormatTag::ZeroCopy,
        range.len() as u16,
        key_width as u16,
        schema.fingerprint(),
    );
    header.write(page.as_bytes_mut());

    let buf = page.as_bytes_mut();
    let mut off = PAGE_HEADER_SIZE;
    for pos in range {
        buf[off..off + key_width].copy_from_slice(tuples.key(pos));
        off += key_width;
    }

    (page, off)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::plain::testutil::VecTuples;

    #[test]
    fn test_zero_copy_is_keys_only() {
        let keys: Vec<Vec<u8>> = (0..10u64).map(|k| k.to_le_bytes().to_vec()).collect();
        let tuples = VecTuples::keys_only(keys);
        let schema = Schema::single_key(8).unwrap();

        let (page, end) = encode_zero_copy(&tuples, 0..10, &schema);
        assert_eq!(end, PAGE_HEADER_SIZE + 10 * 8);
        assert_eq!(
            &page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 8],
            &0u64.to_le_bytes()
        );
        assert_eq!(&page[end..], vec![0u8; page.len() - end].as_slice());
    }
}
