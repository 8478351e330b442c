//! Plain leaf format: dense key array plus columnar payload.
//!
//! Body layout:
//! ```text
//! [key 0][key 1]...[key n-1]          n × K bytes
//! per INCLUDE column, in order:
//!   fixed width W:   n × W bytes
//!   variable-length: (n+1) × u16 offsets, then the concatenated bytes
//! ```
//!
//! Variable-length offsets are relative to the end of the offsets array, so
//! value `i` occupies `data[off[i]..off[i+1]]`.

use std::ops::Range;

use crate::page::{FormatTag, PageBuf, PageHeader, Tuples};
use crate::types::{Schema, PAGE_HEADER_SIZE};

/// Encoded body size of `range` under the plain format
pub fn plain_size<T: Tuples>(tuples: &T, range: &Range<usize>, schema: &Schema) -> usize {
    let n = range.len();
    n * schema.key_width() + columnar_payload_size(tuples, range, schema)
}

/// Body size of the columnar payload section alone (shared with key-RLE)
pub(crate) fn columnar_payload_size<T: Tuples>(
    tuples: &T,
    range: &Range<usize>,
    schema: &Schema,
) -> usize {
    let n = range.len();
    let mut size = 0;
    for (col, spec) in schema.include_columns().iter().enumerate() {
        match spec.width {
            Some(w) => size += n * w,
            None => {
                size += (n + 1) * 2;
                for pos in range.clone() {
                    size += tuples.payload(pos, col).len();
                }
            }
        }
    }
    size
}

/// Write the columnar payload section starting at `off`; returns the end offset
pub(crate) fn write_columnar_payload<T: Tuples>(
    buf: &mut [u8],
    mut off: usize,
    tuples: &T,
    range: &Range<usize>,
    schema: &Schema,
) -> usize {
    let n = range.len();
    for (col, spec) in schema.include_columns().iter().enumerate() {
        match spec.width {
            Some(w) => {
                for pos in range.clone() {
                    buf[off..off + w].copy_from_slice(tuples.payload(pos, col));
                    off += w;
                }
            }
            None => {
                let offsets_at = off;
                let data_at = off + (n + 1) * 2;
                let mut cursor = 0usize;
                for (i, pos) in range.clone().enumerate() {
                    let value = tuples.payload(pos, col);
                    buf[offsets_at + i * 2..offsets_at + i * 2 + 2]
                        .copy_from_slice(&(cursor as u16).to_le_bytes());
                    buf[data_at + cursor..data_at + cursor + value.len()].copy_from_slice(value);
                    cursor += value.len();
                }
                buf[offsets_at + n * 2..offsets_at + n * 2 + 2]
                    .copy_from_slice(&(cursor as u16).to_le_bytes());
                off = data_at + cursor;
            }
        }
    }
    off
}

/// Encode `range` as a plain page; returns the page and its body end offset
pub fn encode_plain<T: Tuples>(
    tuples: &T,
    range: Range<usize>,
    schema: &Schema,
) -> (PageBuf, usize) {
    let n = range.len();
    let key_width = schema.key_width();
    let mut page = PageBuf::new();

    let header = PageHeader::new_leaf(
        FormatTag::Plain,
        n as u16,
        key_width as u16,
        schema.fingerprint(),
    );
    header.write(page.as_bytes_mut());

    let buf = page.as_bytes_mut();
    let mut off = PAGE_HEADER_SIZE;
    for pos in range.clone() {
        buf[off..off + key_width].copy_from_slice(tuples.key(pos));
        off += key_width;
    }
    let end = write_columnar_payload(buf, off, tuples, &range, schema);

    (page, end)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Vector-backed tuple batch for codec tests
    pub struct VecTuples {
        pub keys: Vec<Vec<u8>>,
        pub payloads: Vec<Vec<Vec<u8>>>,
    }

    impl VecTuples {
        pub fn keys_only(keys: Vec<Vec<u8>>) -> Self {
            let payloads = keys.iter().map(|_| Vec::new()).collect();
            Self { keys, payloads }
        }
    }

    impl Tuples for VecTuples {
        fn len(&self) -> usize {
            self.keys.len()
        }

        fn key(&self, pos: usize) -> &[u8] {
            &self.keys[pos]
        }

        fn payload(&self, pos: usize, col: usize) -> &[u8] {
            &self.payloads[pos][col]
        }
    }
}
