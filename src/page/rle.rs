//! Run-length-encoded leaf formats.
//!
//! A run is a maximal contiguous span of equal keys (key-RLE) or equal
//! `(key, payload)` tuples (include-RLE) within one page. Two encodings are
//! supported and both must be decodable:
//!
//! - **v1** writes run entries back-to-back: `(key, run_len:u16)` for
//!   key-RLE, `(key, run_len:u16, payload tuple)` for include-RLE.
//! - **v2** writes a keys array followed by a parallel lengths array (and,
//!   for include-RLE, per-column payload arrays), enabling branchless binary
//!   search over the dense key array.
//!
//! Key-RLE keeps the per-item columnar payload of the plain format;
//! include-RLE stores one shared payload tuple per run. Runs longer than the
//! length cap are split into multiple entries on the same page.

use std::ops::Range;

use crate::page::plain::{columnar_payload_size, write_columnar_payload};
use crate::page::{FormatTag, PageBuf, PageHeader, Tuples};
use crate::types::{RleVersion, Schema, PAGE_HEADER_SIZE};

/// One run entry: `len` tuples starting at batch position `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSpan {
    pub start: usize,
    pub len: usize,
}

/// Compute key runs over `range`, splitting spans longer than `max_run_len`
pub fn key_runs<T: Tuples>(tuples: &T, range: Range<usize>, max_run_len: usize) -> Vec<RunSpan> {
    runs_by(range, max_run_len, |a, b| tuples.key(a) == tuples.key(b))
}

/// Compute whole-tuple runs over `range` (equal key and equal payload)
pub fn tuple_runs<T: Tuples>(
    tuples: &T,
    range: Range<usize>,
    ncols: usize,
    max_run_len: usize,
) -> Vec<RunSpan> {
    runs_by(range, max_run_len, |a, b| {
        tuples.key(a) == tuples.key(b)
            && (0..ncols).all(|col| tuples.payload(a, col) == tuples.payload(b, col))
    })
}

fn runs_by(
    range: Range<usize>,
    max_run_len: usize,
    same: impl Fn(usize, usize) -> bool,
) -> Vec<RunSpan> {
    let mut runs = Vec::new();
    let mut pos = range.start;
    while pos < range.end {
        let mut end = pos + 1;
        while end < range.end && end - pos < max_run_len && same(pos, end) {
            end += 1;
        }
        runs.push(RunSpan {
            start: pos,
            len: end - pos,
        });
        pos = end;
    }
    runs
}

/// Body size of `range` under key-RLE with `nruns` runs
pub fn key_rle_size<T: Tuples>(
    tuples: &T,
    range: &Range<usize>,
    nruns: usize,
    schema: &Schema,
) -> usize {
    nruns * (schema.key_width() + 2) + columnar_payload_size(tuples, range, schema)
}

/// Body size of `range` under include-RLE with `nruns` runs.
///
/// Only valid when every payload column is fixed-width.
pub fn include_rle_size(nruns: usize, schema: &Schema) -> usize {
    let payload_width = schema.fixed_payload_width().unwrap_or(0);
    nruns * (schema.key_width() + 2 + payload_width)
}

/// Encode `range` as a key-RLE page; returns the page and its body end offset
pub fn encode_key_rle<T: Tuples>(
    tuples: &T,
    range: Range<usize>,
    runs: &[RunSpan],
    schema: &Schema,
    version: RleVersion,
) -> (PageBuf, usize) {
    let key_width = schema.key_width();
    let mut page = PageBuf::new();

    let mut header = PageHeader::new_leaf(
        FormatTag::KeyRle,
        range.len() as u16,
        key_width as u16,
        schema.fingerprint(),
    );
    header.nruns = runs.len() as u16;
    header.rle_version = version as u8 + 1;
    header.write(page.as_bytes_mut());

    let buf = page.as_bytes_mut();
    let off = write_runs(buf, PAGE_HEADER_SIZE, tuples, runs, key_width, version, None);
    let end = write_columnar_payload(buf, off, tuples, &range, schema);

    (page, end)
}

/// Encode `range` as an include-RLE page; returns the page and its body end offset
pub fn encode_include_rle<T: Tuples>(
    tuples: &T,
    range: Range<usize>,
    runs: &[RunSpan],
    schema: &Schema,
    version: RleVersion,
) -> (PageBuf, usize) {
    let key_width = schema.key_width();
    let mut page = PageBuf::new();

    let mut header = PageHeader::new_leaf(
        FormatTag::IncludeRle,
        range.len() as u16,
        key_width as u16,
        schema.fingerprint(),
    );
    header.nruns = runs.len() as u16;
    header.rle_version = version as u8 + 1;
    header.write(page.as_bytes_mut());

    let buf = page.as_bytes_mut();
    let end = write_runs(
        buf,
        PAGE_HEADER_SIZE,
        tuples,
        runs,
        key_width,
        version,
        Some(schema),
    );

    (page, end)
}

/// Write the run section. With `payload: Some(_)` the shared payload tuple of
/// each run is written too (include-RLE); otherwise only keys and lengths.
fn write_runs<T: Tuples>(
    buf: &mut [u8],
    base: usize,
    tuples: &T,
    runs: &[RunSpan],
    key_width: usize,
    version: RleVersion,
    payload: Option<&Schema>,
) -> usize {
    match version {
        RleVersion::V1 => {
            let mut off = base;
            for run in runs {
                buf[off..off + key_width].copy_from_slice(tuples.key(run.start));
                off += key_width;
                buf[off..off + 2].copy_from_slice(&(run.len as u16).to_le_bytes());
                off += 2;
                if let Some(schema) = payload {
                    for (col, spec) in schema.include_columns().iter().enumerate() {
                        let w = spec.width.expect("include-RLE requires fixed payload");
                        buf[off..off + w].copy_from_slice(tuples.payload(run.start, col));
                        off += w;
                    }
                }
            }
            off
        }
        RleVersion::V2 => {
            let nruns = runs.len();
            let keys_at = base;
            let lens_at = keys_at + nruns * key_width;
            for (i, run) in runs.iter().enumerate() {
                buf[keys_at + i * key_width..keys_at + (i + 1) * key_width]
                    .copy_from_slice(tuples.key(run.start));
                buf[lens_at + i * 2..lens_at + i * 2 + 2]
                    .copy_from_slice(&(run.len as u16).to_le_bytes());
            }
            let mut off = lens_at + nruns * 2;
            if let Some(schema) = payload {
                for (col, spec) in schema.include_columns().iter().enumerate() {
                    let w = spec.width.expect("include-RLE requires fixed payload");
                    for run in runs {
                        buf[off..off + w].copy_from_slice(tuples.payload(run.start, col));
                        off += w;
                    }
                }
            }
            off
        }
    }
}
