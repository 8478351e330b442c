//! Page decoding and the uniform iteration contract.
//!
//! All four leaf formats decode into a [`DecodedPage`]: header plus a
//! bounds-checked body layout, with run boundaries materialized for the RLE
//! formats. A [`PageView`] borrows the raw bytes next to the decoded layout
//! and answers the position-based contract every caller programs against:
//! `key_at`, `payload_at`, `lower_bound`, `upper_bound`, `run_bounds`.
//!
//! Dispatch is a match over the format tag resolved once at decode time —
//! the per-position accessors are the hottest path in the engine and stay
//! free of indirect calls.

use crate::error::{IndexError, Result};
use crate::page::{bloom, FormatTag, PageBuf, PageHeader};
use crate::types::{
    BlockId, RleVersion, Schema, MAX_ITEMS_PER_PAGE, MAX_RUNS_PER_PAGE, PAGE_HEADER_SIZE,
    PAGE_SIZE,
};

/// Per-item columnar section of one INCLUDE column (plain and key-RLE)
#[derive(Debug, Clone)]
struct ColumnSection {
    /// Fixed width, or `None` for a varlen column
    width: Option<usize>,
    /// Fixed: array start. Varlen: offsets-array start; data follows it.
    at: usize,
}

/// Location of the run section of an RLE page
#[derive(Debug, Clone)]
struct RunsLayout {
    version: RleVersion,
    /// Start of the run section
    at: usize,
    /// Distance between consecutive run keys
    stride: usize,
    /// v2 lengths array start; unused for v1 (length sits inside the entry)
    lens_at: usize,
}

impl RunsLayout {
    fn key_off(&self, r: usize) -> usize {
        self.at + r * self.stride
    }

    fn len_off(&self, r: usize, key_width: usize) -> usize {
        match self.version {
            RleVersion::V1 => self.key_off(r) + key_width,
            RleVersion::V2 => self.lens_at + r * 2,
        }
    }
}

/// Location of the per-run shared payload of an include-RLE page
#[derive(Debug, Clone)]
enum RunPayload {
    /// v1: `(offset within entry, width)` per column
    Inline(Vec<(usize, usize)>),
    /// v2: `(array start, width)` per column
    Columnar(Vec<(usize, usize)>),
}

#[derive(Debug, Clone)]
enum Layout {
    Plain {
        keys_at: usize,
        cols: Vec<ColumnSection>,
    },
    ZeroCopy {
        keys_at: usize,
    },
    KeyRle {
        runs: RunsLayout,
        cols: Vec<ColumnSection>,
    },
    IncludeRle {
        runs: RunsLayout,
        payload: RunPayload,
    },
}

/// A leaf page decoded and validated against a schema.
///
/// Owns no page bytes; pair it with the pinned buffer through [`PageView`].
#[derive(Debug, Clone)]
pub struct DecodedPage {
    /// The validated header
    pub header: PageHeader,
    /// Block this page was read from (for error reporting)
    pub block: BlockId,
    layout: Layout,
    /// Cumulative start position of each run; empty for non-RLE formats
    run_starts: Vec<u32>,
}

impl DecodedPage {
    /// Decode and validate a leaf page against `schema`.
    ///
    /// Every section extent and every run length is checked before it is
    /// trusted; inconsistencies fail with `MalformedPage`.
    pub fn parse(buf: &[u8], block: BlockId, schema: &Schema) -> Result<Self> {
        if buf.len() < PAGE_SIZE {
            return Err(IndexError::malformed(block, "short page buffer"));
        }
        let header = PageHeader::read(buf, block)?;

        if !header.tag.is_leaf() {
            return Err(IndexError::malformed(block, "internal page where leaf expected"));
        }
        if header.level != 0 {
            return Err(IndexError::malformed(block, "leaf page with nonzero level"));
        }

        let nitems = header.nitems as usize;
        if nitems == 0 {
            return Err(IndexError::malformed(block, "empty page"));
        }
        if nitems > MAX_ITEMS_PER_PAGE {
            return Err(IndexError::malformed(
                block,
                format!("nitems {} exceeds page capacity", nitems),
            ));
        }

        let key_width = schema.key_width();
        if header.key_width as usize != key_width {
            return Err(IndexError::malformed(
                block,
                format!(
                    "key width {} does not match schema width {}",
                    header.key_width, key_width
                ),
            ));
        }
        if header.schema_id != schema.fingerprint() {
            return Err(IndexError::malformed(block, "schema fingerprint mismatch"));
        }

        // Body may not run into the bloom section or off the page
        let limit = if header.flags.has_bloom() {
            let off = header.bloom_offset as usize;
            if off < PAGE_HEADER_SIZE || off + bloom::section_size() > PAGE_SIZE {
                return Err(IndexError::malformed(block, "bloom offset out of range"));
            }
            off
        } else {
            PAGE_SIZE
        };

        let (layout, run_starts) = match header.tag {
            FormatTag::Plain => {
                let keys_at = PAGE_HEADER_SIZE;
                let keys_end = keys_at + nitems * key_width;
                Self::check_extent(block, keys_end, limit)?;
                let cols = Self::parse_columns(buf, block, keys_end, nitems, schema, limit)?;
                (Layout::Plain { keys_at, cols }, Vec::new())
            }
            FormatTag::ZeroCopy => {
                if schema.include_count() != 0 {
                    return Err(IndexError::malformed(
                        block,
                        "zero-copy page under a schema with INCLUDE columns",
                    ));
                }
                let keys_at = PAGE_HEADER_SIZE;
                Self::check_extent(block, keys_at + nitems * key_width, limit)?;
                (Layout::ZeroCopy { keys_at }, Vec::new())
            }
            FormatTag::KeyRle => {
                let (runs, starts, runs_end) =
                    Self::parse_runs(buf, block, &header, key_width, 0, limit)?;
                let cols = Self::parse_columns(buf, block, runs_end, nitems, schema, limit)?;
                (Layout::KeyRle { runs, cols }, starts)
            }
            FormatTag::IncludeRle => {
                let payload_width = schema.fixed_payload_width().ok_or_else(|| {
                    IndexError::malformed(block, "include-RLE page with varlen payload schema")
                })?;
                let (runs, starts, runs_end) =
                    Self::parse_runs(buf, block, &header, key_width, payload_width, limit)?;
                let nruns = header.nruns as usize;
                let payload = match runs.version {
                    RleVersion::V1 => {
                        let mut off = key_width + 2;
                        let mut cols = Vec::with_capacity(schema.include_count());
                        for spec in schema.include_columns() {
                            let w = spec.width.expect("checked fixed above");
                            cols.push((off, w));
                            off += w;
                        }
                        RunPayload::Inline(cols)
                    }
                    RleVersion::V2 => {
                        let mut at = runs_end;
                        let mut cols = Vec::with_capacity(schema.include_count());
                        for spec in schema.include_columns() {
                            let w = spec.width.expect("checked fixed above");
                            cols.push((at, w));
                            at += nruns * w;
                        }
                        Self::check_extent(block, at, limit)?;
                        RunPayload::Columnar(cols)
                    }
                };
                (Layout::IncludeRle { runs, payload }, starts)
            }
            FormatTag::Internal => unreachable!("rejected above"),
        };

        Ok(Self {
            header,
            block,
            layout,
            run_starts,
        })
    }

    fn check_extent(block: BlockId, end: usize, limit: usize) -> Result<()> {
        if end > limit {
            return Err(IndexError::malformed(block, "section extends past page end"));
        }
        Ok(())
    }

    /// Validate the run section and materialize cumulative run starts
    fn parse_runs(
        buf: &[u8],
        block: BlockId,
        header: &PageHeader,
        key_width: usize,
        inline_payload_width: usize,
        limit: usize,
    ) -> Result<(RunsLayout, Vec<u32>, usize)> {
        let nruns = header.nruns as usize;
        if nruns == 0 || nruns > MAX_RUNS_PER_PAGE {
            return Err(IndexError::malformed(
                block,
                format!("run count {} out of range", nruns),
            ));
        }
        let version = match header.rle_version {
            1 => RleVersion::V1,
            2 => RleVersion::V2,
            v => {
                return Err(IndexError::malformed(
                    block,
                    format!("unknown run encoding version {}", v),
                ))
            }
        };

        let at = PAGE_HEADER_SIZE;
        let (stride, lens_at, end) = match version {
            RleVersion::V1 => {
                let stride = key_width + 2 + inline_payload_width;
                (stride, 0, at + nruns * stride)
            }
            RleVersion::V2 => {
                let lens_at = at + nruns * key_width;
                (key_width, lens_at, lens_at + nruns * 2)
            }
        };
        Self::check_extent(block, end, limit)?;

        let runs = RunsLayout {
            version,
            at,
            stride,
            lens_at,
        };

        let mut starts = Vec::with_capacity(nruns);
        let mut total = 0usize;
        for r in 0..nruns {
            let off = runs.len_off(r, key_width);
            let len = u16::from_le_bytes([buf[off], buf[off + 1]]) as usize;
            if len == 0 {
                return Err(IndexError::malformed(block, "zero-length run"));
            }
            starts.push(total as u32);
            total += len;
        }
        if total != header.nitems as usize {
            return Err(IndexError::malformed(
                block,
                format!("run lengths sum to {} but nitems is {}", total, header.nitems),
            ));
        }

        Ok((runs, starts, end))
    }

    /// Validate the per-item columnar payload sections (plain and key-RLE)
    fn parse_columns(
        buf: &[u8],
        block: BlockId,
        mut at: usize,
        nitems: usize,
        schema: &Schema,
        limit: usize,
    ) -> Result<Vec<ColumnSection>> {
        let mut cols = Vec::with_capacity(schema.include_count());
        for spec in schema.include_columns() {
            match spec.width {
                Some(w) => {
                    Self::check_extent(block, at + nitems * w, limit)?;
                    cols.push(ColumnSection { width: Some(w), at });
                    at += nitems * w;
                }
                None => {
                    let offsets_end = at + (nitems + 1) * 2;
                    Self::check_extent(block, offsets_end, limit)?;
                    let mut prev = 0u16;
                    for i in 0..=nitems {
                        let off = u16::from_le_bytes([buf[at + i * 2], buf[at + i * 2 + 1]]);
                        if off < prev {
                            return Err(IndexError::malformed(
                                block,
                                "varlen offsets not monotonic",
                            ));
                        }
                        prev = off;
                    }
                    Self::check_extent(block, offsets_end + prev as usize, limit)?;
                    cols.push(ColumnSection { width: None, at });
                    at = offsets_end + prev as usize;
                }
            }
        }
        Ok(cols)
    }

    /// Index of the run containing position `pos`
    fn run_of(&self, pos: usize) -> usize {
        debug_assert!(!self.run_starts.is_empty());
        self.run_starts.partition_point(|&s| s as usize <= pos) - 1
    }

    /// Half-open position range of run `r`
    fn run_span(&self, r: usize) -> (usize, usize) {
        let start = self.run_starts[r] as usize;
        let end = self
            .run_starts
            .get(r + 1)
            .map_or(self.header.nitems as usize, |&s| s as usize);
        (start, end)
    }
}

/// A decoded leaf page paired with its pinned bytes.
///
/// All returned slices borrow the pinned buffer: copy out anything that must
/// outlive the pin.
#[derive(Clone, Copy)]
pub struct PageView<'a> {
    buf: &'a [u8],
    page: &'a DecodedPage,
}

impl<'a> PageView<'a> {
    /// Pair a decoded page with the buffer it was decoded from
    pub fn new(buf: &'a [u8], page: &'a DecodedPage) -> Self {
        Self { buf, page }
    }

    /// Number of tuples on the page
    pub fn count(&self) -> u32 {
        u32::from(self.page.header.nitems)
    }

    /// Rightlink of this page
    pub fn rightlink(&self) -> BlockId {
        self.page.header.rightlink
    }

    /// Key of the first tuple
    pub fn first_key(&self) -> &'a [u8] {
        self.key_at(0)
    }

    /// Key of the last tuple
    pub fn last_key(&self) -> &'a [u8] {
        self.key_at(self.page.header.nitems as usize - 1)
    }

    /// Key bytes at position `pos < count()`
    pub fn key_at(&self, pos: usize) -> &'a [u8] {
        let kw = self.page.header.key_width as usize;
        match &self.page.layout {
            Layout::Plain { keys_at, .. } | Layout::ZeroCopy { keys_at } => {
                let off = keys_at + pos * kw;
                &self.buf[off..off + kw]
            }
            Layout::KeyRle { runs, .. } | Layout::IncludeRle { runs, .. } => {
                let off = runs.key_off(self.page.run_of(pos));
                &self.buf[off..off + kw]
            }
        }
    }

    /// Payload bytes of column `col` at position `pos`.
    ///
    /// For RLE formats this is the run-shared value; for columnar layouts it
    /// is the `pos`-th element.
    pub fn payload_at(&self, pos: usize, col: usize) -> &'a [u8] {
        match &self.page.layout {
            Layout::Plain { cols, .. } | Layout::KeyRle { cols, .. } => {
                let section = &cols[col];
                match section.width {
                    Some(w) => {
                        let off = section.at + pos * w;
                        &self.buf[off..off + w]
                    }
                    None => {
                        let lo = self.varlen_offset(section.at, pos);
                        let hi = self.varlen_offset(section.at, pos + 1);
                        let data_at = section.at + (self.count() as usize + 1) * 2;
                        &self.buf[data_at + lo..data_at + hi]
                    }
                }
            }
            Layout::IncludeRle { runs, payload } => {
                let r = self.page.run_of(pos);
                match payload {
                    RunPayload::Inline(cols) => {
                        let (entry_off, w) = cols[col];
                        let base = runs.at + r * runs.stride + entry_off;
                        &self.buf[base..base + w]
                    }
                    RunPayload::Columnar(cols) => {
                        let (at, w) = cols[col];
                        let off = at + r * w;
                        &self.buf[off..off + w]
                    }
                }
            }
            Layout::ZeroCopy { .. } => &[],
        }
    }

    fn varlen_offset(&self, offsets_at: usize, i: usize) -> usize {
        u16::from_le_bytes([self.buf[offsets_at + i * 2], self.buf[offsets_at + i * 2 + 1]])
            as usize
    }

    /// First position whose key is `>= key`
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        match &self.page.layout {
            Layout::Plain { .. } | Layout::ZeroCopy { .. } => {
                self.dense_partition(|k| k < key)
            }
            Layout::KeyRle { .. } | Layout::IncludeRle { .. } => {
                let r = self.run_partition(|k| k < key);
                self.run_start_or_end(r)
            }
        }
    }

    /// First position whose key is `> key`
    pub fn upper_bound(&self, key: &[u8]) -> usize {
        match &self.page.layout {
            Layout::Plain { .. } | Layout::ZeroCopy { .. } => {
                self.dense_partition(|k| k <= key)
            }
            Layout::KeyRle { .. } | Layout::IncludeRle { .. } => {
                let r = self.run_partition(|k| k <= key);
                self.run_start_or_end(r)
            }
        }
    }

    /// Binary search over positions (dense formats)
    fn dense_partition(&self, pred: impl Fn(&[u8]) -> bool) -> usize {
        let mut lo = 0usize;
        let mut hi = self.count() as usize;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if pred(self.key_at(mid)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Binary search over runs; returns the first run not satisfying `pred`
    fn run_partition(&self, pred: impl Fn(&[u8]) -> bool) -> usize {
        let (runs, kw) = match &self.page.layout {
            Layout::KeyRle { runs, .. } | Layout::IncludeRle { runs, .. } => {
                (runs, self.page.header.key_width as usize)
            }
            _ => unreachable!(),
        };
        let nruns = self.page.header.nruns as usize;
        let mut lo = 0usize;
        let mut hi = nruns;
        while lo < hi {
            let mid = (lo + hi) / 2;
            let off = runs.key_off(mid);
            if pred(&self.buf[off..off + kw]) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn run_start_or_end(&self, r: usize) -> usize {
        if r >= self.page.run_starts.len() {
            self.count() as usize
        } else {
            self.page.run_starts[r] as usize
        }
    }

    /// Half-open position range over which the key (key-RLE) or the full
    /// tuple (include-RLE) equals the one at `pos`.
    ///
    /// Adjacent run entries holding the same value (a split long run) are
    /// merged, so the returned range is the true equal span.
    pub fn run_bounds(&self, pos: usize) -> (usize, usize) {
        match &self.page.layout {
            Layout::Plain { .. } | Layout::ZeroCopy { .. } => {
                let key = self.key_at(pos);
                (self.lower_bound(key), self.upper_bound(key))
            }
            Layout::KeyRle { .. } => {
                let key = self.key_at(pos);
                (self.lower_bound(key), self.upper_bound(key))
            }
            Layout::IncludeRle { .. } => {
                let r = self.page.run_of(pos);
                let mut first = r;
                while first > 0 && self.runs_tuple_equal(first - 1, r) {
                    first -= 1;
                }
                let nruns = self.page.header.nruns as usize;
                let mut last = r;
                while last + 1 < nruns && self.runs_tuple_equal(last + 1, r) {
                    last += 1;
                }
                (self.page.run_span(first).0, self.page.run_span(last).1)
            }
        }
    }

    /// Whether two include-RLE runs carry the same key and payload
    fn runs_tuple_equal(&self, a: usize, b: usize) -> bool {
        let (a_start, _) = self.page.run_span(a);
        let (b_start, _) = self.page.run_span(b);
        if self.key_at(a_start) != self.key_at(b_start) {
            return false;
        }
        let ncols = match &self.page.layout {
            Layout::IncludeRle { payload, .. } => match payload {
                RunPayload::Inline(cols) | RunPayload::Columnar(cols) => cols.len(),
            },
            _ => return false,
        };
        (0..ncols).all(|c| self.payload_at(a_start, c) == self.payload_at(b_start, c))
    }

    /// Probe the page's bloom filter for `key`; `None` when the page has no
    /// filter, `Some(false)` when the key is definitely absent.
    pub fn probe_bloom(&self, key: &[u8], force_reject: bool) -> Result<Option<bool>> {
        if !self.page.header.flags.has_bloom() {
            return Ok(None);
        }
        bloom::probe(
            self.buf,
            self.page.header.bloom_offset as usize,
            key,
            self.page.block,
            force_reject,
        )
        .map(Some)
    }
}

/// An internal page: separators plus child block ids.
///
/// Body layout: `nitems × K` separator keys followed by `nitems × u64`
/// child block ids.
pub struct InternalView<'a> {
    buf: &'a [u8],
    /// The validated header
    pub header: PageHeader,
    keys_at: usize,
    children_at: usize,
    key_width: usize,
}

impl<'a> InternalView<'a> {
    /// Decode and validate an internal page
    pub fn parse(buf: &'a [u8], block: BlockId, key_width: usize) -> Result<Self> {
        let header = PageHeader::read(buf, block)?;
        if header.tag != FormatTag::Internal {
            return Err(IndexError::malformed(block, "leaf page where internal expected"));
        }
        if header.level == 0 {
            return Err(IndexError::malformed(block, "internal page at level 0"));
        }
        if header.key_width as usize != key_width {
            return Err(IndexError::malformed(block, "internal key width mismatch"));
        }
        let nitems = header.nitems as usize;
        if nitems == 0 {
            return Err(IndexError::malformed(block, "empty internal page"));
        }
        let keys_at = PAGE_HEADER_SIZE;
        let children_at = keys_at + nitems * key_width;
        if children_at + nitems * 8 > PAGE_SIZE {
            return Err(IndexError::malformed(block, "internal entries past page end"));
        }
        Ok(Self {
            buf,
            header,
            keys_at,
            children_at,
            key_width,
        })
    }

    /// Number of child entries
    pub fn count(&self) -> usize {
        self.header.nitems as usize
    }

    /// Separator key of entry `i`: the minimum key in the child's subtree
    pub fn separator_at(&self, i: usize) -> &'a [u8] {
        let off = self.keys_at + i * self.key_width;
        &self.buf[off..off + self.key_width]
    }

    /// Child block id of entry `i`
    pub fn child_at(&self, i: usize) -> BlockId {
        let off = self.children_at + i * 8;
        BlockId::new(u64::from_le_bytes(self.buf[off..off + 8].try_into().unwrap()))
    }

    /// Rightmost child whose separator is `<= q`; leftmost child when every
    /// separator exceeds `q`.
    pub fn child_for(&self, q: &[u8]) -> usize {
        let i = self.partition(|sep| sep <= q);
        i.saturating_sub(1)
    }

    /// Rightmost child whose separator is `< q`; leftmost child when none is.
    ///
    /// Used by predecessor navigation to land at or before the target leaf.
    pub fn child_before(&self, q: &[u8]) -> usize {
        let i = self.partition(|sep| sep < q);
        i.saturating_sub(1)
    }

    fn partition(&self, pred: impl Fn(&[u8]) -> bool) -> usize {
        let mut lo = 0usize;
        let mut hi = self.count();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if pred(self.separator_at(mid)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

/// Encode one internal page from `(min_key, child)` entries
pub fn encode_internal(
    entries: &[(Vec<u8>, BlockId)],
    level: u16,
    key_width: usize,
    schema_id: u16,
) -> PageBuf {
    let mut page = PageBuf::new();
    let header = PageHeader::new_internal(
        entries.len() as u16,
        level,
        key_width as u16,
        schema_id,
    );
    header.write(page.as_bytes_mut());

    let buf = page.as_bytes_mut();
    let keys_at = PAGE_HEADER_SIZE;
    let children_at = keys_at + entries.len() * key_width;
    for (i, (key, child)) in entries.iter().enumerate() {
        buf[keys_at + i * key_width..keys_at + (i + 1) * key_width].copy_from_slice(key);
        buf[children_at + i * 8..children_at + (i + 1) * 8]
            .copy_from_slice(&child.value().to_le_bytes());
    }
    page
}
