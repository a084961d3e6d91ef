//! Page decoder: produces a typed page from a page number
//! plus its raw bytes, and owns overflow-chain walking. B-tree descent
//! itself is the caller's job (`version.rs`) — this module only classifies
//! and decodes a single page at a time.

use std::ops::Range;

use crate::bytes;
use crate::diagnostics::DiagnosticSink;
use crate::error::{DissectError, Result};
use crate::header::{BTreePageHeader, PageKindByte};
use crate::record::{decode_record, Record};
use crate::varint::read_varint;

pub type PageNo = u32;

/// Abstracts over however the caller fetches page bytes — a base database
/// reads straight off disk; a WAL commit record may redirect some pages
/// into the WAL file. Overflow-chain walking only needs this much.
pub trait PageSource {
    fn page_size(&self) -> u32;
    fn read_page(&self, page_no: PageNo) -> Result<Vec<u8>>;
}

/// A freed span of >= 4 bytes inside a B-tree page, linked from the page
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freeblock {
    pub offset: usize,
    pub size: usize,
}

/// A freed span of 1-3 bytes, not linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub offset: usize,
    pub size: usize,
}

/// An overflow chain's page numbers, in link order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OverflowChain {
    pub pages: Vec<PageNo>,
}

/// One decoded B-tree cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    TableInterior { left_child: PageNo, row_id: i64 },
    TableLeaf { row_id: i64, payload: Record, overflow: Option<OverflowChain> },
    IndexInterior { left_child: PageNo, payload: Record, overflow: Option<OverflowChain> },
    IndexLeaf { payload: Record, overflow: Option<OverflowChain> },
}

impl Cell {
    pub fn row_id(&self) -> Option<i64> {
        match self {
            Cell::TableInterior { row_id, .. } => Some(*row_id),
            Cell::TableLeaf { row_id, .. } => Some(*row_id),
            Cell::IndexInterior { .. } | Cell::IndexLeaf { .. } => None,
        }
    }

    pub fn left_child(&self) -> Option<PageNo> {
        match self {
            Cell::TableInterior { left_child, .. } | Cell::IndexInterior { left_child, .. } => {
                Some(*left_child)
            }
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&Record> {
        match self {
            Cell::TableLeaf { payload, .. }
            | Cell::IndexInterior { payload, .. }
            | Cell::IndexLeaf { payload, .. } => Some(payload),
            Cell::TableInterior { .. } => None,
        }
    }
}

/// A fully decoded B-tree page: table or index, interior or leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct BTreePage {
    pub page_no: PageNo,
    pub kind: PageKindByte,
    pub header: BTreePageHeader,
    pub cell_pointers: Vec<u16>,
    pub cells: Vec<Cell>,
    pub freeblocks: Vec<Freeblock>,
    pub fragments: Vec<Fragment>,
    /// Byte range between the cell-pointer array and the start of the cell
    /// content area.
    pub unallocated: Range<usize>,
}

impl BTreePage {
    pub fn is_table(&self) -> bool {
        self.kind.is_table()
    }

    pub fn is_interior(&self) -> bool {
        self.kind.is_interior()
    }
}

/// A freelist trunk page: `{ next_trunk, leaf_numbers }`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FreelistTrunkPage {
    pub next_trunk: PageNo,
    pub leaf_numbers: Vec<PageNo>,
}

pub fn decode_freelist_trunk(raw: &[u8]) -> Result<FreelistTrunkPage> {
    let next_trunk = bytes::read_u32_be(raw, 0)?;
    let leaf_count = bytes::read_u32_be(raw, 4)?;
    let mut leaf_numbers = Vec::with_capacity(leaf_count as usize);
    for i in 0..leaf_count {
        leaf_numbers.push(bytes::read_u32_be(raw, 8 + (i as usize) * 4)?);
    }
    Ok(FreelistTrunkPage { next_trunk, leaf_numbers })
}

/// One pointer-map entry: a page kind byte plus its parent page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerMapEntry {
    pub kind: u8,
    pub parent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PointerMapPage {
    pub entries: Vec<PointerMapEntry>,
}

pub fn decode_pointer_map_page(raw: &[u8], entry_count: usize) -> Result<PointerMapPage> {
    let mut entries = Vec::with_capacity(entry_count);
    for i in 0..entry_count {
        let off = i * 5;
        if off + 5 > raw.len() {
            break;
        }
        let kind = bytes::read_u8(raw, off)?;
        let parent = bytes::read_u32_be(raw, off + 1)?;
        if kind != 0 {
            entries.push(PointerMapEntry { kind, parent });
        }
    }
    Ok(PointerMapPage { entries })
}

enum ThresholdKind {
    /// Table leaf cells: the documented-but-wrong rule uses `u - 35`.
    TableLeaf,
    /// Index interior/leaf cells: `x = ((u-12)*64)/255 - 23`.
    Index,
}

/// Computes `(bytes_on_first_page, has_overflow)` for a cell payload of
/// `total_payload_size` bytes on a page of `page_size` bytes.
fn local_payload_size(total_payload_size: usize, page_size: usize, threshold: ThresholdKind) -> (usize, bool) {
    let u = page_size;
    let p = total_payload_size;
    let threshold_and_cap = match threshold {
        ThresholdKind::TableLeaf => u - 35,
        ThresholdKind::Index => ((u - 12) * 64) / 255 - 23,
    };
    if p <= threshold_and_cap {
        return (p, false);
    }
    let m = ((u - 12) * 32) / 255 - 23;
    let b = m + ((p - m) % (u - 4));
    let bytes_on_page = if b <= threshold_and_cap { b } else { m };
    (bytes_on_page, true)
}

/// Walks an overflow chain starting at `start_page`, stitching together the
/// bytes that did not fit on the first page. Verifies the last page's
/// `next` pointer is zero and the chain length matches the expected page
/// count.
fn walk_overflow_chain(
    start_page: PageNo,
    total_payload_size: usize,
    bytes_on_first_page: usize,
    source: &dyn PageSource,
) -> Result<(Vec<u8>, OverflowChain)> {
    let page_size = source.page_size() as usize;
    let per_page = page_size - 4;
    let remaining = total_payload_size - bytes_on_first_page;
    let expected_pages = (remaining + per_page - 1) / per_page;

    let mut pages = Vec::new();
    let mut stitched = Vec::with_capacity(remaining);
    let mut current = start_page;
    let mut left = remaining;

    loop {
        let raw = source.read_page(current)?;
        pages.push(current);
        let next = bytes::read_u32_be(&raw, 0)?;
        let take = left.min(per_page);
        stitched.extend_from_slice(&raw[4..4 + take]);
        left -= take;

        if left == 0 {
            if next != 0 {
                return Err(DissectError::malformed_page(
                    "overflow chain continued past the expected payload length",
                    current,
                ));
            }
            break;
        }
        if next == 0 {
            return Err(DissectError::malformed_page(
                "overflow chain terminated before the expected payload length",
                current,
            ));
        }
        current = next;
    }

    if pages.len() != expected_pages {
        return Err(DissectError::malformed_page(
            format!("overflow chain length {} != expected {expected_pages}", pages.len()),
            start_page,
        ));
    }

    Ok((stitched, OverflowChain { pages }))
}

struct RawCell {
    offset: usize,
    on_page_len: usize,
    row_id: Option<i64>,
    left_child: Option<PageNo>,
    first_page_payload: Vec<u8>,
    total_payload_size: Option<usize>,
    overflow_page: Option<PageNo>,
}

fn decode_raw_cell(raw: &[u8], offset: usize, kind: PageKindByte, page_no: PageNo) -> Result<RawCell> {
    let page_size = raw.len();
    match kind {
        PageKindByte::InteriorTable => {
            let left_child = bytes::read_u32_be(raw, offset)?;
            let (row_id, row_id_width) = read_varint(raw, offset + 4)?;
            Ok(RawCell {
                offset,
                on_page_len: 4 + row_id_width,
                row_id: Some(row_id),
                left_child: Some(left_child),
                first_page_payload: Vec::new(),
                total_payload_size: None,
                overflow_page: None,
            })
        }
        PageKindByte::LeafTable => {
            let (payload_size, size_width) = read_varint(raw, offset)?;
            let (row_id, row_id_width) = read_varint(raw, offset + size_width)?;
            let header_len = size_width + row_id_width;
            let (bytes_on_page, has_overflow) =
                local_payload_size(payload_size as usize, page_size, ThresholdKind::TableLeaf);
            let payload_start = offset + header_len;
            let first_page_payload =
                raw.get(payload_start..payload_start + bytes_on_page)
                    .ok_or_else(|| DissectError::malformed_page("table leaf cell payload truncated", page_no))?
                    .to_vec();
            let overflow_page = if has_overflow {
                Some(bytes::read_u32_be(raw, payload_start + bytes_on_page)?)
            } else {
                None
            };
            let on_page_len = header_len + bytes_on_page + if has_overflow { 4 } else { 0 };
            Ok(RawCell {
                offset,
                on_page_len,
                row_id: Some(row_id),
                left_child: None,
                first_page_payload,
                total_payload_size: Some(payload_size as usize),
                overflow_page,
            })
        }
        PageKindByte::InteriorIndex => {
            let left_child = bytes::read_u32_be(raw, offset)?;
            let (payload_size, size_width) = read_varint(raw, offset + 4)?;
            let header_len = 4 + size_width;
            let (bytes_on_page, has_overflow) =
                local_payload_size(payload_size as usize, page_size, ThresholdKind::Index);
            let payload_start = offset + header_len;
            let first_page_payload =
                raw.get(payload_start..payload_start + bytes_on_page)
                    .ok_or_else(|| DissectError::malformed_page("index interior cell payload truncated", page_no))?
                    .to_vec();
            let overflow_page = if has_overflow {
                Some(bytes::read_u32_be(raw, payload_start + bytes_on_page)?)
            } else {
                None
            };
            let on_page_len = header_len + bytes_on_page + if has_overflow { 4 } else { 0 };
            Ok(RawCell {
                offset,
                on_page_len,
                row_id: None,
                left_child: Some(left_child),
                first_page_payload,
                total_payload_size: Some(payload_size as usize),
                overflow_page,
            })
        }
        PageKindByte::LeafIndex => {
            let (payload_size, size_width) = read_varint(raw, offset)?;
            let header_len = size_width;
            let (bytes_on_page, has_overflow) =
                local_payload_size(payload_size as usize, page_size, ThresholdKind::Index);
            let payload_start = offset + header_len;
            let first_page_payload =
                raw.get(payload_start..payload_start + bytes_on_page)
                    .ok_or_else(|| DissectError::malformed_page("index leaf cell payload truncated", page_no))?
                    .to_vec();
            let overflow_page = if has_overflow {
                Some(bytes::read_u32_be(raw, payload_start + bytes_on_page)?)
            } else {
                None
            };
            let on_page_len = header_len + bytes_on_page + if has_overflow { 4 } else { 0 };
            Ok(RawCell {
                offset,
                on_page_len,
                row_id: None,
                left_child: None,
                first_page_payload,
                total_payload_size: Some(payload_size as usize),
                overflow_page,
            })
        }
    }
}

fn resolve_cell(raw_cell: RawCell, kind: PageKindByte, source: &dyn PageSource) -> Result<Cell> {
    match kind {
        PageKindByte::InteriorTable => Ok(Cell::TableInterior {
            left_child: raw_cell.left_child.expect("interior table cell always has left_child"),
            row_id: raw_cell.row_id.expect("interior table cell always has row_id"),
        }),
        PageKindByte::LeafTable | PageKindByte::InteriorIndex | PageKindByte::LeafIndex => {
            let total = raw_cell.total_payload_size.expect("non-interior-table cell has a payload");
            let (full_payload, overflow) = match raw_cell.overflow_page {
                Some(start) => {
                    let (tail, chain) =
                        walk_overflow_chain(start, total, raw_cell.first_page_payload.len(), source)?;
                    let mut combined = raw_cell.first_page_payload;
                    combined.extend_from_slice(&tail);
                    (combined, Some(chain))
                }
                None => (raw_cell.first_page_payload, None),
            };
            let record = decode_record(&full_payload)?;
            Ok(match kind {
                PageKindByte::LeafTable => Cell::TableLeaf {
                    row_id: raw_cell.row_id.expect("table leaf cell always has row_id"),
                    payload: record,
                    overflow,
                },
                PageKindByte::InteriorIndex => Cell::IndexInterior {
                    left_child: raw_cell.left_child.expect("index interior cell always has left_child"),
                    payload: record,
                    overflow,
                },
                PageKindByte::LeafIndex => Cell::IndexLeaf { payload: record, overflow },
                PageKindByte::InteriorTable => unreachable!(),
            })
        }
    }
}

/// Walks freeblocks from `header.first_freeblock_offset`, following 2-byte
/// `next` pointers in ascending offset order.
fn walk_freeblocks(raw: &[u8], header: &BTreePageHeader, page_no: PageNo) -> Result<Vec<Freeblock>> {
    let mut freeblocks = Vec::new();
    let mut offset = header.first_freeblock_offset as usize;
    let mut prev = 0usize;
    while offset != 0 {
        if offset <= prev && prev != 0 {
            return Err(DissectError::malformed_page(
                "freeblock chain offsets are not strictly ascending",
                page_no,
            ));
        }
        let next = bytes::read_u16_be(raw, offset)? as usize;
        let size = bytes::read_u16_be(raw, offset + 2)? as usize;
        if size < 4 {
            return Err(DissectError::malformed_page(
                "freeblock smaller than 4 bytes must be a fragment, not linked",
                page_no,
            ));
        }
        freeblocks.push(Freeblock { offset, size });
        prev = offset;
        offset = next;
    }
    Ok(freeblocks)
}

/// Scans the cell-content area for byte spans not covered by a cell or a
/// freeblock. Spans of 1-3 bytes become fragments; anything else indicates
/// an inconsistent freeblock chain.
fn find_fragments(
    content_start: usize,
    page_size: usize,
    cell_ranges: &[Range<usize>],
    freeblocks: &[Freeblock],
    page_no: PageNo,
) -> Result<Vec<Fragment>> {
    let mut occupied: Vec<Range<usize>> = cell_ranges.to_vec();
    occupied.extend(freeblocks.iter().map(|fb| fb.offset..fb.offset + fb.size));
    occupied.sort_by_key(|r| r.start);

    let mut fragments = Vec::new();
    let mut cursor = content_start;
    for range in &occupied {
        if range.start > cursor {
            let gap = range.start - cursor;
            if gap > 3 {
                return Err(DissectError::malformed_page(
                    format!("unaccounted gap of {gap} bytes in cell content area"),
                    page_no,
                ));
            }
            if gap > 0 {
                fragments.push(Fragment { offset: cursor, size: gap });
            }
        }
        cursor = cursor.max(range.end);
    }
    if cursor < page_size {
        let gap = page_size - cursor;
        if gap > 3 {
            return Err(DissectError::malformed_page(
                format!("unaccounted gap of {gap} bytes at end of cell content area"),
                page_no,
            ));
        }
        if gap > 0 {
            fragments.push(Fragment { offset: cursor, size: gap });
        }
    }
    Ok(fragments)
}

/// Decodes a B-tree page (table/index, interior/leaf) from its raw bytes.
/// `raw` is the full page buffer (for page 1, this includes
/// the leading 100-byte database header).
pub fn decode_btree_page(
    page_no: PageNo,
    raw: &[u8],
    source: &dyn PageSource,
    strict: bool,
    sink: &dyn DiagnosticSink,
) -> Result<BTreePage> {
    use binrw::BinRead;
    use std::io::Cursor;

    let page_size = raw.len();
    let header_base = if page_no == 1 { 100 } else { 0 };
    let mut cursor = Cursor::new(&raw[header_base..]);
    let header = BTreePageHeader::read(&mut cursor)
        .map_err(|e| DissectError::malformed_page(format!("invalid b-tree page header: {e}"), page_no))?;

    let kind = header.page_kind_byte;
    let header_len = header.header_length() as usize;
    let cell_ptr_start = header_base + header_len;

    let mut cell_pointers = Vec::with_capacity(header.cell_count as usize);
    for i in 0..header.cell_count as usize {
        let off = cell_ptr_start + i * 2;
        cell_pointers.push(bytes::read_u16_be(raw, off)?);
    }

    let mut raw_cells = Vec::with_capacity(cell_pointers.len());
    let mut cell_ranges = Vec::with_capacity(cell_pointers.len());
    for &ptr in &cell_pointers {
        let raw_cell = decode_raw_cell(raw, ptr as usize, kind, page_no)?;
        cell_ranges.push(raw_cell.offset..raw_cell.offset + raw_cell.on_page_len);
        raw_cells.push(raw_cell);
    }

    let mut cells = Vec::with_capacity(raw_cells.len());
    for raw_cell in raw_cells {
        cells.push(resolve_cell(raw_cell, kind, source)?);
    }

    let freeblocks = walk_freeblocks(raw, &header, page_no)?;

    let preface_bytes = cell_ptr_start + 2 * header.cell_count as usize;
    let content_start = header.cell_content_offset() as usize;
    let unallocated = preface_bytes..content_start.max(preface_bytes);

    let fragments = find_fragments(content_start, page_size, &cell_ranges, &freeblocks, page_no)?;
    let fragment_total: usize = fragments.iter().map(|f| f.size).sum();

    if fragment_total != header.fragment_total as usize {
        let msg = format!(
            "computed fragment total {fragment_total} != header fragment_total {}",
            header.fragment_total
        );
        if strict {
            return Err(DissectError::malformed_page(msg, page_no));
        }
        sink.warn_page(&msg, page_no);
    }
    if fragment_total > 60 {
        let msg = format!("fragment total {fragment_total} exceeds the 60-byte limit");
        if strict {
            return Err(DissectError::malformed_page(msg, page_no));
        }
        sink.warn_page(&msg, page_no);
    }

    Ok(BTreePage {
        page_no,
        kind,
        header,
        cell_pointers,
        cells,
        freeblocks,
        fragments,
        unallocated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeSource {
        page_size: u32,
        pages: RefCell<HashMap<PageNo, Vec<u8>>>,
    }

    impl PageSource for FakeSource {
        fn page_size(&self) -> u32 {
            self.page_size
        }
        fn read_page(&self, page_no: PageNo) -> Result<Vec<u8>> {
            self.pages
                .borrow()
                .get(&page_no)
                .cloned()
                .ok_or_else(|| DissectError::malformed_page("missing page in fake source", page_no))
        }
    }

    fn encode_varint(mut value: i64) -> Vec<u8> {
        assert!(value >= 0);
        if value == 0 {
            return vec![0];
        }
        let mut bytes = Vec::new();
        while value > 0 {
            bytes.push((value & 0x7f) as u8);
            value >>= 7;
        }
        bytes.reverse();
        let len = bytes.len();
        for b in &mut bytes[..len - 1] {
            *b |= 0x80;
        }
        bytes
    }

    fn build_record_bytes(serial_types: &[i64], bodies: &[&[u8]]) -> Vec<u8> {
        let mut tail = Vec::new();
        for &st in serial_types {
            tail.extend(encode_varint(st));
        }
        let mut width = 1usize;
        loop {
            let total = width + tail.len();
            let enc = encode_varint(total as i64);
            if enc.len() == width {
                let mut out = enc;
                out.extend_from_slice(&tail);
                for b in bodies {
                    out.extend_from_slice(b);
                }
                return out;
            }
            width = enc.len();
        }
    }

    /// Builds a single-cell table-leaf page of the given page size, with
    /// one integer column, no overflow.
    fn single_cell_leaf_page(page_size: usize, row_id: i64, value: i64) -> Vec<u8> {
        let record = build_record_bytes(&[1], &[&[value as u8]]);
        let mut cell = Vec::new();
        cell.extend(encode_varint(record.len() as i64));
        cell.extend(encode_varint(row_id));
        cell.extend_from_slice(&record);

        let mut page = vec![0u8; page_size];
        let cell_offset = page_size - cell.len();
        page[cell_offset..].copy_from_slice(&cell);

        // page header: leaf table, no freeblock, 1 cell, content at cell_offset, 0 fragments
        page[0] = 0x0d;
        page[1..3].copy_from_slice(&0u16.to_be_bytes());
        page[3..5].copy_from_slice(&1u16.to_be_bytes());
        page[5..7].copy_from_slice(&(cell_offset as u16).to_be_bytes());
        page[7] = 0;
        // cell pointer array right after the 8-byte header
        page[8..10].copy_from_slice(&(cell_offset as u16).to_be_bytes());
        page
    }

    #[test]
    fn decodes_single_cell_table_leaf_page() {
        let page_size = 512usize;
        let raw = single_cell_leaf_page(page_size, 7, 42);
        let source = FakeSource { page_size: page_size as u32, pages: RefCell::new(HashMap::new()) };
        let sink = CollectingSink::default();
        let page = decode_btree_page(2, &raw, &source, true, &sink).unwrap();

        assert_eq!(page.cells.len(), 1);
        match &page.cells[0] {
            Cell::TableLeaf { row_id, payload, overflow } => {
                assert_eq!(*row_id, 7);
                assert_eq!(overflow, &None);
                assert_eq!(payload.columns[0].value, crate::record::Value::Integer(42));
            }
            other => panic!("expected TableLeaf, got {other:?}"),
        }
        assert!(page.fragments.is_empty());
        assert!(sink.diagnostics.borrow().is_empty());
    }

    #[test]
    fn local_payload_size_stays_on_page_when_small() {
        let (bytes_on_page, has_overflow) = local_payload_size(10, 4096, ThresholdKind::TableLeaf);
        assert_eq!(bytes_on_page, 10);
        assert!(!has_overflow);
    }

    #[test]
    fn local_payload_size_overflows_large_table_leaf_payload() {
        let page_size = 1024usize;
        let (bytes_on_page, has_overflow) = local_payload_size(10000, page_size, ThresholdKind::TableLeaf);
        assert!(has_overflow);
        let m = ((page_size - 12) * 32) / 255 - 23;
        let b = m + ((10000 - m) % (page_size - 4));
        let expected = if b <= page_size - 35 { b } else { m };
        assert_eq!(bytes_on_page, expected);
    }

    #[test]
    fn overflow_chain_length_matches_remaining_payload_size() {
        let page_size = 1024u32;
        let total_payload = 10000usize;
        let (bytes_on_page, has_overflow) =
            local_payload_size(total_payload, page_size as usize, ThresholdKind::TableLeaf);
        assert!(has_overflow);

        let per_page = page_size as usize - 4;
        let remaining = total_payload - bytes_on_page;
        let expected_chain_len = (remaining + per_page - 1) / per_page;

        let mut pages = HashMap::new();
        let mut left = remaining;
        let mut page_no = 10u32;
        let mut chain_pages = Vec::new();
        for i in 0..expected_chain_len {
            let take = left.min(per_page);
            let mut buf = vec![0xABu8; page_size as usize];
            let next = if i + 1 < expected_chain_len { page_no + 1 } else { 0 };
            buf[0..4].copy_from_slice(&next.to_be_bytes());
            pages.insert(page_no, buf);
            chain_pages.push(page_no);
            left -= take;
            page_no += 1;
        }

        let source = FakeSource { page_size, pages: RefCell::new(pages) };
        let (stitched, chain) =
            walk_overflow_chain(chain_pages[0], total_payload, bytes_on_page, &source).unwrap();
        assert_eq!(chain.pages, chain_pages);
        assert_eq!(stitched.len(), remaining);
    }

    #[test]
    fn fragments_under_four_bytes_are_accepted() {
        let cell_ranges = vec![100..110, 113..120];
        let fragments = find_fragments(100, 120, &cell_ranges, &[], 1).unwrap();
        assert_eq!(fragments, vec![Fragment { offset: 110, size: 3 }]);
    }

    #[test]
    fn unlinked_gap_of_four_or_more_is_malformed() {
        let cell_ranges = vec![100..110, 114..120];
        let err = find_fragments(100, 120, &cell_ranges, &[], 1).unwrap_err();
        assert!(matches!(err, DissectError::MalformedPage(_)));
    }

    #[test]
    fn decodes_pointer_map_entries_skipping_unused_slots() {
        let mut raw = vec![0u8; 15];
        raw[0] = 1; // PTRMAP_ROOTPAGE
        raw[1..5].copy_from_slice(&0u32.to_be_bytes());
        // slot 1 left as all-zero (kind 0 => unused, skipped).
        raw[10] = 5; // PTRMAP_OVERFLOW1
        raw[11..15].copy_from_slice(&42u32.to_be_bytes());

        let page = decode_pointer_map_page(&raw, 3).unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0], PointerMapEntry { kind: 1, parent: 0 });
        assert_eq!(page.entries[1], PointerMapEntry { kind: 5, parent: 42 });
    }

    #[test]
    fn decodes_freelist_trunk_page() {
        let mut raw = vec![0u8; 16];
        raw[0..4].copy_from_slice(&99u32.to_be_bytes());
        raw[4..8].copy_from_slice(&2u32.to_be_bytes());
        raw[8..12].copy_from_slice(&10u32.to_be_bytes());
        raw[12..16].copy_from_slice(&11u32.to_be_bytes());

        let trunk = decode_freelist_trunk(&raw).unwrap();
        assert_eq!(trunk.next_trunk, 99);
        assert_eq!(trunk.leaf_numbers, vec![10, 11]);
    }
}
