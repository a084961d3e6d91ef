//! Signature-driven carver: recovers deleted/partial table
//! rows from freeblocks, page unallocated space, and freelist leaf pages by
//! scanning for byte sequences that decode as a plausible cell and match a
//! table's observed `Signature`.

use std::collections::HashSet;

use crate::page::PageNo;
use crate::record::{cell_md5, decode_record, Record};
use crate::signature::Signature;
use crate::varint::{content_size, read_varint};

/// Where a carved cell's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    BTree,
    Freelist,
}

/// Which part of the page the bytes were recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Freeblock,
    Unallocated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provenance {
    pub source: Source,
    pub location: Location,
    pub page_no: PageNo,
    pub file_offset: usize,
}

/// One recovered table-leaf-shaped cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CarvedCell {
    pub row_id: i64,
    pub record: Record,
    pub provenance: Provenance,
}

/// Minimum bytes a table-leaf cell can possibly occupy: a 1-byte payload
/// size varint, a 1-byte row_id varint, and a 1-byte record header-size
/// varint.
const MIN_CANDIDATE_LEN: usize = 3;

/// Scans `region` byte-by-byte for a table-leaf cell matching `signature`.
/// `file_offset` in the returned provenance is relative to the
/// start of `region`; callers translate it to an absolute page offset.
/// `seen` accumulates cell-MD5 digests across the whole parse so carved
/// cells are deduplicated against everything emitted so far — callers should seed it with the
/// MD5s of every live cell already reported before carving.
pub fn carve_region(
    region: &[u8],
    page_no: PageNo,
    source: Source,
    location: Location,
    signature: &Signature,
    seen: &mut HashSet<String>,
) -> Vec<CarvedCell> {
    let mut carved = Vec::new();
    let mut offset = 0usize;
    while region.len().saturating_sub(offset) >= MIN_CANDIDATE_LEN {
        if let Some(cell) = try_carve_at(region, offset, page_no, source, location, signature) {
            let digest = cell_md5(Some(cell.row_id), &cell.record);
            if seen.insert(digest) {
                carved.push(cell);
            }
        }
        offset += 1;
    }
    carved
}

fn try_carve_at(
    region: &[u8],
    offset: usize,
    page_no: PageNo,
    source: Source,
    location: Location,
    signature: &Signature,
) -> Option<CarvedCell> {
    let (payload_size, size_width) = read_varint(region, offset).ok()?;
    if payload_size < 0 {
        return None;
    }
    let (row_id, row_id_width) = read_varint(region, offset + size_width).ok()?;
    let body_start = offset + size_width + row_id_width;
    let body_end = body_start.checked_add(payload_size as usize)?;
    if body_end > region.len() {
        return None;
    }
    let slice = &region[body_start..body_end];

    let record = decode_record(slice).ok()?;
    if !record_consumes_exactly(&record, slice)? {
        return None;
    }
    if !signature_compatible(&record, signature) {
        return None;
    }

    Some(CarvedCell {
        row_id,
        record,
        provenance: Provenance { source, location, page_no, file_offset: offset },
    })
}

/// Rejects candidates whose declared payload length holds trailing bytes
/// past the header + column bodies it accounts for.
fn record_consumes_exactly(record: &Record, slice: &[u8]) -> Option<bool> {
    let (header_byte_count, _) = read_varint(slice, 0).ok()?;
    let body_total: usize = record
        .columns
        .iter()
        .map(|c| content_size(c.serial_type).unwrap_or(0))
        .sum();
    Some(header_byte_count as usize + body_total == slice.len())
}

/// The decoded serial-type sequence must be compatible with the signature's
/// per-column allowed serial types. A shape
/// (column count) never observed in the table's history is rejected
/// outright; per column, a serial type is accepted if it was actually
/// observed at that position, or — for columns the observed history never
/// populated (e.g. a column added after the last sampled version) — if it
/// falls within that column's declared affinity's complete set.
fn signature_compatible(record: &Record, signature: &Signature) -> bool {
    let codes = record.serial_type_signature();
    if !signature.column_breakdown.contains_key(&codes.len()) {
        return false;
    }
    codes.iter().enumerate().all(|(idx, code)| {
        let observed_ok = signature
            .table_column_signatures
            .get(idx)
            .is_some_and(|col| col.serial_types.contains_key(code));
        if observed_ok {
            return true;
        }
        signature.schema_column_signatures.get(idx).is_some_and(|col| col.complete.contains(code))
    })
}
