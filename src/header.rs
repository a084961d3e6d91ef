//! Typed headers: the 100-byte database header, the 8/12-byte
//! B-tree page header, the 32-byte WAL header, the 24-byte WAL frame header,
//! the 136-byte WAL-index header, and the 28-byte rollback-journal header.
//!
//! These are all fixed-layout, top-down structures, so they stay `binrw`
//! derives (`#[derive(BinRead)] #[br(big, magic = ...)]`) rather than the
//! hand-written slice decoders used for pages and records.

use binrw::BinRead;

use crate::diagnostics::DiagnosticSink;
use crate::error::{DissectError, Result};

/// The first 100 bytes of the database file.
#[derive(BinRead, Copy, Clone, Debug, PartialEq)]
#[br(big, magic = b"SQLite format 3\0")]
pub struct DatabaseHeader {
    /// Page size in bytes. The on-disk value `1` denotes 65536.
    pub page_size_raw: u16,
    pub write_format: u8,
    pub read_format: u8,
    pub reserved_bytes_per_page: u8,
    pub max_payload_fraction: u8,
    pub min_payload_fraction: u8,
    pub leaf_payload_fraction: u8,
    pub file_change_counter: u32,
    pub database_size_pages: u32,
    pub first_freelist_trunk_page: u32,
    pub freelist_pages: u32,
    pub schema_cookie: u32,
    pub schema_format: u32,
    pub default_page_cache_size: u32,
    pub largest_root_btree_page: u32,
    pub text_encoding: u32,
    pub user_version: u32,
    pub incremental_vacuum: u32,
    pub application_id: u32,
    pub reserved: [u8; 20],
    pub version_valid_for: u32,
    pub sqlite_version_number: u32,
}

impl DatabaseHeader {
    /// Actual page size in bytes, resolving the `1 => 65536` exception.
    pub fn page_size(&self) -> u32 {
        if self.page_size_raw == 1 { 65536 } else { self.page_size_raw as u32 }
    }

    /// True when both schema format and text encoding are zero, i.e. a
    /// freshly-created, never-written database.
    pub fn is_empty_database(&self) -> bool {
        self.schema_format == 0 && self.text_encoding == 0
    }

    /// Validates the header's internal consistency (page size, schema
    /// format, text encoding). Soft checks are downgraded to warnings
    /// through `sink` unless `strict` is set, in which case they become
    /// hard errors.
    pub fn validate(&self, strict: bool, sink: &dyn DiagnosticSink) -> Result<()> {
        let page_size = self.page_size();
        if !page_size.is_power_of_two() || !(512..=65536).contains(&page_size) {
            return Err(DissectError::malformed_header(format!(
                "page size {page_size} is not a power of two in [512, 65536]"
            )));
        }

        if self.reserved_bytes_per_page != 0 {
            return Err(DissectError::unsupported(
                "reserved-bytes-per-page feature is not supported (must be 0)",
            ));
        }

        if (self.max_payload_fraction, self.min_payload_fraction, self.leaf_payload_fraction)
            != (64, 32, 32)
        {
            let msg = "embedded payload fractions must be {64, 32, 32}";
            if strict {
                return Err(DissectError::malformed_header(msg));
            }
            sink.warn(msg);
        }

        if !self.is_empty_database() {
            if !(1..=4).contains(&self.schema_format) {
                let msg = format!("schema format {} out of range 1..=4", self.schema_format);
                if strict {
                    return Err(DissectError::malformed_header(msg));
                }
                sink.warn(&msg);
            }
            if !(1..=3).contains(&self.text_encoding) {
                let msg = format!("text encoding {} out of range 1..=3", self.text_encoding);
                if strict {
                    return Err(DissectError::malformed_header(msg));
                }
                sink.warn(&msg);
            }
        } else {
            sink.warn("database header reports an empty (never-written) database");
        }

        if self.reserved != [0u8; 20] {
            let msg = "reserved header bytes 44..64 must be zero";
            if strict {
                return Err(DissectError::malformed_header(msg));
            }
            sink.warn(msg);
        }

        Ok(())
    }
}

/// The 8-byte (leaf) or 12-byte (interior) B-tree page header.
#[derive(BinRead, Debug, Clone, Copy, PartialEq)]
#[br(big)]
pub struct BTreePageHeader {
    pub page_kind_byte: PageKindByte,
    pub first_freeblock_offset: u16,
    pub cell_count: u16,
    pub cell_content_offset_raw: u16,
    pub fragment_total: u8,
    #[br(if(page_kind_byte.is_interior()))]
    pub right_most_pointer: Option<u32>,
}

impl BTreePageHeader {
    /// Header length in bytes: 8 for leaf pages, 12 for interior pages.
    pub fn header_length(&self) -> u16 {
        if self.page_kind_byte.is_interior() { 12 } else { 8 }
    }

    /// Offset where the cell content area begins, resolving the `0 =>
    /// 65536` exception.
    pub fn cell_content_offset(&self) -> u32 {
        if self.cell_content_offset_raw == 0 { 65536 } else { self.cell_content_offset_raw as u32 }
    }
}

/// The one-byte page-kind flag at the start of a B-tree page header.
#[derive(BinRead, Debug, Clone, Copy, PartialEq, Eq)]
#[br(repr(u8))]
pub enum PageKindByte {
    InteriorIndex = 0x02,
    InteriorTable = 0x05,
    LeafIndex = 0x0a,
    LeafTable = 0x0d,
}

impl PageKindByte {
    pub fn is_interior(self) -> bool {
        matches!(self, PageKindByte::InteriorIndex | PageKindByte::InteriorTable)
    }

    pub fn is_table(self) -> bool {
        matches!(self, PageKindByte::InteriorTable | PageKindByte::LeafTable)
    }
}

/// The 32-byte WAL file header.
#[derive(BinRead, Debug, Clone, Copy, PartialEq)]
#[br(big)]
pub struct WalHeader {
    pub magic: u32,
    pub file_format_version: u32,
    pub page_size: u32,
    pub checkpoint_sequence: u32,
    pub salt_1: u32,
    pub salt_2: u32,
    pub checksum_1: u32,
    pub checksum_2: u32,
}

impl WalHeader {
    pub const MAGIC_BIG_ENDIAN: u32 = 0x377f_0683;
    pub const MAGIC_LITTLE_ENDIAN: u32 = 0x377f_0682;

    /// Whether WAL frame checksums use big-endian arithmetic, per the
    /// magic number.
    pub fn checksums_are_big_endian(&self) -> Result<bool> {
        match self.magic {
            Self::MAGIC_BIG_ENDIAN => Ok(true),
            Self::MAGIC_LITTLE_ENDIAN => Ok(false),
            other => Err(DissectError::malformed_header(format!(
                "unrecognized WAL magic 0x{other:08x}"
            ))),
        }
    }

    pub fn validate(&self, sink: &dyn DiagnosticSink) -> Result<()> {
        self.checksums_are_big_endian()?;
        if self.file_format_version != 3_007_000 {
            return Err(DissectError::malformed_header(format!(
                "unexpected WAL file format version {}",
                self.file_format_version
            )));
        }
        if self.checkpoint_sequence != 0 {
            sink.warn("WAL header reports a nonzero checkpoint sequence");
        }
        Ok(())
    }
}

/// The 24-byte header preceding every WAL frame's page image.
#[derive(BinRead, Debug, Clone, Copy, PartialEq)]
#[br(big)]
pub struct WalFrameHeader {
    pub page_number: u32,
    /// Nonzero iff this frame commits (post-commit database size in pages).
    pub page_size_after_commit: u32,
    pub salt_1: u32,
    pub salt_2: u32,
    pub checksum_1: u32,
    pub checksum_2: u32,
}

impl WalFrameHeader {
    pub fn is_commit_frame(&self) -> bool {
        self.page_size_after_commit != 0
    }
}

/// One 48-byte replicated sub-header of the WAL-index (`-shm`) file. The
/// WAL-index file carries two of these for lock-free reads.
#[derive(BinRead, Debug, Clone, Copy, PartialEq)]
#[br(little)]
pub struct WalIndexSubHeader {
    pub version: u32,
    pub unused: u32,
    pub change_counter: u32,
    pub is_initialized: u32,
    pub database_size_pages: u32,
    pub last_valid_frame: u32,
    pub n_frames_valid: u32,
    pub frame_checksum_1: u32,
    pub frame_checksum_2: u32,
    pub salt_1: u32,
    pub salt_2: u32,
    pub checksum_1: u32,
    pub checksum_2: u32,
}

/// The full 136-byte WAL-index header: two replicated 48-byte sub-headers,
/// 24 bytes of checkpoint info, and 16 reserved lock bytes.
#[derive(BinRead, Debug, Clone, Copy, PartialEq)]
#[br(little)]
pub struct WalIndexHeader {
    pub sub_header_1: WalIndexSubHeader,
    pub sub_header_2: WalIndexSubHeader,
    pub checkpoint_info: [u8; 24],
    pub reserved_locks: [u8; 16],
}

impl WalIndexHeader {
    /// Big-endian WAL-index detection is reserved but not implemented
    ///; this only validates that the two replicas agree, which
    /// is the one check the core relies on.
    pub fn validate(&self) -> Result<()> {
        if self.sub_header_1 != self.sub_header_2 {
            return Err(DissectError::unsupported(
                "WAL-index sub-headers disagree (possible torn write or big-endian index, unsupported)",
            ));
        }
        Ok(())
    }
}

/// The 28-byte rollback-journal header; journal page records are out of
/// scope.
#[derive(BinRead, Debug, Clone, Copy, PartialEq)]
#[br(big, magic = 0xd9d505f9_20a163d7u64)]
pub struct RollbackJournalHeader {
    pub page_count: u32,
    pub nonce: u32,
    pub initial_pages: u32,
    pub sector_size: u32,
    pub page_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use binrw::BinRead;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn sample_header_bytes(schema_format: u32, text_encoding: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 100];
        buf[0..16].copy_from_slice(b"SQLite format 3\0");
        buf[16..18].copy_from_slice(&4096u16.to_be_bytes()); // page size
        buf[18] = 1; // write format
        buf[19] = 1; // read format
        buf[20] = 0; // reserved bytes per page
        buf[21] = 64; // max payload fraction
        buf[22] = 32; // min payload fraction
        buf[23] = 32; // leaf payload fraction
        buf[24..28].copy_from_slice(&1u32.to_be_bytes()); // file change counter
        buf[28..32].copy_from_slice(&2u32.to_be_bytes()); // database size pages
        buf[44..48].copy_from_slice(&schema_format.to_be_bytes());
        buf[56..60].copy_from_slice(&text_encoding.to_be_bytes());
        buf
    }

    #[test]
    fn parses_well_formed_header() {
        let bytes = sample_header_bytes(4, 1);
        let mut cursor = Cursor::new(bytes);
        let header = DatabaseHeader::read(&mut cursor).unwrap();
        assert_eq!(header.page_size(), 4096);
        assert_eq!(header.schema_format, 4);
        assert_eq!(header.text_encoding, 1);
        let sink = CollectingSink::default();
        header.validate(true, &sink).unwrap();
        assert!(sink.diagnostics.borrow().is_empty());
    }

    #[test]
    fn empty_database_header_warns_not_fails() {
        let bytes = sample_header_bytes(0, 0);
        let mut cursor = Cursor::new(bytes);
        let header = DatabaseHeader::read(&mut cursor).unwrap();
        assert!(header.is_empty_database());
        let sink = CollectingSink::default();
        header.validate(true, &sink).unwrap();
        assert_eq!(sink.diagnostics.borrow().len(), 1);
    }

    #[test]
    fn page_size_one_means_65536() {
        let mut bytes = sample_header_bytes(4, 1);
        bytes[16..18].copy_from_slice(&1u16.to_be_bytes());
        let mut cursor = Cursor::new(bytes);
        let header = DatabaseHeader::read(&mut cursor).unwrap();
        assert_eq!(header.page_size(), 65536);
    }

    #[test]
    fn btree_leaf_header_has_no_right_most_pointer() {
        let bytes = [0x0d, 0x00, 0x00, 0x00, 0x01, 0x0f, 0xa5, 0x00];
        let mut cursor = Cursor::new(bytes);
        let header = BTreePageHeader::read(&mut cursor).unwrap();
        assert_eq!(header.header_length(), 8);
        assert_eq!(header.right_most_pointer, None);
        assert_eq!(header.cell_count, 1);
    }

    #[test]
    fn btree_interior_header_has_right_most_pointer() {
        let mut bytes = vec![0x05, 0x00, 0x00, 0x00, 0x02, 0x0f, 0xa0, 0x00];
        bytes.extend_from_slice(&42u32.to_be_bytes());
        let mut cursor = Cursor::new(bytes);
        let header = BTreePageHeader::read(&mut cursor).unwrap();
        assert_eq!(header.header_length(), 12);
        assert_eq!(header.right_most_pointer, Some(42));
    }

    #[test]
    fn wal_header_detects_endianness_from_magic() {
        let mut bytes = vec![0u8; 32];
        bytes[0..4].copy_from_slice(&WalHeader::MAGIC_BIG_ENDIAN.to_be_bytes());
        bytes[4..8].copy_from_slice(&3_007_000u32.to_be_bytes());
        let mut cursor = Cursor::new(bytes);
        let header = WalHeader::read(&mut cursor).unwrap();
        assert!(header.checksums_are_big_endian().unwrap());
    }
}
