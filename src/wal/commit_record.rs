//! WAL commit record: a `Version` whose page reads are
//! layered on an earlier version via a page -> frame index, built from one
//! commit's worth of WAL frames.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::rc::Rc;

use binrw::BinRead;

use crate::bytes;
use crate::error::{DissectError, Result};
use crate::file_handle::{DatabaseFileHandle, WalFileHandle};
use crate::header::{DatabaseHeader, WalFrameHeader};
use crate::page::{PageNo, PageSource};
use crate::version::VersionView;

/// Byte layout constants shared with `file_handle.rs`/`header.rs`: a 32-byte
/// WAL header, then 24-byte frame headers each followed by one page image.
const WAL_HEADER_SIZE: u64 = 32;
const FRAME_HEADER_SIZE: u64 = 24;

/// Per-field classification of how a commit changed the database header.
/// Every flag here is checked exhaustively: any other field differing that
/// isn't accounted for by one of these flags is an `UnexpectedHeaderChange`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitFlags {
    pub database_header_modified: bool,
    pub root_b_tree_page_modified: bool,
    pub master_schema_modified: bool,
    pub freelist_pages_modified: bool,
    pub pointer_map_pages_modified: bool,
    pub file_change_counter_incremented: bool,
    pub version_valid_for_number_incremented: bool,
    pub database_size_in_pages_modified: bool,
    pub modified_first_freelist_trunk_page_number: bool,
    pub modified_number_of_freelist_pages: bool,
    pub modified_largest_root_b_tree_page_number: bool,
    pub schema_cookie_modified: bool,
    pub schema_format_number_modified: bool,
    pub database_text_encoding_modified: bool,
    pub user_version_modified: bool,
}

/// Everything about the version a new commit record is layered on top of.
/// Maps are taken by value and become the new commit's own copies rather
/// than being aliased across commits, so each `CommitRecord` can be read
/// independently of the ones built after it.
pub struct PreviousState {
    pub version_no: u32,
    pub header: DatabaseHeader,
    pub database_size_pages: u32,
    /// Pages not present here are implicitly owned by `base_version_no`.
    pub page_version_index: HashMap<PageNo, u32>,
    pub page_frame_index: HashMap<PageNo, u64>,
    pub master_schema_pages: HashSet<PageNo>,
    pub freelist_pages: HashSet<PageNo>,
    pub pointer_map_pages: HashSet<PageNo>,
}

/// One WAL commit: the contiguous frames ending at the first frame with a
/// nonzero post-commit page count.
pub struct CommitRecord {
    pub version_no: u32,
    page_size: u32,
    /// Post-commit database size in pages (the frame header field is named
    /// `page_size_after_commit` in the wire format but is actually a page
    /// *count*).
    pub committed_page_size: u32,
    /// This commit's own pages: page number -> global frame number in the
    /// WAL file (0-based, including any invalid frames skipped before it).
    pub frames: HashMap<PageNo, u64>,
    pub updated_pages: HashSet<PageNo>,
    page_version_index: HashMap<PageNo, u32>,
    page_frame_index: HashMap<PageNo, u64>,
    pub header: DatabaseHeader,
    pub flags: CommitFlags,
    base_version_no: u32,
    database: Rc<DatabaseFileHandle>,
    wal: Rc<WalFileHandle>,
}

/// Reads page `page_no` by consulting `page_version_index`/`page_frame_index`:
/// pages still owned by the base version come from the database file,
/// everything else comes from the WAL frame that last wrote it.
fn read_page_via(
    page_no: PageNo,
    page_size: u32,
    base_version_no: u32,
    page_version_index: &HashMap<PageNo, u32>,
    page_frame_index: &HashMap<PageNo, u64>,
    database: &DatabaseFileHandle,
    wal: &WalFileHandle,
) -> Result<Vec<u8>> {
    let owner = page_version_index.get(&page_no).copied().unwrap_or(base_version_no);
    if owner == base_version_no {
        let offset = (page_no as u64 - 1) * page_size as u64;
        database.read(offset, page_size as u64)
    } else {
        let frame_no = *page_frame_index.get(&page_no).ok_or_else(|| {
            DissectError::wal_inconsistent(format!(
                "page {page_no} is owned by version {owner} but has no WAL frame index entry"
            ))
        })?;
        let offset = WAL_HEADER_SIZE + frame_no * (FRAME_HEADER_SIZE + page_size as u64) + FRAME_HEADER_SIZE;
        wal.read(offset, page_size as u64)
    }
}

impl CommitRecord {
    pub fn page_version_index_snapshot(&self) -> HashMap<PageNo, u32> {
        self.page_version_index.clone()
    }

    pub fn page_frame_index_snapshot(&self) -> HashMap<PageNo, u64> {
        self.page_frame_index.clone()
    }
}

impl PageSource for CommitRecord {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read_page(&self, page_no: PageNo) -> Result<Vec<u8>> {
        read_page_via(
            page_no,
            self.page_size,
            self.base_version_no,
            &self.page_version_index,
            &self.page_frame_index,
            &self.database,
            &self.wal,
        )
    }
}

impl VersionView for CommitRecord {
    fn version_no(&self) -> u32 {
        self.version_no
    }

    fn database_size_pages(&self) -> u32 {
        self.committed_page_size
    }

    fn page_version(&self, page_no: PageNo) -> u32 {
        self.page_version_index.get(&page_no).copied().unwrap_or(self.base_version_no)
    }

    fn raw_updated_pages(&self) -> &HashSet<PageNo> {
        &self.updated_pages
    }
}

macro_rules! check_unaccounted {
    ($new:expr, $prev:expr, $field:ident) => {
        if $new.$field != $prev.$field {
            return Err(DissectError::wal_inconsistent(format!(
                "unaccounted database header change in {} ({:?} -> {:?})",
                stringify!($field),
                $prev.$field,
                $new.$field
            )));
        }
    };
}

/// Builds one `CommitRecord` from the ordered frames of a single commit.
#[allow(clippy::too_many_arguments)]
pub fn build_commit_record(
    version_no: u32,
    base_version_no: u32,
    frames_in_commit: &[(WalFrameHeader, Vec<u8>, u64)],
    previous: PreviousState,
    database: Rc<DatabaseFileHandle>,
    wal: Rc<WalFileHandle>,
) -> Result<CommitRecord> {
    // Step 1: no page repeated within the commit; exactly one commit frame.
    let mut updated_pages = HashSet::new();
    let mut frames = HashMap::new();
    let mut committed_page_size = None;
    for (frame_header, _bytes, global_frame_no) in frames_in_commit {
        if !updated_pages.insert(frame_header.page_number) {
            return Err(DissectError::wal_inconsistent(format!(
                "page {} appears twice within one WAL commit",
                frame_header.page_number
            )));
        }
        frames.insert(frame_header.page_number, *global_frame_no);
        if frame_header.is_commit_frame() {
            if committed_page_size.is_some() {
                return Err(DissectError::wal_inconsistent(
                    "more than one commit frame found within a single commit",
                ));
            }
            committed_page_size = Some(frame_header.page_size_after_commit);
        }
    }
    let committed_page_size = committed_page_size.ok_or_else(|| {
        DissectError::wal_inconsistent("commit has no frame with a nonzero page_size_after_commit")
    })?;

    let page_size = database.page_size();

    // Read page 1 under the prior version's indices before folding this
    // commit's updates in, so an updated page 1 still resolves to whatever
    // version (base or an earlier commit) last wrote it.
    let prev_page1 = read_page_via(
        1,
        page_size,
        base_version_no,
        &previous.page_version_index,
        &previous.page_frame_index,
        &database,
        &wal,
    )?;

    // Steps 2-3: page_version_index / page_frame_index copied forward, then
    // updated for every page this commit touched.
    let mut page_version_index = previous.page_version_index;
    let mut page_frame_index = previous.page_frame_index;
    for &page_no in &updated_pages {
        page_version_index.insert(page_no, version_no);
        page_frame_index.insert(page_no, frames[&page_no]);
    }

    let new_page1 = if updated_pages.contains(&1) {
        read_page_via(
            1,
            page_size,
            base_version_no,
            &page_version_index,
            &page_frame_index,
            &database,
            &wal,
        )?
    } else {
        prev_page1.clone()
    };

    let database_header_modified = bytes::md5_hex(&prev_page1[0..100]) != bytes::md5_hex(&new_page1[0..100]);
    let root_b_tree_page_modified =
        bytes::md5_hex(&prev_page1[100..page_size as usize]) != bytes::md5_hex(&new_page1[100..page_size as usize]);

    let mut cursor = Cursor::new(&new_page1[0..100]);
    let new_header = DatabaseHeader::read(&mut cursor)
        .map_err(|e| DissectError::malformed_header(format!("failed to parse post-commit database header: {e}")))?;
    let prev = previous.header;

    let master_schema_modified = previous.master_schema_pages.iter().any(|p| updated_pages.contains(p));
    let freelist_pages_modified = previous.freelist_pages.iter().any(|p| updated_pages.contains(p));
    let pointer_map_pages_modified = previous.pointer_map_pages.iter().any(|p| updated_pages.contains(p));

    let mut flags = CommitFlags {
        database_header_modified,
        root_b_tree_page_modified,
        master_schema_modified,
        freelist_pages_modified,
        pointer_map_pages_modified,
        ..Default::default()
    };

    // file_change_counter / version_valid_for_number must move together,
    // and by exactly 1 when they do.
    flags.file_change_counter_incremented = new_header.file_change_counter != prev.file_change_counter;
    flags.version_valid_for_number_incremented = new_header.version_valid_for != prev.version_valid_for;
    if flags.file_change_counter_incremented != flags.version_valid_for_number_incremented {
        return Err(DissectError::wal_inconsistent(
            "file_change_counter and version_valid_for_number must change together",
        ));
    }
    if flags.file_change_counter_incremented {
        if new_header.file_change_counter != prev.file_change_counter.wrapping_add(1) {
            return Err(DissectError::wal_inconsistent("file_change_counter must increment by exactly 1"));
        }
        if new_header.version_valid_for != prev.version_valid_for.wrapping_add(1) {
            return Err(DissectError::wal_inconsistent("version_valid_for_number must increment by exactly 1"));
        }
    }

    // largest_root_btree_page may not toggle between zero and non-zero.
    let prev_autovacuum = prev.largest_root_btree_page != 0;
    let new_autovacuum = new_header.largest_root_btree_page != 0;
    if prev_autovacuum != new_autovacuum {
        return Err(DissectError::wal_inconsistent(
            "auto-vacuum cannot be toggled after schema creation (largest_root_btree_page zero<->nonzero)",
        ));
    }
    flags.modified_largest_root_b_tree_page_number = new_header.largest_root_btree_page != prev.largest_root_btree_page;

    // schema_cookie_modified iff master_schema_modified.
    let schema_cookie_changed = new_header.schema_cookie != prev.schema_cookie;
    if schema_cookie_changed != master_schema_modified {
        return Err(DissectError::wal_inconsistent(
            "schema_cookie_modified must equal master_schema_modified",
        ));
    }
    flags.schema_cookie_modified = schema_cookie_changed;

    // schema_format_number / database_text_encoding: move together, only
    // 0 -> valid, only during initial schema creation.
    let schema_format_changed = new_header.schema_format != prev.schema_format;
    let text_encoding_changed = new_header.text_encoding != prev.text_encoding;
    if schema_format_changed != text_encoding_changed {
        return Err(DissectError::wal_inconsistent(
            "schema_format_number and database_text_encoding must change together",
        ));
    }
    if schema_format_changed {
        if prev.schema_format != 0 || prev.text_encoding != 0 {
            return Err(DissectError::wal_inconsistent(
                "schema_format_number/database_text_encoding may only move from 0 to a valid value",
            ));
        }
        if previous.database_size_pages != 1 {
            return Err(DissectError::wal_inconsistent(
                "schema_format_number/database_text_encoding may only change during initial schema creation",
            ));
        }
    }
    flags.schema_format_number_modified = schema_format_changed;
    flags.database_text_encoding_modified = text_encoding_changed;

    flags.database_size_in_pages_modified = new_header.database_size_pages != prev.database_size_pages;
    flags.user_version_modified = new_header.user_version != prev.user_version;
    flags.modified_first_freelist_trunk_page_number =
        new_header.first_freelist_trunk_page != prev.first_freelist_trunk_page;
    flags.modified_number_of_freelist_pages = new_header.freelist_pages != prev.freelist_pages;

    // Property 8 (header-change exhaustion): every other field must be
    // unchanged, or this is an UnexpectedHeaderChange.
    check_unaccounted!(new_header, prev, page_size_raw);
    check_unaccounted!(new_header, prev, write_format);
    check_unaccounted!(new_header, prev, read_format);
    check_unaccounted!(new_header, prev, reserved_bytes_per_page);
    check_unaccounted!(new_header, prev, max_payload_fraction);
    check_unaccounted!(new_header, prev, min_payload_fraction);
    check_unaccounted!(new_header, prev, leaf_payload_fraction);
    check_unaccounted!(new_header, prev, default_page_cache_size);
    check_unaccounted!(new_header, prev, incremental_vacuum);
    check_unaccounted!(new_header, prev, application_id);
    check_unaccounted!(new_header, prev, sqlite_version_number);
    if new_header.reserved != prev.reserved {
        return Err(DissectError::wal_inconsistent("unaccounted database header change in reserved bytes"));
    }

    Ok(CommitRecord {
        version_no,
        page_size,
        committed_page_size,
        frames,
        updated_pages,
        page_version_index,
        page_frame_index,
        header: new_header,
        flags,
        base_version_no,
        database,
        wal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;

    fn minimal_db_bytes(page_size: u16, pages: u32) -> Vec<u8> {
        let mut buf = vec![0u8; page_size as usize * pages as usize];
        buf[0..16].copy_from_slice(b"SQLite format 3\0");
        buf[16..18].copy_from_slice(&page_size.to_be_bytes());
        buf[18] = 2; // write format: WAL
        buf[19] = 2; // read format: WAL
        buf[21] = 64;
        buf[22] = 32;
        buf[23] = 32;
        buf[24..28].copy_from_slice(&1u32.to_be_bytes()); // file_change_counter
        buf[28..32].copy_from_slice(&(pages as u32).to_be_bytes());
        buf[44..48].copy_from_slice(&4u32.to_be_bytes()); // schema_format
        buf[56..60].copy_from_slice(&1u32.to_be_bytes()); // text_encoding
        buf[92..96].copy_from_slice(&1u32.to_be_bytes()); // version_valid_for
        buf[100] = 0x0d; // page 1 btree header: empty leaf table
        buf[105..107].copy_from_slice(&(page_size as u16).to_be_bytes());
        buf
    }

    fn frame_header_bytes(page_number: u32, page_size_after_commit: u32) -> WalFrameHeader {
        WalFrameHeader { page_number, page_size_after_commit, salt_1: 1, salt_2: 2, checksum_1: 0, checksum_2: 0 }
    }

    #[test]
    fn rejects_two_commit_frames_in_one_commit() {
        let bytes = minimal_db_bytes(512, 1);
        let sink = CollectingSink::default();
        let database = Rc::new(DatabaseFileHandle::from_bytes(bytes, true, &sink).unwrap());
        let wal_bytes = {
            let mut b = vec![0u8; 32];
            b[0..4].copy_from_slice(&crate::header::WalHeader::MAGIC_BIG_ENDIAN.to_be_bytes());
            b[4..8].copy_from_slice(&3_007_000u32.to_be_bytes());
            b[8..12].copy_from_slice(&512u32.to_be_bytes());
            b
        };
        let wal = Rc::new(WalFileHandle::from_bytes(wal_bytes, &sink).unwrap());

        let frames = vec![
            (frame_header_bytes(2, 2), vec![0u8; 512], 0u64),
            (frame_header_bytes(3, 2), vec![0u8; 512], 1u64),
        ];
        let previous = PreviousState {
            version_no: 0,
            header: database.header,
            database_size_pages: 1,
            page_version_index: HashMap::new(),
            page_frame_index: HashMap::new(),
            master_schema_pages: HashSet::new(),
            freelist_pages: HashSet::new(),
            pointer_map_pages: HashSet::new(),
        };
        let err = build_commit_record(1, 0, &frames, previous, database, wal).unwrap_err();
        assert!(matches!(err, DissectError::WalInconsistent(_)));
    }
}
