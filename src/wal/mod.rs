//! WAL-derived version history: wraps the base
//! `Version` and each WAL `CommitRecord` behind one concrete enum so the
//! rest of the crate can walk a database's history without trait objects.

pub mod commit_record;

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::rc::Rc;

use binrw::BinRead;

use crate::diagnostics::DiagnosticSink;
use crate::error::Result;
use crate::file_handle::{DatabaseFileHandle, WalFileHandle};
use crate::header::WalFrameHeader;
use crate::page::{PageNo, PageSource};
use crate::schema::read_master_schema_from_cells;
use crate::version::{self, Version, VersionView};

pub use commit_record::{build_commit_record, CommitFlags, CommitRecord, PreviousState};

/// Either the base database image or one WAL commit record.
/// An enum rather than `Box<dyn VersionView>`/`Rc<dyn VersionView>` because
/// `VersionView: PageSource` would need trait-object upcasting to get back
/// to a `&dyn PageSource`, which isn't stable; a closed two-variant set
/// dispatches by `match` instead.
pub enum VersionKind {
    Base(Rc<Version>),
    Commit(Rc<CommitRecord>),
}

impl PageSource for VersionKind {
    fn page_size(&self) -> u32 {
        match self {
            VersionKind::Base(v) => v.page_size(),
            VersionKind::Commit(c) => c.page_size(),
        }
    }

    fn read_page(&self, page_no: PageNo) -> Result<Vec<u8>> {
        match self {
            VersionKind::Base(v) => v.read_page(page_no),
            VersionKind::Commit(c) => c.read_page(page_no),
        }
    }
}

impl VersionView for VersionKind {
    fn version_no(&self) -> u32 {
        match self {
            VersionKind::Base(v) => v.version_no(),
            VersionKind::Commit(c) => c.version_no(),
        }
    }

    fn database_size_pages(&self) -> u32 {
        match self {
            VersionKind::Base(v) => v.database_size_pages(),
            VersionKind::Commit(c) => c.database_size_pages(),
        }
    }

    fn page_version(&self, page_no: PageNo) -> u32 {
        match self {
            VersionKind::Base(v) => v.page_version(page_no),
            VersionKind::Commit(c) => c.page_version(page_no),
        }
    }

    fn raw_updated_pages(&self) -> &HashSet<PageNo> {
        match self {
            VersionKind::Base(v) => v.raw_updated_pages(),
            VersionKind::Commit(c) => c.raw_updated_pages(),
        }
    }
}

impl VersionKind {
    pub fn header(&self) -> crate::header::DatabaseHeader {
        match self {
            VersionKind::Base(v) => v.header(),
            VersionKind::Commit(c) => c.header,
        }
    }

    /// The master-schema b-tree's page set under this version.
    pub fn master_schema_pages(&self, strict: bool, sink: &dyn DiagnosticSink) -> Result<HashSet<PageNo>> {
        Ok(self.collect_btree_pages(1, strict, sink)?.into_iter().collect())
    }

    pub fn master_schema_entries(
        &self,
        strict: bool,
        sink: &dyn DiagnosticSink,
    ) -> Result<Vec<crate::schema::MasterSchemaEntry>> {
        let cells = self.collect_leaf_cells(1, strict, sink)?;
        read_master_schema_from_cells(cells.iter().map(|(_, c)| c))
    }

    pub fn freelist_pages(&self) -> Result<HashSet<PageNo>> {
        let header = self.header();
        version::freelist_pages(self, header.first_freelist_trunk_page, header.freelist_pages)
    }

    pub fn pointer_map_pages(&self) -> HashSet<PageNo> {
        let header = self.header();
        version::pointer_map_pages(header.largest_root_btree_page, self.page_size(), self.database_size_pages())
    }

    /// This version's raw updated-page set with freelist, pointer-map, and
    /// master-schema pages excluded. Bookkeeping writes to those pages
    /// shouldn't by themselves trigger a rewalk of an unrelated table or
    /// index's b-tree, so diffing keys off this set rather than
    /// `raw_updated_pages` directly.
    pub fn updated_b_tree_page_numbers(&self, strict: bool, sink: &dyn DiagnosticSink) -> Result<HashSet<PageNo>> {
        let mut exclude = self.freelist_pages()?;
        exclude.extend(self.pointer_map_pages());
        exclude.extend(self.master_schema_pages(strict, sink)?);
        Ok(self.raw_updated_pages().iter().filter(|p| !exclude.contains(p)).copied().collect())
    }
}

// `VersionKind::{b_tree_root, collect_btree_pages, collect_leaf_cells}` come
// from `VersionView`'s default methods, but those require `Self: Sized`,
// which `VersionKind` (a concrete enum, not a trait object) satisfies.

/// The full reconstructed history of a database: the base version plus
/// every commit found in the WAL, in version order.
pub struct VersionHistory {
    pub versions: Vec<VersionKind>,
    /// Frames that were dropped because their salts didn't match the WAL
    /// header's current salt pair,
    /// recorded for diagnostics rather than silently discarded.
    pub invalid_frame_count: u64,
}

struct ParsedFrame {
    header: WalFrameHeader,
    bytes: Vec<u8>,
    global_frame_no: u64,
}

/// Reads and salt-filters every frame in the WAL file.
fn read_frames(wal: &WalFileHandle, sink: &dyn DiagnosticSink) -> Result<(Vec<ParsedFrame>, u64)> {
    let page_size = wal.header.page_size as u64;
    let frame_size = 24 + page_size;
    let total_frames = wal.frame_count();

    let mut frames = Vec::new();
    let mut invalid = 0u64;
    for frame_no in 0..total_frames {
        let offset = 32 + frame_no * frame_size;
        let header_bytes = wal.read(offset, 24)?;
        let mut cursor = Cursor::new(&header_bytes);
        let header = WalFrameHeader::read(&mut cursor)
            .map_err(|e| crate::error::DissectError::malformed_header(format!("failed to parse WAL frame header: {e}")))?;

        if header.salt_1 != wal.header.salt_1 || header.salt_2 != wal.header.salt_2 {
            invalid += 1;
            sink.warn(&format!("WAL frame {frame_no} has a stale salt pair; skipping"));
            continue;
        }

        let page_bytes = wal.read(offset + 24, page_size)?;
        frames.push(ParsedFrame { header, bytes: page_bytes, global_frame_no: frame_no });
    }
    Ok((frames, invalid))
}

impl VersionHistory {
    /// Assembles the base version and every WAL commit layered on top of it.
    /// Frames between the last commit frame and the end of the file (an
    /// in-progress, uncommitted transaction) are reported via `sink` and
    /// otherwise ignored.
    pub fn build(
        database: Rc<DatabaseFileHandle>,
        wal: Rc<WalFileHandle>,
        strict: bool,
        sink: &dyn DiagnosticSink,
    ) -> Result<Self> {
        let base = Version::base(Rc::clone(&database), strict, sink)?;
        let base = Rc::new(base);

        let mut versions: Vec<VersionKind> = vec![VersionKind::Base(Rc::clone(&base))];

        let (frames, invalid_frame_count) = read_frames(&wal, sink)?;

        let mut state = PreviousState {
            version_no: 0,
            header: base.header(),
            database_size_pages: base.database_size_pages,
            page_version_index: HashMap::new(),
            page_frame_index: HashMap::new(),
            master_schema_pages: VersionKind::Base(Rc::clone(&base)).master_schema_pages(strict, sink)?,
            freelist_pages: VersionKind::Base(Rc::clone(&base)).freelist_pages()?,
            pointer_map_pages: VersionKind::Base(Rc::clone(&base)).pointer_map_pages(),
        };

        let mut version_no = 1u32;
        let mut pending: Vec<(WalFrameHeader, Vec<u8>, u64)> = Vec::new();
        for frame in frames {
            let is_commit = frame.header.is_commit_frame();
            pending.push((frame.header, frame.bytes, frame.global_frame_no));
            if is_commit {
                let commit = build_commit_record(
                    version_no,
                    0,
                    &pending,
                    PreviousState {
                        version_no: state.version_no,
                        header: state.header,
                        database_size_pages: state.database_size_pages,
                        page_version_index: state.page_version_index.clone(),
                        page_frame_index: state.page_frame_index.clone(),
                        master_schema_pages: state.master_schema_pages.clone(),
                        freelist_pages: state.freelist_pages.clone(),
                        pointer_map_pages: state.pointer_map_pages.clone(),
                    },
                    Rc::clone(&database),
                    Rc::clone(&wal),
                )?;
                let commit = Rc::new(commit);
                let kind = VersionKind::Commit(Rc::clone(&commit));

                state.version_no = commit.version_no;
                state.header = commit.header;
                state.database_size_pages = commit.committed_page_size;
                state.page_version_index = kind_page_version_index(&kind);
                state.page_frame_index = kind_page_frame_index(&kind);
                if commit.flags.master_schema_modified {
                    state.master_schema_pages = kind.master_schema_pages(strict, sink)?;
                }
                if commit.flags.freelist_pages_modified {
                    state.freelist_pages = kind.freelist_pages()?;
                }
                // Recomputed on every commit, not gated on
                // `modified_largest_root_b_tree_page_number`: the pointer-map
                // page set is also a function of `database_size_pages`, which
                // can cross a new stride boundary on a commit that only
                // grows the database (e.g. inserting rows) without ever
                // touching which page is the largest root b-tree page.
                state.pointer_map_pages = kind.pointer_map_pages();

                versions.push(kind);
                version_no += 1;
                pending.clear();
            }
        }

        if !pending.is_empty() {
            sink.warn(&format!(
                "{} trailing WAL frame(s) have no commit frame; ignoring in-progress transaction",
                pending.len()
            ));
        }

        Ok(VersionHistory { versions, invalid_frame_count })
    }
}

fn kind_page_version_index(kind: &VersionKind) -> HashMap<PageNo, u32> {
    match kind {
        VersionKind::Commit(c) => c.page_version_index_snapshot(),
        VersionKind::Base(_) => HashMap::new(),
    }
}

fn kind_page_frame_index(kind: &VersionKind) -> HashMap<PageNo, u64> {
    match kind {
        VersionKind::Commit(c) => c.page_frame_index_snapshot(),
        VersionKind::Base(_) => HashMap::new(),
    }
}
