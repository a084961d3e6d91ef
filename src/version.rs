//! Version: one consistent database image at a point in
//! time, plus the `VersionView` contract shared with the WAL commit records
//! of `wal/commit_record.rs`.
//!
//! Rather than having versions hold back-references into each other, every
//! version owns its page→version index outright, so dereferencing a page
//! always goes version -> file handle, never version -> version.

use std::collections::HashSet;
use std::rc::Rc;

use crate::diagnostics::DiagnosticSink;
use crate::error::Result;
use crate::file_handle::DatabaseFileHandle;
use crate::page::{self, BTreePage, Cell, PageNo, PageSource};

/// Shared read contract for the base database version and every WAL commit
/// record layered on top of it. Implementors need only supply
/// `page_size`/`read_page` (via [`PageSource`]), `version_no`,
/// `database_size_pages`, and `page_version`; the tree-walking helpers below
/// are built on top of those four primitives.
pub trait VersionView: PageSource {
    fn version_no(&self) -> u32;
    fn database_size_pages(&self) -> u32;

    /// The version that last wrote `page_no`.
    fn page_version(&self, page_no: PageNo) -> u32;

    /// Page numbers this version itself wrote.
    fn raw_updated_pages(&self) -> &HashSet<PageNo>;

    /// Reads `len` bytes at `offset` within page `page_no`.
    fn page_data(&self, page_no: PageNo, offset: usize, len: usize) -> Result<Vec<u8>> {
        let raw = self.read_page(page_no)?;
        raw.get(offset..offset + len)
            .map(|s| s.to_vec())
            .ok_or_else(|| crate::error::DissectError::end_of_file(offset as u64, raw.len() as u64))
    }

    /// Parses the page-kind byte and constructs the right typed page.
    /// `Self: Sized` keeps this out of the object-safe subset so the
    /// trait can still be named as `dyn VersionView` elsewhere if needed;
    /// every concrete caller in this crate uses a concrete `V: VersionView`.
    fn b_tree_root(&self, page_no: PageNo, strict: bool, sink: &dyn DiagnosticSink) -> Result<BTreePage>
    where
        Self: Sized,
    {
        let raw = self.read_page(page_no)?;
        page::decode_btree_page(page_no, &raw, self, strict, sink)
    }

    /// Walks a b-tree from `root`, collecting every page number reachable
    /// from it (interior and leaf). Iterative, with an explicit stack,
    /// to avoid recursion depth limits on deep or corrupt trees.
    fn collect_btree_pages(&self, root: PageNo, strict: bool, sink: &dyn DiagnosticSink) -> Result<Vec<PageNo>>
    where
        Self: Sized,
    {
        let mut pages = Vec::new();
        let mut stack = vec![root];
        while let Some(page_no) = stack.pop() {
            pages.push(page_no);
            let page = self.b_tree_root(page_no, strict, sink)?;
            if page.is_interior() {
                for cell in &page.cells {
                    if let Some(child) = cell.left_child() {
                        stack.push(child);
                    }
                }
                if let Some(rmp) = page.header.right_most_pointer {
                    stack.push(rmp);
                }
            }
        }
        Ok(pages)
    }

    /// Walks a b-tree from `root`, collecting every leaf cell together with
    /// the page it lives on.
    fn collect_leaf_cells(
        &self,
        root: PageNo,
        strict: bool,
        sink: &dyn DiagnosticSink,
    ) -> Result<Vec<(PageNo, Cell)>>
    where
        Self: Sized,
    {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(page_no) = stack.pop() {
            let page = self.b_tree_root(page_no, strict, sink)?;
            if page.is_interior() {
                for cell in &page.cells {
                    if let Some(child) = cell.left_child() {
                        stack.push(child);
                    }
                }
                if let Some(rmp) = page.header.right_most_pointer {
                    stack.push(rmp);
                }
            } else {
                let page_no = page.page_no;
                out.extend(page.cells.into_iter().map(|cell| (page_no, cell)));
            }
        }
        Ok(out)
    }
}

/// The base database image, version 0. Every page is marked
/// updated and owned by version 0.
pub struct Version {
    pub page_size: u32,
    pub database_size_pages: u32,
    /// Every page number 1..=database_size_pages; the base version owns all
    /// of them.
    pub updated_pages: HashSet<PageNo>,
    database: Rc<DatabaseFileHandle>,
}

impl Version {
    /// Builds the base version from an already-opened database file handle.
    /// `database_size_pages` comes from the header when
    /// present and nonzero; otherwise it's computed from the file size,
    /// which is fatal only when the database claims WAL journaling (which
    /// requires SQLite >= 3.7.0 to always report the page count).
    pub fn base(database: Rc<DatabaseFileHandle>, strict: bool, sink: &dyn DiagnosticSink) -> Result<Self> {
        let page_size = database.page_size();
        let header_pages = database.header.database_size_pages;
        let file_pages = (database.len() / page_size as u64) as u32;

        let database_size_pages = if header_pages != 0 {
            if header_pages != file_pages {
                let msg = format!(
                    "database header reports {header_pages} pages but file size implies {file_pages}"
                );
                if strict {
                    return Err(crate::error::DissectError::malformed_header(msg));
                }
                sink.warn(&msg);
            }
            header_pages
        } else {
            if database.header.read_format == 2 {
                return Err(crate::error::DissectError::malformed_header(
                    "database_size_pages is zero but the database uses WAL journaling (read_format=2), \
                     which requires SQLite >= 3.7.0 to always report the page count",
                ));
            }
            sink.warn("database header reports zero pages; computing database size from file size");
            file_pages
        };

        let updated_pages = (1..=database_size_pages).collect();
        Ok(Version { page_size, database_size_pages, updated_pages, database })
    }

    pub fn header(&self) -> crate::header::DatabaseHeader {
        self.database.header
    }
}

/// The b-tree page numbers covered by the freelist, walked trunk by trunk.
/// Free function so both `Version` and `CommitRecord` can call it against
/// whichever page source (and whichever header) is current for them.
pub fn freelist_pages<S: PageSource>(source: &S, first_trunk: PageNo, total: u32) -> Result<HashSet<PageNo>> {
    let mut pages = HashSet::new();
    let mut next_trunk = first_trunk;
    while next_trunk != 0 && (pages.len() as u32) < total {
        let raw = source.read_page(next_trunk)?;
        let trunk = page::decode_freelist_trunk(&raw)?;
        pages.insert(next_trunk);
        for leaf in &trunk.leaf_numbers {
            pages.insert(*leaf);
        }
        next_trunk = trunk.next_trunk;
    }
    Ok(pages)
}

/// The pointer-map page numbers present when auto-vacuum is enabled
/// (`largest_root_btree_page != 0`), spaced every `page_size / 5 + 1`
/// pages starting at page 2. Pure function
/// of the header fields involved; no page reads needed.
pub fn pointer_map_pages(largest_root_btree_page: u32, page_size: u32, database_size_pages: u32) -> HashSet<PageNo> {
    let mut pages = HashSet::new();
    if largest_root_btree_page == 0 {
        return pages;
    }
    let entries_per_page = page_size / 5;
    let stride = entries_per_page + 1;
    let mut p = 2u32;
    while p <= database_size_pages {
        pages.insert(p);
        p += stride;
    }
    pages
}

impl PageSource for Version {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read_page(&self, page_no: PageNo) -> Result<Vec<u8>> {
        let offset = (page_no as u64 - 1) * self.page_size as u64;
        self.database.read(offset, self.page_size as u64)
    }
}

impl VersionView for Version {
    fn version_no(&self) -> u32 {
        0
    }

    fn database_size_pages(&self) -> u32 {
        self.database_size_pages
    }

    fn page_version(&self, _page_no: PageNo) -> u32 {
        0
    }

    fn raw_updated_pages(&self) -> &HashSet<PageNo> {
        &self.updated_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use pretty_assertions::assert_eq;

    fn minimal_db_bytes(page_size: u16, pages: u32) -> Vec<u8> {
        let mut buf = vec![0u8; page_size as usize * pages as usize];
        buf[0..16].copy_from_slice(b"SQLite format 3\0");
        buf[16..18].copy_from_slice(&page_size.to_be_bytes());
        buf[21] = 64;
        buf[22] = 32;
        buf[23] = 32;
        buf[28..32].copy_from_slice(&pages.to_be_bytes());
        buf[44..48].copy_from_slice(&4u32.to_be_bytes());
        buf[56..60].copy_from_slice(&1u32.to_be_bytes());
        // page 1's b-tree header: empty leaf table page right after the 100-byte header.
        buf[100] = 0x0d;
        buf[105] = 0; // cell content offset high byte forced below
        buf[105..107].copy_from_slice(&(page_size as u16).to_be_bytes());
        buf
    }

    #[test]
    fn base_version_owns_every_page() {
        let bytes = minimal_db_bytes(512, 2);
        let sink = CollectingSink::default();
        let database = Rc::new(DatabaseFileHandle::from_bytes(bytes, true, &sink).unwrap());
        let version = Version::base(database, true, &sink).unwrap();
        assert_eq!(version.database_size_pages, 2);
        assert_eq!(version.updated_pages, [1, 2].into_iter().collect());
        assert_eq!(version.page_version(1), 0);
    }

    #[test]
    fn no_pointer_map_pages_without_autovacuum() {
        let bytes = minimal_db_bytes(512, 2);
        let sink = CollectingSink::default();
        let database = Rc::new(DatabaseFileHandle::from_bytes(bytes, true, &sink).unwrap());
        let version = Version::base(database, true, &sink).unwrap();
        assert!(pointer_map_pages(version.header().largest_root_btree_page, version.page_size, version.database_size_pages)
            .is_empty());
    }

    #[test]
    fn empty_freelist_when_header_reports_zero() {
        let bytes = minimal_db_bytes(512, 2);
        let sink = CollectingSink::default();
        let database = Rc::new(DatabaseFileHandle::from_bytes(bytes, true, &sink).unwrap());
        let version = Version::base(database, true, &sink).unwrap();
        let header = version.header();
        assert!(freelist_pages(&version, header.first_freelist_trunk_page, header.freelist_pages)
            .unwrap()
            .is_empty());
    }
}
