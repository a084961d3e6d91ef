//! Version-history parser: for one schema entry, walks a
//! `VersionHistory` and emits a per-version diff of added/updated/deleted
//! cells, optionally carving unallocated space and freelist leaves too.
//!
//! Modeled as an explicit iterator object owning its cross-version state
//! (`current_cells`, `current_b_tree_pages`, the carved-MD5 dedup set)
//! rather than a generator, so the borrow checker can see exactly what
//! persists between steps.

use std::collections::{HashMap, HashSet};

use crate::carver::{carve_region, CarvedCell, Location, Source};
use crate::diagnostics::DiagnosticSink;
use crate::error::Result;
use crate::header::PageKindByte;
use crate::page::{self, Cell, PageNo, PageSource};
use crate::record::cell_md5;
use crate::schema::ObjectKind;
use crate::signature::Signature;
use crate::version::VersionView;
use crate::wal::VersionKind;

/// One version's worth of diff against the previous version, for a single
/// table or index.
#[derive(Debug, Clone)]
pub struct Commit {
    pub name: String,
    pub kind: ObjectKind,
    pub version_no: u32,
    pub text_encoding: u32,
    pub page_kind: Option<PageKindByte>,
    pub root_page: Option<PageNo>,
    pub b_tree_pages: HashSet<PageNo>,
    pub updated_b_tree_pages: HashSet<PageNo>,
    pub added: HashMap<String, Cell>,
    /// Keyed by row_id; only populated for table leaves.
    pub updated: HashMap<i64, (Cell, Cell)>,
    pub deleted: HashMap<String, Cell>,
    pub carved: HashMap<String, CarvedCell>,
}

impl Commit {
    pub fn is_updated(&self) -> bool {
        !self.added.is_empty() || !self.updated.is_empty() || !self.deleted.is_empty() || !self.carved.is_empty()
    }
}

/// An explicit iterator over `Commit`s for one schema entry across a
/// `[start, end]` version range.
pub struct VersionHistoryParser<'a> {
    versions: &'a [VersionKind],
    object_name: String,
    kind: ObjectKind,
    signature: Option<&'a Signature>,
    carve_freelists: bool,
    strict: bool,
    sink: &'a dyn DiagnosticSink,
    next_index: usize,
    end_index: usize,
    current_cells: HashMap<String, (PageNo, Cell)>,
    current_b_tree_pages: HashSet<PageNo>,
    current_root_page: Option<PageNo>,
    started: bool,
    dedup: HashSet<String>,
}

impl<'a> VersionHistoryParser<'a> {
    /// `start`/`end` are inclusive version numbers into `history.versions`
    /// (which is itself already in version order starting at 0).
    pub fn new(
        versions: &'a [VersionKind],
        object_name: impl Into<String>,
        kind: ObjectKind,
        start: u32,
        end: u32,
        signature: Option<&'a Signature>,
        carve_freelists: bool,
        strict: bool,
        sink: &'a dyn DiagnosticSink,
    ) -> Self {
        let end_index = (end as usize).min(versions.len().saturating_sub(1));
        VersionHistoryParser {
            versions,
            object_name: object_name.into(),
            kind,
            signature,
            carve_freelists,
            strict,
            sink,
            next_index: start as usize,
            end_index,
            current_cells: HashMap::new(),
            current_b_tree_pages: HashSet::new(),
            current_root_page: None,
            started: false,
            dedup: HashSet::new(),
        }
    }

    fn resolve_root(&self, version: &VersionKind) -> Result<Option<PageNo>> {
        let entries = version.master_schema_entries(self.strict, self.sink)?;
        Ok(entries
            .into_iter()
            .find(|e| e.kind == self.kind && e.name == self.object_name)
            .and_then(|e| e.root_page))
    }

    fn step(&mut self, index: usize) -> Result<Commit> {
        let version = &self.versions[index];
        let is_starting = !self.started;
        let root_page = self.resolve_root(version)?;

        let updated_b_tree_page_numbers = version.updated_b_tree_page_numbers(self.strict, self.sink)?;

        let root_changed = root_page != self.current_root_page;
        let overlaps_updated = self
            .current_b_tree_pages
            .iter()
            .any(|p| updated_b_tree_page_numbers.contains(p));
        let needs_rewalk = is_starting || root_changed || overlaps_updated;

        let new_cells = if needs_rewalk {
            match root_page {
                Some(root) => {
                    let leaf_cells = version.collect_leaf_cells(root, self.strict, self.sink)?;
                    let mut map = HashMap::new();
                    for (page_no, cell) in leaf_cells {
                        let digest = cell_md5(cell.row_id(), cell.payload().unwrap_or(&crate::record::Record::default()));
                        map.insert(digest, (page_no, cell));
                    }
                    map
                }
                None => HashMap::new(),
            }
        } else {
            self.current_cells.clone()
        };

        let is_table = self.kind == ObjectKind::Table;
        let (added, updated, deleted) = diff_cells(&self.current_cells, &new_cells, is_table);

        for digest in new_cells.keys() {
            self.dedup.insert(digest.clone());
        }

        let new_b_tree_pages = if needs_rewalk {
            match root_page {
                Some(root) => version.collect_btree_pages(root, self.strict, self.sink)?.into_iter().collect(),
                None => HashSet::new(),
            }
        } else {
            self.current_b_tree_pages.clone()
        };
        let updated_b_tree_pages: HashSet<PageNo> =
            new_b_tree_pages.iter().filter(|p| updated_b_tree_page_numbers.contains(*p)).copied().collect();

        let mut carved: HashMap<String, CarvedCell> = HashMap::new();
        if let Some(signature) = self.signature {
            for &page_no in &updated_b_tree_pages {
                let raw = version.read_page(page_no)?;
                let decoded = page::decode_btree_page(page_no, &raw, version, self.strict, self.sink)?;
                for fb in &decoded.freeblocks {
                    let body = &raw[fb.offset + 4..fb.offset + fb.size];
                    for cell in carve_region(body, page_no, Source::BTree, Location::Freeblock, signature, &mut self.dedup) {
                        carved.insert(cell_md5(Some(cell.row_id), &cell.record), cell);
                    }
                }
                let gap = &raw[decoded.unallocated.clone()];
                for cell in carve_region(gap, page_no, Source::BTree, Location::Unallocated, signature, &mut self.dedup) {
                    carved.insert(cell_md5(Some(cell.row_id), &cell.record), cell);
                }
            }

            if self.carve_freelists {
                let leaves = freelist_leaf_pages(version)?;
                for &page_no in &leaves {
                    if version.raw_updated_pages().contains(&page_no) {
                        let raw = version.read_page(page_no)?;
                        for cell in carve_region(&raw, page_no, Source::Freelist, Location::Unallocated, signature, &mut self.dedup) {
                            carved.insert(cell_md5(Some(cell.row_id), &cell.record), cell);
                        }
                    }
                }
            }
        }

        let page_kind = match root_page {
            Some(root) => Some(version.b_tree_root(root, self.strict, self.sink)?.kind),
            None => None,
        };

        let commit = Commit {
            name: self.object_name.clone(),
            kind: self.kind,
            version_no: version.version_no(),
            text_encoding: version.header().text_encoding,
            page_kind,
            root_page,
            b_tree_pages: new_b_tree_pages.clone(),
            updated_b_tree_pages,
            added,
            updated,
            deleted,
            carved,
        };

        self.current_cells = new_cells;
        self.current_b_tree_pages = new_b_tree_pages;
        self.current_root_page = root_page;
        self.started = true;

        Ok(commit)
    }
}

impl<'a> Iterator for VersionHistoryParser<'a> {
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index > self.end_index || self.next_index >= self.versions.len() {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(self.step(index))
    }
}

/// Diffs two cell-MD5-keyed maps. For table leaves,
/// entries with matching `row_id` present on both sides of the diff are
/// pulled out of added/deleted and reported as updated instead.
fn diff_cells(
    old: &HashMap<String, (PageNo, Cell)>,
    new: &HashMap<String, (PageNo, Cell)>,
    is_table: bool,
) -> (HashMap<String, Cell>, HashMap<i64, (Cell, Cell)>, HashMap<String, Cell>) {
    let mut added: HashMap<String, Cell> =
        new.iter().filter(|(k, _)| !old.contains_key(*k)).map(|(k, (_, c))| (k.clone(), c.clone())).collect();
    let mut deleted: HashMap<String, Cell> =
        old.iter().filter(|(k, _)| !new.contains_key(*k)).map(|(k, (_, c))| (k.clone(), c.clone())).collect();

    let mut updated = HashMap::new();
    if is_table {
        let mut added_by_row: HashMap<i64, String> = HashMap::new();
        for (digest, cell) in &added {
            if let Some(row_id) = cell.row_id() {
                added_by_row.insert(row_id, digest.clone());
            }
        }
        let mut deleted_by_row: HashMap<i64, String> = HashMap::new();
        for (digest, cell) in &deleted {
            if let Some(row_id) = cell.row_id() {
                deleted_by_row.insert(row_id, digest.clone());
            }
        }
        let common_rows: Vec<i64> =
            added_by_row.keys().filter(|row_id| deleted_by_row.contains_key(*row_id)).copied().collect();
        for row_id in common_rows {
            let add_digest = added_by_row.remove(&row_id).expect("row_id came from added_by_row");
            let del_digest = deleted_by_row.remove(&row_id).expect("row_id filtered against deleted_by_row");
            let new_cell = added.remove(&add_digest).expect("digest came from added map");
            let old_cell = deleted.remove(&del_digest).expect("digest came from deleted map");
            updated.insert(row_id, (old_cell, new_cell));
        }
    }
    (added, updated, deleted)
}

/// The freelist's leaf page numbers only, separate from trunk pages — only
/// leaves hold freed cell bytes, so only they're carving candidates.
fn freelist_leaf_pages(version: &VersionKind) -> Result<HashSet<PageNo>> {
    let header = version.header();
    let mut leaves = HashSet::new();
    let mut next_trunk = header.first_freelist_trunk_page;
    let mut accounted = 0u32;
    while next_trunk != 0 && accounted < header.freelist_pages {
        let raw = version.read_page(next_trunk)?;
        let trunk = page::decode_freelist_trunk(&raw)?;
        accounted += 1;
        for &leaf in &trunk.leaf_numbers {
            leaves.insert(leaf);
            accounted += 1;
        }
        next_trunk = trunk.next_trunk;
    }
    Ok(leaves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use crate::file_handle::{DatabaseFileHandle, WalFileHandle};
    use crate::wal::VersionHistory;
    use std::rc::Rc;

    fn minimal_db_bytes(page_size: u16, pages: u32) -> Vec<u8> {
        let mut buf = vec![0u8; page_size as usize * pages as usize];
        buf[0..16].copy_from_slice(b"SQLite format 3\0");
        buf[16..18].copy_from_slice(&page_size.to_be_bytes());
        buf[18] = 2;
        buf[19] = 2;
        buf[21] = 64;
        buf[22] = 32;
        buf[23] = 32;
        buf[28..32].copy_from_slice(&pages.to_be_bytes());
        buf[44..48].copy_from_slice(&4u32.to_be_bytes());
        buf[56..60].copy_from_slice(&1u32.to_be_bytes());
        buf[92..96].copy_from_slice(&1u32.to_be_bytes());
        buf[100] = 0x0d;
        buf[105..107].copy_from_slice(&(page_size as u16).to_be_bytes());
        buf
    }

    fn empty_wal_bytes(page_size: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 32];
        buf[0..4].copy_from_slice(&crate::header::WalHeader::MAGIC_BIG_ENDIAN.to_be_bytes());
        buf[4..8].copy_from_slice(&3_007_000u32.to_be_bytes());
        buf[8..12].copy_from_slice(&page_size.to_be_bytes());
        buf
    }

    #[test]
    fn empty_schema_yields_one_commit_with_no_changes() {
        let database = Rc::new(DatabaseFileHandle::from_bytes(minimal_db_bytes(512, 1), true, &CollectingSink::default()).unwrap());
        let wal = Rc::new(WalFileHandle::from_bytes(empty_wal_bytes(512), &CollectingSink::default()).unwrap());
        let sink = CollectingSink::default();
        let history = VersionHistory::build(database, wal, true, &sink).unwrap();

        let mut parser = VersionHistoryParser::new(
            &history.versions,
            "t",
            ObjectKind::Table,
            0,
            0,
            None,
            false,
            true,
            &sink,
        );
        let commit = parser.next().unwrap().unwrap();
        assert_eq!(commit.version_no, 0);
        assert!(!commit.is_updated());
        assert!(commit.root_page.is_none());
        assert!(parser.next().is_none());
    }
}
