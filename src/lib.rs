//! Forensic reconstruction of SQLite database history from a database file
//! and its write-ahead log.
//!
//! The engine is layered bottom-up, each module owning one piece of the
//! on-disk format:
//!
//! - [`bytes`] / [`varint`] - big-endian primitives and SQLite's variable
//!   length integer encoding.
//! - [`error`] / [`diagnostics`] / [`config`] - the ambient error taxonomy,
//!   out-of-band warnings, and parse options shared by every layer above.
//! - [`file_handle`] - random-access readers over the database/WAL/WAL-index/
//!   rollback-journal files.
//! - [`header`] - the fixed-layout headers (database, B-tree page, WAL,
//!   WAL frame, WAL-index, rollback journal).
//! - [`page`] - B-tree page and cell decoding, overflow chains, freelist
//!   trunk pages, pointer-map pages.
//! - [`record`] - the serial-type record format every cell payload carries.
//! - [`schema`] - `sqlite_schema` rows and a `CREATE TABLE` mini-parser.
//! - [`version`] / [`wal`] - the base database image and every WAL commit
//!   layered on top of it.
//! - [`version_history`] - per-table/index version-over-version diffing.
//! - [`signature`] / [`carver`] - probabilistic row signatures and the
//!   signature-driven carver that uses them.
//!
//! This module is the crate's façade: it wires the layers together and
//! re-exports the handful of entry points and types a caller needs without
//! reaching into the submodules directly.

pub mod bytes;
pub mod carver;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod file_handle;
pub mod header;
pub mod page;
pub mod pretty;
pub mod record;
pub mod schema;
pub mod signature;
pub mod varint;
pub mod version;
pub mod version_history;
pub mod wal;

use std::path::Path;
use std::rc::Rc;

pub use carver::CarvedCell;
pub use config::DissectOptions;
pub use diagnostics::{DiagnosticSink, LogSink};
pub use error::{DissectError, Result};
pub use file_handle::{DatabaseFileHandle, WalFileHandle};
pub use page::Cell;
pub use schema::ObjectKind;
pub use signature::{build_signature, Signature};
pub use version::VersionView;
pub use version_history::{Commit, VersionHistoryParser};
pub use wal::{VersionHistory, VersionKind};

use carver::{carve_region, Location, Source};
use page::PageSource;
use record::{cell_md5, Record};
use schema::parse_create_table;
use std::collections::HashSet;

/// Opens and validates a database file.
pub fn open_database(
    path: impl AsRef<Path>,
    options: &DissectOptions,
    sink: &dyn DiagnosticSink,
) -> Result<Rc<DatabaseFileHandle>> {
    Ok(Rc::new(DatabaseFileHandle::open(
        path,
        options.store_in_memory,
        options.strict_format_checking,
        sink,
    )?))
}

/// Opens and validates a WAL file.
pub fn open_wal(path: impl AsRef<Path>, options: &DissectOptions, sink: &dyn DiagnosticSink) -> Result<Rc<WalFileHandle>> {
    Ok(Rc::new(WalFileHandle::open(path, options.store_in_memory, sink)?))
}

/// Reconstructs the full version history of a database: the base version,
/// plus every commit found in `wal` when one is supplied.
pub fn build_history(
    database: Rc<DatabaseFileHandle>,
    wal: Option<Rc<WalFileHandle>>,
    options: &DissectOptions,
    sink: &dyn DiagnosticSink,
) -> Result<VersionHistory> {
    match wal {
        Some(wal) => VersionHistory::build(database, wal, options.strict_format_checking, sink),
        None => {
            let base = version::Version::base(database, options.strict_format_checking, sink)?;
            Ok(VersionHistory { versions: vec![VersionKind::Base(Rc::new(base))], invalid_frame_count: 0 })
        }
    }
}

/// Lists every non-internal table name visible in `version`'s master schema.
pub fn list_tables(version: &VersionKind, options: &DissectOptions, sink: &dyn DiagnosticSink) -> Result<Vec<String>> {
    let entries = version.master_schema_entries(options.strict_format_checking, sink)?;
    Ok(entries
        .into_iter()
        .filter(|e| e.kind == ObjectKind::Table && !e.is_internal())
        .map(|e| e.name)
        .collect())
}

/// Lists every index name visible in `version`'s master schema.
pub fn list_indexes(version: &VersionKind, options: &DissectOptions, sink: &dyn DiagnosticSink) -> Result<Vec<String>> {
    let entries = version.master_schema_entries(options.strict_format_checking, sink)?;
    Ok(entries.into_iter().filter(|e| e.kind == ObjectKind::Index).map(|e| e.name).collect())
}

/// Reads every live cell out of the named table or index's b-tree under one
/// version, sorted by row_id for rowid tables.
pub fn snapshot_table(
    version: &VersionKind,
    name: &str,
    options: &DissectOptions,
    sink: &dyn DiagnosticSink,
) -> Result<Vec<Cell>> {
    let entries = version.master_schema_entries(options.strict_format_checking, sink)?;
    let Some(entry) = entries.into_iter().find(|e| e.name == name) else {
        return Err(DissectError::schema_parse(format!("no schema entry named {name}")));
    };
    let Some(root) = entry.root_page else {
        return Ok(Vec::new());
    };

    let mut cells: Vec<Cell> = version
        .collect_leaf_cells(root, options.strict_format_checking, sink)?
        .into_iter()
        .map(|(_, cell)| cell)
        .collect();

    if entry.kind == ObjectKind::Table {
        let without_rowid = entry
            .sql
            .as_deref()
            .and_then(|sql| parse_create_table(sql).ok())
            .map(|def| def.without_rowid)
            .unwrap_or(false);
        if !without_rowid {
            cells.sort_by_key(|c| c.row_id().unwrap_or(i64::MIN));
        }
    }

    Ok(cells)
}

/// Builds a table's probabilistic row signature from every row observed
/// across `history`. Returns `None` for
/// views, virtual tables, `WITHOUT ROWID` tables, and tables with no parsable
/// `CREATE TABLE` statement, none of which the carver's table-leaf model
/// covers.
pub fn build_table_signature(
    history: &VersionHistory,
    name: &str,
    options: &DissectOptions,
    sink: &dyn DiagnosticSink,
) -> Result<Option<Signature>> {
    let last = history.versions.last().expect("a version history always has at least the base version");
    let entries = last.master_schema_entries(options.strict_format_checking, sink)?;
    let Some(entry) = entries.into_iter().find(|e| e.name == name && e.kind == ObjectKind::Table) else {
        return Ok(None);
    };
    let Some(sql) = entry.sql.as_deref() else {
        return Ok(None);
    };
    if sql.to_ascii_uppercase().contains("VIRTUAL TABLE") {
        return Ok(None);
    }
    let Ok(table_def) = parse_create_table(sql) else {
        return Ok(None);
    };
    if table_def.without_rowid {
        return Ok(None);
    }

    let mut rows: Vec<Record> = Vec::new();
    for version in &history.versions {
        for cell in snapshot_table(version, name, options, sink)? {
            if let Cell::TableLeaf { payload, .. } = cell {
                rows.push(payload);
            }
        }
    }
    let row_refs: Vec<&Record> = rows.iter().collect();
    Ok(Some(build_signature(&table_def, &row_refs)))
}

/// Carves deleted/partial rows out of a table's current freeblocks and
/// unallocated space, validating each candidate against `signature`.
/// Already-live cells are seeded into the dedup set first so a carved
/// result never duplicates a row `snapshot_table` already reported.
pub fn carve_table(
    version: &VersionKind,
    signature: &Signature,
    name: &str,
    options: &DissectOptions,
    sink: &dyn DiagnosticSink,
) -> Result<Vec<CarvedCell>> {
    let entries = version.master_schema_entries(options.strict_format_checking, sink)?;
    let Some(entry) = entries.into_iter().find(|e| e.name == name && e.kind == ObjectKind::Table) else {
        return Ok(Vec::new());
    };
    let Some(root) = entry.root_page else {
        return Ok(Vec::new());
    };

    let strict = options.strict_format_checking;
    let mut seen: HashSet<String> = HashSet::new();
    for (_, cell) in version.collect_leaf_cells(root, strict, sink)? {
        if let Cell::TableLeaf { row_id, payload, .. } = &cell {
            seen.insert(cell_md5(Some(*row_id), payload));
        }
    }

    let mut carved = Vec::new();
    for page_no in version.collect_btree_pages(root, strict, sink)? {
        let raw = version.read_page(page_no)?;
        let decoded = page::decode_btree_page(page_no, &raw, version, strict, sink)?;
        for fb in &decoded.freeblocks {
            let body = &raw[fb.offset + 4..fb.offset + fb.size];
            carved.extend(carve_region(body, page_no, Source::BTree, Location::Freeblock, signature, &mut seen));
        }
        let gap = &raw[decoded.unallocated.clone()];
        carved.extend(carve_region(gap, page_no, Source::BTree, Location::Unallocated, signature, &mut seen));
    }
    Ok(carved)
}

/// Iterates every version of `history` for the named table or index,
/// yielding one [`Commit`] per version. The
/// object's kind is resolved once from the history's final master schema;
/// callers don't need to already know whether `name` is a table or index.
pub fn iter_history<'a>(
    history: &'a VersionHistory,
    name: &str,
    signature: Option<&'a Signature>,
    options: &DissectOptions,
    sink: &'a dyn DiagnosticSink,
) -> Result<VersionHistoryParser<'a>> {
    let last = history.versions.last().expect("a version history always has at least the base version");
    let strict = options.strict_format_checking;
    let kind = last
        .master_schema_entries(strict, sink)?
        .into_iter()
        .find(|e| e.name == name)
        .map(|e| e.kind)
        .unwrap_or(ObjectKind::Table);
    let end = (history.versions.len() - 1) as u32;
    Ok(VersionHistoryParser::new(
        &history.versions,
        name,
        kind,
        0,
        end,
        signature,
        options.carve_freelist_pages,
        strict,
        sink,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;

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
        buf[100] = 0x0d;
        buf[105..107].copy_from_slice(&(page_size as u16).to_be_bytes());
        buf
    }

    #[test]
    fn facade_lists_no_tables_over_an_empty_schema() {
        let sink = CollectingSink::default();
        let options = DissectOptions::default();
        let database = Rc::new(DatabaseFileHandle::from_bytes(minimal_db_bytes(512, 1), options.strict_format_checking, &sink).unwrap());
        let history = build_history(database, None, &options, &sink).unwrap();
        let base = &history.versions[0];
        assert!(list_tables(base, &options, &sink).unwrap().is_empty());
        assert!(list_indexes(base, &options, &sink).unwrap().is_empty());
    }

    #[test]
    fn facade_reports_no_history_entry_for_an_unknown_table() {
        let sink = CollectingSink::default();
        let options = DissectOptions::default();
        let database = Rc::new(DatabaseFileHandle::from_bytes(minimal_db_bytes(512, 1), options.strict_format_checking, &sink).unwrap());
        let history = build_history(database, None, &options, &sink).unwrap();
        let mut parser = iter_history(&history, "missing", None, &options, &sink).unwrap();
        let commit = parser.next().unwrap().unwrap();
        assert!(commit.root_page.is_none());
        assert!(!commit.is_updated());
    }
}
