//! Human-readable summaries for the CLI: `Display` impls over
//! the decoded types, laid out the way `sqlite3`'s `.dbinfo` command does.

use std::fmt;

use crate::header::DatabaseHeader;
use crate::page::BTreePage;
use crate::version_history::Commit;

impl fmt::Display for DatabaseHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "database page size:  {}", self.page_size())?;
        writeln!(f, "write format:        {}", self.write_format)?;
        writeln!(f, "read format:         {}", self.read_format)?;
        writeln!(f, "reserved bytes:      {}", self.reserved_bytes_per_page)?;
        writeln!(f, "file change counter: {}", self.file_change_counter)?;
        writeln!(f, "database page count: {}", self.database_size_pages)?;
        writeln!(f, "freelist trunk page: {}", self.first_freelist_trunk_page)?;
        writeln!(f, "freelist page count: {}", self.freelist_pages)?;
        writeln!(f, "schema cookie:       {}", self.schema_cookie)?;
        writeln!(f, "schema format:       {}", self.schema_format)?;
        writeln!(f, "default cache size:  {}", self.default_page_cache_size)?;
        writeln!(f, "autovacuum top root: {}", self.largest_root_btree_page)?;
        writeln!(f, "incremental vacuum:  {}", self.incremental_vacuum)?;
        writeln!(
            f,
            "text encoding:       {} ({})",
            self.text_encoding,
            match self.text_encoding {
                1 => "utf8",
                2 => "utf16le",
                3 => "utf16be",
                _ => "unknown",
            }
        )?;
        writeln!(f, "user version:        {}", self.user_version)?;
        writeln!(f, "application id:      {}", self.application_id)?;
        writeln!(f, "software version:    {}", self.sqlite_version_number)?;
        writeln!(f, "version-valid-for:   {}", self.version_valid_for)?;
        Ok(())
    }
}

impl fmt::Display for BTreePage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "page number:             {}", self.page_no)?;
        writeln!(f, "page kind:               {:?}", self.kind)?;
        writeln!(f, "first freeblock:         {}", self.header.first_freeblock_offset)?;
        writeln!(f, "number of cells:         {}", self.header.cell_count)?;
        writeln!(f, "cell content start:      {}", self.header.cell_content_offset())?;
        writeln!(f, "fragmented free bytes:   {}", self.header.fragment_total)?;
        if let Some(pointer) = self.header.right_most_pointer {
            writeln!(f, "right-most pointer:      {pointer}")?;
        }
        writeln!(f, "cell pointers:           {:?}", self.cell_pointers)?;
        Ok(())
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version {} ({:?} {:?})", self.version_no, self.kind, self.name)?;
        writeln!(f, "  root page:    {:?}", self.root_page)?;
        writeln!(f, "  b-tree pages: {}", self.b_tree_pages.len())?;
        writeln!(f, "  added:        {}", self.added.len())?;
        writeln!(f, "  updated:      {}", self.updated.len())?;
        writeln!(f, "  deleted:      {}", self.deleted.len())?;
        writeln!(f, "  carved:       {}", self.carved.len())?;
        Ok(())
    }
}
