//! Logical schema decoder: the `sqlite_schema` (a.k.a.
//! `sqlite_master`) table rows, plus a small DDL mini-parser that extracts
//! column names and SQLite's column-affinity rule from the stored `CREATE
//! TABLE` text.
//!
//! `sqlite_schema` is an ordinary table b-tree rooted at page 1, so a
//! [`MasterSchemaEntry`] is just a typed view over the five columns
//! `page::decode_btree_page` already produced.

use crate::error::{DissectError, Result};
use crate::page::{BTreePage, Cell, PageNo};
use crate::record::Value;

/// One row of `sqlite_schema`.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterSchemaEntry {
    pub row_id: i64,
    pub kind: ObjectKind,
    pub name: String,
    pub table_name: String,
    pub root_page: Option<PageNo>,
    pub sql: Option<String>,
}

impl MasterSchemaEntry {
    /// True for the bookkeeping tables SQLite itself owns (`sqlite_` prefix).
    pub fn is_internal(&self) -> bool {
        self.name.starts_with("sqlite_")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    Index,
    View,
    Trigger,
}

impl ObjectKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "table" => Some(ObjectKind::Table),
            "index" => Some(ObjectKind::Index),
            "view" => Some(ObjectKind::View),
            "trigger" => Some(ObjectKind::Trigger),
            _ => None,
        }
    }
}

/// Reads every row out of a decoded `sqlite_schema` b-tree page.
/// Only leaf cells carry data; this only sees a single page's cells, so it
/// only covers the common single-page schema table directly — multi-page
/// schemas go through [`read_master_schema_from_cells`] after the caller
/// (`version.rs`) has walked the whole tree.
pub fn read_master_schema(page: &BTreePage) -> Result<Vec<MasterSchemaEntry>> {
    read_master_schema_from_cells(page.cells.iter())
}

/// Same as [`read_master_schema`] but over leaf cells gathered from every
/// page of the `sqlite_schema` b-tree, not just one page.
pub fn read_master_schema_from_cells<'a>(cells: impl Iterator<Item = &'a Cell>) -> Result<Vec<MasterSchemaEntry>> {
    let mut entries = Vec::new();
    for cell in cells {
        if let Cell::TableLeaf { row_id, payload, .. } = cell {
            entries.push(decode_entry(*row_id, payload)?);
        }
    }
    Ok(entries)
}

fn decode_entry(row_id: i64, payload: &crate::record::Record) -> Result<MasterSchemaEntry> {
    let columns = &payload.columns;
    if columns.len() < 5 {
        return Err(DissectError::schema_parse(format!(
            "sqlite_schema row has {} columns, expected 5",
            columns.len()
        )));
    }

    let kind_text = text_column(columns, 0, "type")?;
    let kind = ObjectKind::parse(&kind_text)
        .ok_or_else(|| DissectError::schema_parse(format!("unknown schema object kind {kind_text:?}")))?;
    let name = text_column(columns, 1, "name")?;
    let table_name = text_column(columns, 2, "tbl_name")?;

    let root_page = match &columns[3].value {
        Value::Integer(0) => None,
        Value::Integer(n) if *n > 0 => Some(*n as PageNo),
        Value::Null => None,
        other => {
            return Err(DissectError::schema_parse(format!(
                "sqlite_schema rootpage column has unexpected value {other:?}"
            )))
        }
    };

    let sql = match &columns[4].value {
        Value::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Null => None,
        other => {
            return Err(DissectError::schema_parse(format!(
                "sqlite_schema sql column has unexpected value {other:?}"
            )))
        }
    };

    Ok(MasterSchemaEntry { row_id, kind, name, table_name, root_page, sql })
}

fn text_column(columns: &[crate::record::Column], index: usize, name: &str) -> Result<String> {
    match &columns[index].value {
        Value::Text(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(DissectError::schema_parse(format!(
            "sqlite_schema {name} column has unexpected value {other:?}"
        ))),
    }
}

/// A column declared in a `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub declared_type: Option<String>,
    pub affinity: Affinity,
}

/// SQLite's five type affinities, derived from the declared type name by
/// the rules in the file format documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

/// Determines a column's affinity from its declared type name.
/// Rules are applied in order and the first match wins, exactly as SQLite's
/// own `sqlite3AffinityType` does:
/// 1. Contains "INT" -> INTEGER
/// 2. Contains "CHAR", "CLOB", or "TEXT" -> TEXT
/// 3. Contains "BLOB", or no type at all -> BLOB
/// 4. Contains "REAL", "FLOA", or "DOUB" -> REAL
/// 5. Otherwise -> NUMERIC
pub fn affinity_of(declared_type: Option<&str>) -> Affinity {
    let Some(raw) = declared_type else { return Affinity::Blob };
    let upper = raw.to_ascii_uppercase();
    if upper.contains("INT") {
        Affinity::Integer
    } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        Affinity::Text
    } else if upper.contains("BLOB") || upper.is_empty() {
        Affinity::Blob
    } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
        Affinity::Real
    } else {
        Affinity::Numeric
    }
}

/// A parsed `CREATE TABLE` statement: the column list plus the
/// `WITHOUT ROWID` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
    pub without_rowid: bool,
}

/// A best-effort DDL parser covering exactly the shape `sqlite_schema` SQL
/// text takes: `CREATE [TEMP] TABLE [IF NOT EXISTS] name (col defs...)
/// [WITHOUT ROWID]`. Table constraints (`PRIMARY KEY(...)`, `FOREIGN KEY`,
/// `CHECK`, `UNIQUE`) are recognized and skipped rather than parsed as
/// columns.
pub fn parse_create_table(sql: &str) -> Result<TableDefinition> {
    let without_rowid = sql.to_ascii_uppercase().trim_end().ends_with("WITHOUT ROWID");
    let body_sql = if without_rowid {
        let cut = find_case_insensitive(sql, "WITHOUT").unwrap_or(sql.len());
        sql[..cut].to_string()
    } else {
        sql.to_string()
    };

    let open = body_sql
        .find('(')
        .ok_or_else(|| DissectError::schema_parse("CREATE TABLE statement missing column list"))?;
    let close = find_matching_paren(&body_sql, open)
        .ok_or_else(|| DissectError::schema_parse("CREATE TABLE statement has unbalanced parentheses"))?;

    let table_name = extract_table_name(&body_sql[..open])?;
    let column_list = &body_sql[open + 1..close];

    let mut columns = Vec::new();
    for part in split_top_level(column_list) {
        let trimmed = part.trim();
        if trimmed.is_empty() || is_table_constraint(trimmed) {
            continue;
        }
        columns.push(parse_column_definition(trimmed)?);
    }

    Ok(TableDefinition { table_name, columns, without_rowid })
}

fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let upper = haystack.to_ascii_uppercase();
    upper.find(needle)
}

/// Extracts the identifier right before the opening paren, unquoting
/// brackets, backticks, and double/single quotes.
fn extract_table_name(prefix: &str) -> Result<String> {
    let trimmed = prefix.trim();
    let upper = trimmed.to_ascii_uppercase();
    let keyword_end = ["CREATE TABLE", "CREATE TEMP TABLE", "CREATE TEMPORARY TABLE", "CREATE VIRTUAL TABLE"]
        .iter()
        .filter_map(|kw| upper.find(kw).map(|i| i + kw.len()))
        .max()
        .ok_or_else(|| DissectError::schema_parse("expected CREATE TABLE keyword"))?;

    let mut rest = trimmed[keyword_end..].trim();
    let if_not_exists_upper = rest.to_ascii_uppercase();
    if if_not_exists_upper.starts_with("IF NOT EXISTS") {
        rest = rest["IF NOT EXISTS".len()..].trim();
    }

    Ok(unquote_identifier(rest.trim()))
}

fn unquote_identifier(raw: &str) -> String {
    let raw = raw.trim();
    let pairs = [('"', '"'), ('`', '`'), ('[', ']'), ('\'', '\'')];
    for (open, close) in pairs {
        if raw.starts_with(open) && raw.ends_with(close) && raw.len() >= 2 {
            return raw[1..raw.len() - 1].to_string();
        }
    }
    raw.to_string()
}

fn find_matching_paren(s: &str, open_index: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut in_quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(open_index) {
        if let Some(q) = in_quote {
            if b == q {
                in_quote = None;
            }
            continue;
        }
        match b {
            b'\'' | b'"' | b'`' => in_quote = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits a comma-separated list respecting nested parentheses and quotes
/// — e.g. `a INTEGER, b TEXT CHECK(b <> ''), c BLOB` splits into
/// exactly three fields.
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote: Option<char> = None;
    let mut current = String::new();
    for c in s.chars() {
        if let Some(q) = in_quote {
            current.push(c);
            if c == q {
                in_quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                in_quote = Some(c);
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn is_table_constraint(field: &str) -> bool {
    let upper = field.trim_start().to_ascii_uppercase();
    ["PRIMARY KEY", "UNIQUE", "CHECK", "FOREIGN KEY", "CONSTRAINT"]
        .iter()
        .any(|kw| upper.starts_with(kw))
}

fn parse_column_definition(field: &str) -> Result<ColumnDefinition> {
    let tokens: Vec<&str> = field.split_whitespace().collect();
    let name_token = tokens
        .first()
        .ok_or_else(|| DissectError::schema_parse("empty column definition"))?;
    let name = unquote_identifier(name_token);

    // Everything between the column name and the first constraint keyword
    // (or end of field) is the declared type; SQLite allows multi-word
    // types like `VARYING CHARACTER(255)`.
    let constraint_keywords = [
        "PRIMARY", "NOT", "NULL", "UNIQUE", "CHECK", "DEFAULT", "COLLATE", "REFERENCES", "GENERATED", "AS",
    ];
    let mut type_tokens = Vec::new();
    for tok in &tokens[1..] {
        let upper = tok.to_ascii_uppercase();
        let bare = upper.trim_end_matches(|c: char| !c.is_ascii_alphabetic());
        if constraint_keywords.contains(&bare) {
            break;
        }
        type_tokens.push(*tok);
    }
    let declared_type = if type_tokens.is_empty() { None } else { Some(type_tokens.join(" ")) };
    let affinity = affinity_of(declared_type.as_deref());

    Ok(ColumnDefinition { name, declared_type, affinity })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn affinity_rules_match_spec_order() {
        assert_eq!(affinity_of(Some("INTEGER")), Affinity::Integer);
        assert_eq!(affinity_of(Some("VARCHAR(10)")), Affinity::Text);
        assert_eq!(affinity_of(Some("NCHAR(55)")), Affinity::Text);
        assert_eq!(affinity_of(Some("BLOB")), Affinity::Blob);
        assert_eq!(affinity_of(None), Affinity::Blob);
        assert_eq!(affinity_of(Some("DOUBLE PRECISION")), Affinity::Real);
        assert_eq!(affinity_of(Some("DECIMAL(10,5)")), Affinity::Numeric);
        // INT wins over CHAR when both appear, matching SQLite's ordered rules.
        assert_eq!(affinity_of(Some("INT CHAR")), Affinity::Integer);
    }

    #[test]
    fn parses_simple_create_table() {
        let sql = "CREATE TABLE planets (id INTEGER PRIMARY KEY, name TEXT NOT NULL, mass REAL)";
        let def = parse_create_table(sql).unwrap();
        assert_eq!(def.table_name, "planets");
        assert!(!def.without_rowid);
        assert_eq!(def.columns.len(), 3);
        assert_eq!(def.columns[0].name, "id");
        assert_eq!(def.columns[0].affinity, Affinity::Integer);
        assert_eq!(def.columns[1].affinity, Affinity::Text);
        assert_eq!(def.columns[2].affinity, Affinity::Real);
    }

    #[test]
    fn skips_table_level_constraints() {
        let sql = "CREATE TABLE t (a INTEGER, b INTEGER, PRIMARY KEY (a, b), CHECK (a > 0))";
        let def = parse_create_table(sql).unwrap();
        assert_eq!(def.columns.len(), 2);
    }

    #[test]
    fn detects_without_rowid() {
        let sql = "CREATE TABLE t (a INTEGER PRIMARY KEY) WITHOUT ROWID";
        let def = parse_create_table(sql).unwrap();
        assert!(def.without_rowid);
    }

    #[test]
    fn unquotes_bracketed_and_quoted_table_names() {
        assert_eq!(parse_create_table("CREATE TABLE [My Table] (a INT)").unwrap().table_name, "My Table");
        assert_eq!(parse_create_table("CREATE TABLE \"My Table\" (a INT)").unwrap().table_name, "My Table");
    }

    #[test]
    fn respects_nested_parens_when_splitting_columns() {
        let sql = "CREATE TABLE t (a INTEGER, b TEXT CHECK (b <> ''), c NUMERIC(10,2))";
        let def = parse_create_table(sql).unwrap();
        assert_eq!(def.columns.len(), 3);
        assert_eq!(def.columns[2].name, "c");
    }

    #[test]
    fn internal_object_detection_uses_sqlite_prefix() {
        let entry = MasterSchemaEntry {
            row_id: 1,
            kind: ObjectKind::Table,
            name: "sqlite_sequence".to_string(),
            table_name: "sqlite_sequence".to_string(),
            root_page: Some(3),
            sql: None,
        };
        assert!(entry.is_internal());
    }
}
