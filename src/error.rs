//! Typed error taxonomy.
//!
//! Low-level decoders (header/page/record) surface these directly; the
//! version and history layers translate their own failures into the same
//! enum, preserving the source via `#[source]`/`#[from]`.

use std::fmt;
use thiserror::Error;

/// One rule violated during decoding, with enough context to locate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub offset: Option<u64>,
    pub page_no: Option<u32>,
    pub rule: String,
}

impl Violation {
    pub fn new(rule: impl Into<String>) -> Self {
        Violation { offset: None, page_no: None, rule: rule.into() }
    }

    pub fn at_page(mut self, page_no: u32) -> Self {
        self.page_no = Some(page_no);
        self
    }

    pub fn at_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rule)?;
        if let Some(p) = self.page_no {
            write!(f, " (page {p})")?;
        }
        if let Some(o) = self.offset {
            write!(f, " (offset {o})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DissectError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed header: {0}")]
    MalformedHeader(Violation),

    #[error("malformed page: {0}")]
    MalformedPage(Violation),

    #[error("malformed record: {0}")]
    MalformedRecord(Violation),

    #[error("wal inconsistent: {0}")]
    WalInconsistent(Violation),

    #[error("schema parse error: {0}")]
    SchemaParse(Violation),

    #[error("unsupported: {0}")]
    Unsupported(Violation),

    #[error("binary layout error: {0}")]
    Binrw(#[from] binrw::Error),
}

impl DissectError {
    pub fn malformed_header(rule: impl Into<String>) -> Self {
        DissectError::MalformedHeader(Violation::new(rule))
    }

    pub fn malformed_page(rule: impl Into<String>, page_no: u32) -> Self {
        DissectError::MalformedPage(Violation::new(rule).at_page(page_no))
    }

    pub fn malformed_record(rule: impl Into<String>) -> Self {
        DissectError::MalformedRecord(Violation::new(rule))
    }

    pub fn wal_inconsistent(rule: impl Into<String>) -> Self {
        DissectError::WalInconsistent(Violation::new(rule))
    }

    pub fn schema_parse(rule: impl Into<String>) -> Self {
        DissectError::SchemaParse(Violation::new(rule))
    }

    pub fn unsupported(rule: impl Into<String>) -> Self {
        DissectError::Unsupported(Violation::new(rule))
    }

    pub fn end_of_file(offset: u64, len: u64) -> Self {
        DissectError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("read past end of file at offset {offset} (len {len})"),
        ))
    }
}

pub type Result<T> = std::result::Result<T, DissectError>;
