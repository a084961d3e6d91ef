//! File handles: open-only random-access readers over the
//! database, WAL, WAL-index, and rollback-journal files.

use std::cell::RefCell;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use binrw::BinRead;

use crate::diagnostics::DiagnosticSink;
use crate::error::{DissectError, Result};
use crate::header::{DatabaseHeader, RollbackJournalHeader, WalHeader, WalIndexHeader};

/// The lock-byte page (file offset 2^30) is not supported.
const LOCK_BYTE_PAGE_LIMIT: u64 = 1 << 30;

/// Backing storage for a file handle: either the whole file read up front
/// (`store_in_memory`), or an open file descriptor read from lazily, one
/// request at a time. Values read through the in-memory variant stay valid
/// after the originating file is closed or removed; values read through the
/// on-disk variant require the file to still be there for every `read`.
enum Storage {
    InMemory(Vec<u8>),
    OnDisk { file: RefCell<fs::File>, len: u64 },
}

impl Storage {
    fn open(path: impl AsRef<Path>, store_in_memory: bool) -> Result<Self> {
        if store_in_memory {
            Ok(Storage::InMemory(fs::read(path)?))
        } else {
            let file = fs::File::open(path)?;
            let len = file.metadata()?.len();
            Ok(Storage::OnDisk { file: RefCell::new(file), len })
        }
    }

    fn len(&self) -> u64 {
        match self {
            Storage::InMemory(bytes) => bytes.len() as u64,
            Storage::OnDisk { len, .. } => *len,
        }
    }

    fn read(&self, offset: u64, n: u64) -> Result<Vec<u8>> {
        match self {
            Storage::InMemory(bytes) => {
                let start = offset as usize;
                let end = start + n as usize;
                bytes
                    .get(start..end)
                    .map(|s| s.to_vec())
                    .ok_or_else(|| DissectError::end_of_file(offset, self.len()))
            }
            Storage::OnDisk { file, len } => {
                if offset + n > *len {
                    return Err(DissectError::end_of_file(offset, *len));
                }
                let mut file = file.borrow_mut();
                let mut buf = vec![0u8; n as usize];
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
        }
    }

    /// Builds an in-memory storage directly from bytes already in hand
    /// (tests, or bytes read by some other caller).
    fn from_bytes(bytes: Vec<u8>) -> Self {
        Storage::InMemory(bytes)
    }
}

/// Text encoding declared by the database header, or discovered later from
/// the first WAL commit that establishes a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(TextEncoding::Utf8),
            2 => Some(TextEncoding::Utf16Le),
            3 => Some(TextEncoding::Utf16Be),
            _ => None,
        }
    }
}

/// A random-access reader over the main database file.
pub struct DatabaseFileHandle {
    storage: Storage,
    pub header: DatabaseHeader,
    pub text_encoding: Option<TextEncoding>,
}

impl DatabaseFileHandle {
    /// `store_in_memory` selects eager vs. lazy reads (`DissectOptions`);
    /// eager reads the whole file up front so the resulting handle outlives
    /// the open file descriptor, lazy re-reads the file on every `read`.
    pub fn open(
        path: impl AsRef<Path>,
        store_in_memory: bool,
        strict: bool,
        sink: &dyn DiagnosticSink,
    ) -> Result<Self> {
        let storage = Storage::open(path, store_in_memory)?;
        Self::from_storage(storage, strict, sink)
    }

    pub fn from_bytes(bytes: Vec<u8>, strict: bool, sink: &dyn DiagnosticSink) -> Result<Self> {
        Self::from_storage(Storage::from_bytes(bytes), strict, sink)
    }

    fn from_storage(storage: Storage, strict: bool, sink: &dyn DiagnosticSink) -> Result<Self> {
        if storage.len() >= LOCK_BYTE_PAGE_LIMIT {
            return Err(DissectError::unsupported(
                "database file >= 2^30 bytes requires the lock-byte page, which is not supported",
            ));
        }
        let header_bytes = storage.read(0, storage.len().min(100))?;
        let mut cursor = std::io::Cursor::new(&header_bytes);
        let header = DatabaseHeader::read(&mut cursor)
            .map_err(|e| DissectError::malformed_header(format!("failed to parse database header: {e}")))?;
        header.validate(strict, sink)?;
        let text_encoding = TextEncoding::from_code(header.text_encoding);
        Ok(DatabaseFileHandle { storage, header, text_encoding })
    }

    pub fn len(&self) -> u64 {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.len() == 0
    }

    /// Reads `n` bytes starting at `offset`. Fails with `Io` (`EndOfFile`)
    /// on out-of-range reads.
    pub fn read(&self, offset: u64, n: u64) -> Result<Vec<u8>> {
        self.storage.read(offset, n)
    }

    pub fn page_size(&self) -> u32 {
        self.header.page_size()
    }
}

/// A random-access reader over the write-ahead log file.
pub struct WalFileHandle {
    storage: Storage,
    pub header: WalHeader,
}

impl WalFileHandle {
    pub fn open(path: impl AsRef<Path>, store_in_memory: bool, sink: &dyn DiagnosticSink) -> Result<Self> {
        let storage = Storage::open(path, store_in_memory)?;
        Self::from_storage(storage, sink)
    }

    pub fn from_bytes(bytes: Vec<u8>, sink: &dyn DiagnosticSink) -> Result<Self> {
        Self::from_storage(Storage::from_bytes(bytes), sink)
    }

    fn from_storage(storage: Storage, sink: &dyn DiagnosticSink) -> Result<Self> {
        let header_bytes = storage.read(0, storage.len().min(32))?;
        let mut cursor = std::io::Cursor::new(&header_bytes);
        let header = WalHeader::read(&mut cursor)
            .map_err(|e| DissectError::malformed_header(format!("failed to parse WAL header: {e}")))?;
        header.validate(sink)?;
        Ok(WalFileHandle { storage, header })
    }

    pub fn len(&self) -> u64 {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.len() == 0
    }

    pub fn read(&self, offset: u64, n: u64) -> Result<Vec<u8>> {
        self.storage.read(offset, n)
    }

    /// Number of complete (header + page) frames present in the file.
    pub fn frame_count(&self) -> u64 {
        let frame_size = 24 + self.header.page_size as u64;
        if frame_size == 0 {
            return 0;
        }
        (self.len().saturating_sub(32)) / frame_size
    }
}

/// A random-access reader over the WAL-index (`-shm`) file. Big-endian WAL-index detection is reserved but not implemented.
pub struct WalIndexFileHandle {
    pub header: WalIndexHeader,
}

impl WalIndexFileHandle {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = fs::File::open(path)?;
        let mut buf = vec![0u8; 136];
        file.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let header = WalIndexHeader::read(&mut cursor)
            .map_err(|e| DissectError::malformed_header(format!("failed to parse WAL-index header: {e}")))?;
        header.validate()?;
        Ok(WalIndexFileHandle { header })
    }
}

/// A random-access reader over the rollback-journal file. Only the 28-byte
/// header is decoded; page records are out of scope.
pub struct RollbackJournalFileHandle {
    pub header: RollbackJournalHeader,
}

impl RollbackJournalFileHandle {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = fs::File::open(path)?;
        let mut buf = vec![0u8; 28];
        file.read_exact(&mut buf)?;
        Self::from_bytes(&buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(bytes);
        let header = RollbackJournalHeader::read(&mut cursor)
            .map_err(|e| DissectError::malformed_header(format!("failed to parse journal header: {e}")))?;
        Ok(RollbackJournalFileHandle { header })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use pretty_assertions::assert_eq;

    fn minimal_db_header_bytes(page_size: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 100];
        buf[0..16].copy_from_slice(b"SQLite format 3\0");
        buf[16..18].copy_from_slice(&page_size.to_be_bytes());
        buf[21] = 64;
        buf[22] = 32;
        buf[23] = 32;
        buf[44..48].copy_from_slice(&4u32.to_be_bytes());
        buf[56..60].copy_from_slice(&1u32.to_be_bytes());
        buf
    }

    #[test]
    fn opens_well_formed_database_bytes() {
        let bytes = minimal_db_header_bytes(4096);
        let sink = CollectingSink::default();
        let handle = DatabaseFileHandle::from_bytes(bytes, true, &sink).unwrap();
        assert_eq!(handle.page_size(), 4096);
        assert_eq!(handle.text_encoding, Some(TextEncoding::Utf8));
    }

    #[test]
    fn out_of_range_read_is_end_of_file() {
        let bytes = minimal_db_header_bytes(4096);
        let sink = CollectingSink::default();
        let handle = DatabaseFileHandle::from_bytes(bytes, true, &sink).unwrap();
        assert!(handle.read(1000, 10).is_err());
    }

    #[test]
    fn rejects_files_at_lock_byte_page_limit() {
        let mut bytes = minimal_db_header_bytes(4096);
        bytes.resize(LOCK_BYTE_PAGE_LIMIT as usize, 0);
        let sink = CollectingSink::default();
        let err = DatabaseFileHandle::from_bytes(bytes, true, &sink).unwrap_err();
        assert!(matches!(err, DissectError::Unsupported(_)));
    }

    fn minimal_wal_header_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; 32];
        buf[0..4].copy_from_slice(&WalHeader::MAGIC_BIG_ENDIAN.to_be_bytes());
        buf[4..8].copy_from_slice(&3_007_000u32.to_be_bytes());
        buf[8..12].copy_from_slice(&4096u32.to_be_bytes());
        buf
    }

    #[test]
    fn opens_well_formed_wal_bytes() {
        let bytes = minimal_wal_header_bytes();
        let sink = CollectingSink::default();
        let handle = WalFileHandle::from_bytes(bytes, &sink).unwrap();
        assert_eq!(handle.header.page_size, 4096);
        assert_eq!(handle.frame_count(), 0);
    }

    #[test]
    fn lazy_storage_reads_straight_from_disk() {
        let path = std::env::temp_dir().join(format!("rsqlite_dissect_lazy_{}.db", std::process::id()));
        fs::write(&path, minimal_db_header_bytes(4096)).unwrap();
        let sink = CollectingSink::default();
        let handle = DatabaseFileHandle::open(&path, false, true, &sink).unwrap();
        assert_eq!(handle.page_size(), 4096);
        assert_eq!(handle.read(0, 16).unwrap(), b"SQLite format 3\0");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn eager_storage_outlives_file_removal() {
        let path = std::env::temp_dir().join(format!("rsqlite_dissect_eager_{}.db", std::process::id()));
        fs::write(&path, minimal_db_header_bytes(4096)).unwrap();
        let sink = CollectingSink::default();
        let handle = DatabaseFileHandle::open(&path, true, true, &sink).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(handle.read(0, 100).is_ok());
    }
}
