//! Recognized configuration options.

/// Options controlling how a parse session behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DissectOptions {
    /// Eagerly reads the whole database/WAL file into memory up front, so
    /// the resulting values stay valid after the file is closed or removed.
    /// When `false` (the default), `DatabaseFileHandle`/`WalFileHandle` keep
    /// the file open and re-read from disk on every access.
    pub store_in_memory: bool,

    /// Upgrade soft consistency warnings (fragment totals, accounted-space
    /// totals) to hard errors.
    pub strict_format_checking: bool,

    /// Additionally carve freelist leaf pages during history iteration.
    pub carve_freelist_pages: bool,
}

impl Default for DissectOptions {
    fn default() -> Self {
        DissectOptions {
            store_in_memory: false,
            strict_format_checking: true,
            carve_freelist_pages: false,
        }
    }
}
