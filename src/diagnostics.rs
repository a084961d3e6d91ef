//! Out-of-band diagnostic sink.
//!
//! Warnings are delivered through an injected sink rather than module-level
//! logging or global filters, so a parse session never touches global
//! state; the default sink forwards to the `log` crate.

use std::fmt;

/// Severity of a diagnostic emitted during a parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
}

/// A single diagnostic message, with the same offset/page context as
/// [`crate::error::Violation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub page_no: Option<u32>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page_no {
            Some(p) => write!(f, "{}: {} (page {p})", severity_label(self.severity), self.message),
            None => write!(f, "{}: {}", severity_label(self.severity), self.message),
        }
    }
}

fn severity_label(s: Severity) -> &'static str {
    match s {
        Severity::Info => "info",
        Severity::Warn => "warn",
    }
}

/// Receives diagnostics produced while decoding. Implementations must not
/// panic; a parse never depends on a diagnostic having been delivered.
///
/// The helper methods take `&str` rather than `impl Into<String>` so the
/// trait stays object-safe — callers pass `&dyn DiagnosticSink` throughout.
pub trait DiagnosticSink {
    fn emit(&self, diagnostic: Diagnostic);

    fn warn(&self, message: &str) {
        self.emit(Diagnostic { severity: Severity::Warn, message: message.to_string(), page_no: None });
    }

    fn warn_page(&self, message: &str, page_no: u32) {
        self.emit(Diagnostic { severity: Severity::Warn, message: message.to_string(), page_no: Some(page_no) });
    }

    fn info(&self, message: &str) {
        self.emit(Diagnostic { severity: Severity::Info, message: message.to_string(), page_no: None });
    }
}

/// Forwards diagnostics to the `log` crate. This is the default sink used
/// when a caller does not supply their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Info => log::info!("{diagnostic}"),
            Severity::Warn => log::warn!("{diagnostic}"),
        }
    }
}

/// Collects diagnostics in memory instead of logging them; useful for tests
/// and for callers that want to inspect warnings programmatically.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub diagnostics: std::cell::RefCell<Vec<Diagnostic>>,
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        self.diagnostics.borrow_mut().push(diagnostic);
    }
}
