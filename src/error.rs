//! Error types for the pdf2providers library.
//!
//! Failures are layered by blast radius:
//!
//! * [`DirectoryError`]: **Fatal**: the run cannot start or cannot end
//!   cleanly (bad input, provider not configured, invalid configuration,
//!   final flush impossible). Returned as `Err` from the top-level `ingest*`
//!   functions.
//!
//! * [`PageError`]: **Non-fatal**: one page could not be read or its
//!   backend calls failed. The page contributes zero records and the other
//!   pages carry on. Stored in [`crate::output::PageReport`].
//!
//! Block-level and entry-level failures ([`BlockError`],
//! [`crate::record::ValidationError`]) never leave the extractor; they are
//! logged and counted.

use crate::pipeline::backend::BackendError;
use crate::sink::SinkError;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2providers library.
#[derive(Debug, Error)]
pub enum DirectoryError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file was expected to be a PDF but is not.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// A text or markdown input could not be read.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The page selection matched no page of the document.
    #[error("No selected page is in range (document has {total} pages)")]
    PageOutOfRange { total: usize },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
PDFium is normally downloaded automatically on first run.\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// The database sink could not be opened.
    #[error("Failed to open sink '{target}': {source}")]
    SinkUnavailable {
        target: String,
        #[source]
        source: SinkError,
    },

    /// The final flush could not write the remaining records.
    #[error("Final flush failed after {attempts} attempts; {pending} records were not stored: {source}")]
    FlushFailed {
        pending: usize,
        attempts: u32,
        #[source]
        source: SinkError,
    },

    // ── Run outcome ───────────────────────────────────────────────────────
    /// Some pages succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::RunSummary::into_result`] when the caller
    /// treats any page failure as an error.
    #[error("{failed}/{total} pages failed during extraction")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// The coordinator logs it, counts the page as failed and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page source could not produce text for this page.
    #[error("Page {page}: text unavailable: {detail}")]
    PageUnavailable { page: usize, detail: String },

    /// The extraction backend could not be reached (network, auth, timeout).
    #[error("Page {page}: extraction backend unavailable: {detail}")]
    BackendUnavailable { page: usize, detail: String },
}

impl PageError {
    /// The 1-indexed page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::PageUnavailable { page, .. } | PageError::BackendUnavailable { page, .. } => {
                *page
            }
        }
    }
}

/// A block whose extraction was skipped. The rest of the page continues.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block {block} on page {page}: backend response rejected: {source}")]
    Rejected {
        page: usize,
        block: usize,
        #[source]
        source: BackendError,
    },

    #[error("block {block} on page {page}: unexpected JSON shape: {detail}")]
    UnexpectedShape {
        page: usize,
        block: usize,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_display() {
        let e = DirectoryError::PartialFailure {
            success: 9,
            failed: 1,
            total: 10,
        };
        assert!(e.to_string().contains("1/10"), "got: {e}");
    }

    #[test]
    fn flush_failed_names_pending_count() {
        let e = DirectoryError::FlushFailed {
            pending: 7,
            attempts: 4,
            source: SinkError::Write("disk full".into()),
        };
        let msg = e.to_string();
        assert!(msg.contains("7 records"), "got: {msg}");
        assert!(msg.contains("disk full"), "got: {msg}");
    }

    #[test]
    fn page_error_reports_its_page() {
        let e = PageError::BackendUnavailable {
            page: 4,
            detail: "connection refused".into(),
        };
        assert_eq!(e.page(), 4);
        assert!(e.to_string().starts_with("Page 4"));
    }

    #[test]
    fn page_error_serialises() {
        let e = PageError::PageUnavailable {
            page: 2,
            detail: "no text layer".into(),
        };
        let json = serde_json::to_string(&e).expect("serialise");
        let back: PageError = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back, e);
    }
}
