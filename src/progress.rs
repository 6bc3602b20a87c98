//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as pages complete and batches are flushed. The trait is
//! `Send + Sync` because pages are extracted concurrently.
//!
//! # Example
//!
//! ```rust
//! use pdf2providers::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct RecordCounter {
//!     records: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for RecordCounter {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, records: usize) {
//!         self.records.fetch_add(records, Ordering::SeqCst);
//!         eprintln!("page {page_num}/{total_pages}: {records} providers");
//!     }
//! }
//!
//! let counter = Arc::new(RecordCounter { records: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::RunSummary;
use std::sync::Arc;

/// Called by the pipeline as it processes each page.
///
/// All methods have no-op defaults. `on_page_*` may be called concurrently
/// from different tasks, in completion order rather than page order.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once the page set is known, before any extraction.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the first backend call for a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page finished and its records were handed to the store.
    ///
    /// * `records`: validated provider records the page produced
    fn on_page_complete(&self, page_num: usize, total_pages: usize, records: usize) {
        let _ = (page_num, total_pages, records);
    }

    /// Called when a page failed and contributes zero records.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called after the final flush with the run totals.
    fn on_run_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
