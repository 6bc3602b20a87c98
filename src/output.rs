//! Run outcome types.

use crate::error::{DirectoryError, PageError};
use crate::record::ProviderRecord;
use serde::{Deserialize, Serialize};

/// Records extracted from one page.
///
/// Transient: the coordinator hands `records` to the store and keeps only
/// the counts in a [`PageReport`].
#[derive(Debug, Clone, Default)]
pub struct PageResult {
    pub page_num: usize,
    /// Validated records in block order.
    pub records: Vec<ProviderRecord>,
    /// Blocks the page was split into.
    pub blocks: usize,
    /// Blocks skipped because the backend response was unusable.
    pub skipped_blocks: usize,
    /// Backend entries that failed validation.
    pub dropped_entries: usize,
    pub duration_ms: u64,
}

/// Per-page outcome kept in the run summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageReport {
    pub page_num: usize,
    pub records: usize,
    pub blocks: usize,
    pub skipped_blocks: usize,
    pub dropped_entries: usize,
    pub duration_ms: u64,
    pub error: Option<PageError>,
}

impl PageReport {
    pub fn from_result(result: &PageResult) -> Self {
        Self {
            page_num: result.page_num,
            records: result.records.len(),
            blocks: result.blocks,
            skipped_blocks: result.skipped_blocks,
            dropped_entries: result.dropped_entries,
            duration_ms: result.duration_ms,
            error: None,
        }
    }

    pub fn from_error(error: PageError, duration_ms: u64) -> Self {
        Self {
            page_num: error.page(),
            duration_ms,
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Totals for a finished run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Pages handed to the coordinator.
    pub total_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    /// Pages never attempted because the run was cancelled.
    pub cancelled_pages: usize,
    /// Records written to the sink.
    pub total_providers: usize,
    pub dropped_entries: usize,
    pub skipped_blocks: usize,
    /// Successful sink writes, including the final flush.
    pub flushes: usize,
    /// Sink writes that failed and were retried.
    pub failed_flushes: usize,
    pub duration_ms: u64,
    /// Page reports sorted by page number.
    pub pages: Vec<PageReport>,
}

impl RunSummary {
    /// Treat any failed page as an error.
    pub fn into_result(self) -> Result<Self, DirectoryError> {
        if self.failed_pages > 0 {
            return Err(DirectoryError::PartialFailure {
                success: self.processed_pages,
                failed: self.failed_pages,
                total: self.total_pages,
            });
        }
        Ok(self)
    }

    /// First page error, for one-line reports.
    pub fn first_error(&self) -> Option<&PageError> {
        self.pages.iter().find_map(|p| p.error.as_ref())
    }
}
