//! Extraction coordinator: run the extractor over every page concurrently
//! and feed the results into the batched store.

use crate::config::ExtractionConfig;
use crate::error::DirectoryError;
use crate::output::{PageReport, RunSummary};
use crate::pipeline::extract::RecordExtractor;
use crate::pipeline::source::SourcePage;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::store::BatchedStore;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives page extraction with at most `concurrency` pages in flight.
pub struct ExtractionCoordinator {
    extractor: RecordExtractor,
    concurrency: usize,
    progress: ProgressCallback,
    cancel: CancellationToken,
}

impl ExtractionCoordinator {
    pub fn new(extractor: RecordExtractor, config: &ExtractionConfig) -> Self {
        Self {
            extractor,
            concurrency: config.concurrency.max(1),
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` to stop the run early.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Extract every page, store the records, and run the final flush.
    ///
    /// Page failures are reported in the summary and never abort the run.
    /// After cancellation no new page starts and in-flight pages are
    /// abandoned; records already handed to the store are still flushed.
    pub async fn run(&self, pages: Vec<SourcePage>, store: &BatchedStore) -> Result<RunSummary, DirectoryError> {
        let start = Instant::now();
        let total = pages.len();
        self.progress.on_run_start(total);
        info!("Extracting {} pages with concurrency {}", total, self.concurrency);

        let mut reports: Vec<PageReport> = stream::iter(pages)
            .map(|page| self.process_page(page, total, store))
            .buffer_unordered(self.concurrency)
            .filter_map(|report| async move { report })
            .collect()
            .await;

        let cancelled_pages = total - reports.len();
        if cancelled_pages > 0 {
            warn!("Run cancelled: {} pages not processed", cancelled_pages);
        }

        let stats = store.finish().await?;

        reports.sort_by_key(|r| r.page_num);
        let failed_pages = reports.iter().filter(|r| r.error.is_some()).count();
        let summary = RunSummary {
            total_pages: total,
            processed_pages: reports.len() - failed_pages,
            failed_pages,
            cancelled_pages,
            total_providers: stats.records_written,
            dropped_entries: reports.iter().map(|r| r.dropped_entries).sum(),
            skipped_blocks: reports.iter().map(|r| r.skipped_blocks).sum(),
            flushes: stats.flushes,
            failed_flushes: stats.failed_flushes,
            duration_ms: start.elapsed().as_millis() as u64,
            pages: reports,
        };

        info!(
            "Done: {} providers from {}/{} pages ({} failed) in {}ms",
            summary.total_providers,
            summary.processed_pages,
            summary.total_pages,
            summary.failed_pages,
            summary.duration_ms
        );
        self.progress.on_run_complete(&summary);
        Ok(summary)
    }

    /// `None` when the page was abandoned by cancellation.
    async fn process_page(&self, page: SourcePage, total: usize, store: &BatchedStore) -> Option<PageReport> {
        let page_num = page.page_num;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("Page {}: abandoned", page_num);
                None
            }
            report = self.extract_and_store(page, total, store) => Some(report),
        }
    }

    async fn extract_and_store(&self, page: SourcePage, total: usize, store: &BatchedStore) -> PageReport {
        let start = Instant::now();
        let page_num = page.page_num;

        let text = match page.content {
            Ok(text) => text,
            Err(e) => {
                warn!("{}", e);
                self.progress.on_page_error(page_num, total, &e.to_string());
                return PageReport::from_error(e, 0);
            }
        };

        self.progress.on_page_start(page_num, total);
        match self.extractor.extract_page(page_num, &text).await {
            Ok(mut result) => {
                let report = PageReport::from_result(&result);
                let records = std::mem::take(&mut result.records);
                let n = records.len();
                store.add(records).await;
                info!("Page {}/{}: {} providers", page_num, total, n);
                self.progress.on_page_complete(page_num, total, n);
                report
            }
            Err(e) => {
                warn!("{}", e);
                self.progress.on_page_error(page_num, total, &e.to_string());
                PageReport::from_error(e, start.elapsed().as_millis() as u64)
            }
        }
    }
}
