//! Top-level entry points: a directory file in, stored provider rows out.

use crate::config::{ExtractionConfig, ParserKind};
use crate::coordinator::ExtractionCoordinator;
use crate::error::DirectoryError;
use crate::output::RunSummary;
use crate::pipeline::backend::{resolve_provider, ExtractionBackend, LlmBackend};
use crate::pipeline::extract::RecordExtractor;
use crate::pipeline::input::resolve_input;
use crate::pipeline::source::{MarkdownPageSource, PageSource, PdfTextSource, VisionPageSource};
use crate::sink::RecordSink;
use crate::store::{BatchedStore, StoreConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Extract every provider in `input` (local path or URL) into `sink`.
///
/// # Example
///
/// ```rust,no_run
/// use pdf2providers::{ingest, ExtractionConfig, SqliteSink};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ExtractionConfig::builder().batch_size(25).build()?;
///     let sink = Arc::new(SqliteSink::open("providers.db")?);
///     let summary = ingest("directory.pdf", &config, sink).await?;
///     println!("{} providers from {} pages", summary.total_providers, summary.total_pages);
///     Ok(())
/// }
/// ```
pub async fn ingest(
    input: &str,
    config: &ExtractionConfig,
    sink: Arc<dyn RecordSink>,
) -> Result<RunSummary, DirectoryError> {
    ingest_with_cancel(input, config, sink, CancellationToken::new()).await
}

/// [`ingest`] that stops early when `cancel` fires.
pub async fn ingest_with_cancel(
    input: &str,
    config: &ExtractionConfig,
    sink: Arc<dyn RecordSink>,
    cancel: CancellationToken,
) -> Result<RunSummary, DirectoryError> {
    let parser = config.parser.resolve(input);
    info!("Ingesting '{}' with the {:?} parser", input, parser);

    // Credentials are checked before any download or page work.
    let provider = resolve_provider(config)?;
    let backend: Arc<dyn ExtractionBackend> = Arc::new(LlmBackend::new(Arc::clone(&provider), config));

    let resolved = resolve_input(input, config.download_timeout_secs, parser != ParserKind::Markdown).await?;
    let path = resolved.path().to_path_buf();

    let source: Box<dyn PageSource> = match parser {
        ParserKind::Markdown => Box::new(MarkdownPageSource::new(path, config.pages.clone())),
        ParserKind::Vision => Box::new(VisionPageSource::new(path, provider, config)),
        ParserKind::Text | ParserKind::Auto => Box::new(PdfTextSource::new(path, config)),
    };

    let summary = ingest_pages(source.as_ref(), backend, config, sink, cancel).await;
    drop(resolved);
    summary
}

/// Run the pipeline over any page source with any backend.
///
/// The seam used by tests and by callers that bring their own text.
pub async fn ingest_pages(
    source: &dyn PageSource,
    backend: Arc<dyn ExtractionBackend>,
    config: &ExtractionConfig,
    sink: Arc<dyn RecordSink>,
    cancel: CancellationToken,
) -> Result<RunSummary, DirectoryError> {
    let pages = source.pages().await?;
    let store = BatchedStore::new(sink, StoreConfig::from_config(config));
    let extractor = RecordExtractor::new(backend, config);
    ExtractionCoordinator::new(extractor, config)
        .with_cancellation(cancel)
        .run(pages, &store)
        .await
}
