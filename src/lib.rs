//! # pdf2providers
//!
//! Turn printed healthcare provider directories (multi-column PDFs listing
//! clinicians, practices, addresses and phone numbers) into database rows,
//! one row per provider.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / text dump
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Source   page text: pdfium text layer, vision-LLM transcription, or markdown dump
//!  ├─ 3. Segment  split each page into provider blocks, read county/specialty headings
//!  ├─ 4. Extract  one LLM call per block → JSON → validated ProviderRecord
//!  ├─ 5. Store    batch records; flush on size OR interval
//!  └─ 6. Sink     SQLite / JSON Lines / memory
//! ```
//!
//! Pages are extracted concurrently (bounded by `concurrency`); blocks within
//! a page are extracted in order. A page that fails contributes zero records
//! and the rest of the run carries on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2providers::{ingest, ExtractionConfig, SqliteSink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / OPENROUTER_API_KEY / …
//!     let config = ExtractionConfig::default();
//!     let sink = Arc::new(SqliteSink::open("providers.db")?);
//!     let summary = ingest("ca_la_directory.pdf", &config, sink).await?;
//!     eprintln!("{} providers, {} failed pages", summary.total_providers, summary.failed_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `pdf2providers` binary (clap + anyhow + tracing-subscriber + dotenvy) |
//! | `bundled` | off     | Embed the pdfium shared library at build time |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod coordinator;
pub mod error;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod sink;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSelection, ParserKind};
pub use coordinator::ExtractionCoordinator;
pub use error::{BlockError, DirectoryError, PageError};
pub use ingest::{ingest, ingest_pages, ingest_with_cancel};
pub use output::{PageReport, PageResult, RunSummary};
pub use pipeline::backend::{BackendError, ExtractionBackend, LlmBackend};
pub use pipeline::extract::RecordExtractor;
pub use pipeline::segment::DirectoryLayout;
pub use pipeline::source::{MarkdownPageSource, PageSource, PdfTextSource, SourcePage, StaticPages, VisionPageSource};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{Address, ProviderRecord, StructuredAddress, Telehealth, ValidationError};
pub use sink::{JsonlSink, MemorySink, RecordSink, SinkError, SqliteSink};
pub use store::{BatchedStore, StoreConfig, StoreState, StoreStats};
pub use tokio_util::sync::CancellationToken;
