//! End-to-end tests against a live LLM provider.
//!
//! They read directory files from `./test_cases/` and make real API calls,
//! so they are gated behind the `E2E_ENABLED` environment variable.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture
//!
//! The markdown test needs only an API key; the PDF test also needs pdfium
//! (downloaded on first run).

use pdf2providers::{
    ingest, DirectoryLayout, ExtractionConfig, JsonlSink, MemorySink, PageSelection, ParserKind, SqliteSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip unless E2E_ENABLED is set and the input file exists.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pdf2providers=info")),
        )
        .with_test_writer()
        .try_init();
}

fn e2e_config() -> ExtractionConfig {
    init_tracing();
    let mut builder = ExtractionConfig::builder()
        .concurrency(2)
        .batch_size(5)
        .flush_interval(Duration::from_secs(2));
    if let Ok(model) = std::env::var("E2E_MODEL") {
        builder = builder.model(model);
    }
    builder.build().unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn markdown_dump_individual_layout() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("ca_la_sample.md"));
    let config = ExtractionConfig {
        parser: ParserKind::Markdown,
        layout: DirectoryLayout::Individual,
        pages: PageSelection::Range(1, 2),
        ..e2e_config()
    };
    let sink = Arc::new(MemorySink::new());

    let summary = ingest(path.to_str().unwrap(), &config, sink.clone()).await.unwrap();
    println!("{}", serde_json::to_string_pretty(&summary).unwrap());

    assert_eq!(summary.failed_pages, 0, "first error: {:?}", summary.first_error());
    assert!(summary.total_providers > 0);
    for record in sink.records() {
        assert!(!record.name.trim().is_empty());
        assert!(record.source_page >= 1 && record.source_page <= 2);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn markdown_dump_organization_layout_to_jsonl() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("il_cook_sample.md"));
    let out = tempfile::tempdir().unwrap();
    let jsonl = out.path().join("providers.jsonl");
    let config = ExtractionConfig {
        parser: ParserKind::Markdown,
        layout: DirectoryLayout::Organization,
        pages: PageSelection::Single(1),
        ..e2e_config()
    };
    let sink = Arc::new(JsonlSink::open(&jsonl).await.unwrap());

    let summary = ingest(path.to_str().unwrap(), &config, sink).await.unwrap();

    let lines = std::fs::read_to_string(&jsonl).unwrap();
    assert_eq!(lines.lines().count(), summary.total_providers);
    assert!(summary.total_providers > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn pdf_text_layer_to_sqlite() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("directory_sample.pdf"));
    let out = tempfile::tempdir().unwrap();
    let config = ExtractionConfig {
        parser: ParserKind::Text,
        pages: PageSelection::Range(1, 3),
        ..e2e_config()
    };
    let sink = Arc::new(SqliteSink::open(out.path().join("providers.db")).unwrap());

    let summary = ingest(path.to_str().unwrap(), &config, sink.clone()).await.unwrap();
    println!(
        "{} providers from {}/{} pages in {}ms",
        summary.total_providers, summary.processed_pages, summary.total_pages, summary.duration_ms
    );

    assert_eq!(sink.count().await.unwrap(), summary.total_providers);
}
