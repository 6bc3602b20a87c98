//! CLI binary for pdf2providers.
//!
//! A thin shim over the library crate that maps CLI flags (and their
//! environment fallbacks) to `ExtractionConfig`, opens the sink and prints
//! the run summary.

use anyhow::{Context, Result};
use clap::Parser;
use pdf2providers::{
    ingest_with_cancel, CancellationToken, DirectoryLayout, ExtractionConfig, ExtractionProgressCallback,
    JsonlSink, PageSelection, ParserKind, ProgressCallback, RecordSink, RunSummary, SqliteSink,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per page. Pages complete out of
/// order, so start times are tracked per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    providers: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading directory…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            providers: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&page_num)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  {msg}  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.set_message("0 providers");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting providers from {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page_num, Instant::now());
    }

    fn on_page_complete(&self, page_num: usize, total: usize, records: usize) {
        let secs = self.elapsed_secs(page_num);
        let so_far = self.providers.fetch_add(records, Ordering::SeqCst) + records;
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<14}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{records:>3} providers")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.set_message(format!("{so_far} providers"));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        self.bar.finish_and_clear();
        print_summary(summary);
    }
}

fn print_summary(summary: &RunSummary) {
    let mark = if summary.failed_pages == 0 && summary.cancelled_pages == 0 {
        green("✔")
    } else if summary.processed_pages == 0 {
        red("✘")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{} {} providers from {}/{} pages  {}ms",
        mark,
        bold(&summary.total_providers.to_string()),
        summary.processed_pages,
        summary.total_pages,
        summary.duration_ms,
    );
    if summary.failed_pages > 0 {
        eprintln!("   {} pages failed", red(&summary.failed_pages.to_string()));
    }
    if summary.cancelled_pages > 0 {
        eprintln!("   {} pages not processed (cancelled)", summary.cancelled_pages);
    }
    eprintln!(
        "   {}",
        dim(&format!(
            "{} flushes, {} failed flush attempts, {} dropped entries, {} skipped blocks",
            summary.flushes, summary.failed_flushes, summary.dropped_entries, summary.skipped_blocks
        ))
    );
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # PDF text layer → SQLite (providers.db)
  pdf2providers ca_la_directory.pdf

  # Organization-first directory, JSON Lines output
  pdf2providers --layout organization il_cook.pdf -o il_cook.jsonl

  # Scanned directory: transcribe each page with a vision model
  pdf2providers --parser vision --model gpt-4.1-mini scanned.pdf

  # Pre-transcribed markdown dump (## Page N headings)
  pdf2providers ca_la.md --pages 3-15 --batch-size 25 --store-interval 2

  # Fail with a non-zero exit code if any page failed
  pdf2providers --strict --json directory.pdf > summary.json

ENVIRONMENT VARIABLES:
  PDF_PATH                Input when no positional argument is given
  OUTPUT_PATH             Output database / .jsonl file
  PARSER                  auto | text | vision | markdown
  BATCH_SIZE              Records per flush (default 10)
  STORE_INTERVAL          Seconds between time-based flushes (default 5)
  EDGEQUAKE_PROVIDER      Provider (openai, anthropic, gemini, openrouter, ollama, …)
  EDGEQUAKE_MODEL         Model ID
  OPENAI_API_KEY          OpenAI API key
  OPENROUTER_API_KEY      OpenRouter API key
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download

  A `.env` file in the working directory is loaded first.
"#;

/// Extract healthcare provider records from PDF provider directories.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2providers",
    version,
    about = "Extract healthcare provider records from PDF provider directories using LLMs",
    arg_required_else_help = false,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF / markdown file path or HTTP/HTTPS URL.
    #[arg(env = "PDF_PATH")]
    input: String,

    /// Output file: `.jsonl`/`.json` for JSON Lines, anything else is SQLite.
    #[arg(short, long, env = "OUTPUT_PATH", default_value = "providers.db")]
    output: PathBuf,

    /// Where page text comes from.
    #[arg(long, env = "PARSER", value_enum, default_value = "auto")]
    parser: ParserArg,

    /// How entries are laid out on the page.
    #[arg(long, env = "DIRECTORY_LAYOUT", value_enum, default_value = "auto")]
    layout: LayoutArg,

    /// Pack consecutive blocks into chunks of at most this many words (0 = off).
    #[arg(long, env = "CHUNK_WORDS", default_value_t = 0)]
    chunk_words: usize,

    /// LLM model ID (e.g. gpt-4.1-nano, google/gemini-2.0-flash-001).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, openrouter, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Pages extracted concurrently.
    #[arg(short, long, env = "PDF2PROVIDERS_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Records per flush.
    #[arg(long, env = "BATCH_SIZE", default_value_t = 10)]
    batch_size: usize,

    /// Seconds between time-based flushes.
    #[arg(long, env = "STORE_INTERVAL", default_value_t = 5.0)]
    store_interval: f64,

    /// Extra attempts for the final flush.
    #[arg(long, env = "PDF2PROVIDERS_FLUSH_RETRIES", default_value_t = 3)]
    flush_retries: u32,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDF2PROVIDERS_PAGES", default_value = "all")]
    pages: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2PROVIDERS_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "PDF2PROVIDERS_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per call.
    #[arg(long, env = "PDF2PROVIDERS_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2PROVIDERS_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per LLM call on failure.
    #[arg(long, env = "PDF2PROVIDERS_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Longest rendered edge in pixels (vision parser).
    #[arg(long, env = "PDF2PROVIDERS_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2PROVIDERS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDF2PROVIDERS_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Print the run summary as JSON on stdout.
    #[arg(long, env = "PDF2PROVIDERS_JSON")]
    json: bool,

    /// Exit with an error if any page failed.
    #[arg(long, env = "PDF2PROVIDERS_STRICT")]
    strict: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2PROVIDERS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2PROVIDERS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2PROVIDERS_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ParserArg {
    Auto,
    Text,
    Vision,
    Markdown,
}

impl From<ParserArg> for ParserKind {
    fn from(v: ParserArg) -> Self {
        match v {
            ParserArg::Auto => ParserKind::Auto,
            ParserArg::Text => ParserKind::Text,
            ParserArg::Vision => ParserKind::Vision,
            ParserArg::Markdown => ParserKind::Markdown,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LayoutArg {
    Auto,
    Individual,
    Organization,
}

impl From<LayoutArg> for DirectoryLayout {
    fn from(v: LayoutArg) -> Self {
        match v {
            LayoutArg::Auto => DirectoryLayout::Auto,
            LayoutArg::Individual => DirectoryLayout::Individual,
            LayoutArg::Organization => DirectoryLayout::Organization,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // `.env` values act as environment fallbacks for the flags below.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let parser = ParserKind::from(cli.parser).resolve(&cli.input);
    if parser != ParserKind::Markdown {
        ensure_pdfium(cli.quiet)?;
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new_dynamic() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, parser, progress_cb).await?;

    let sink = open_sink(&cli.output).await?;

    // ── Ctrl-C stops dispatching; pending records are still flushed ─────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} interrupted, flushing pending records…", cyan("◆"));
                cancel.cancel();
            }
        });
    }

    let summary = ingest_with_cancel(&cli.input, &config, sink, cancel)
        .await
        .context("Extraction failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet && !show_progress {
        print_summary(&summary);
    }
    if !cli.quiet && !cli.json {
        eprintln!("   →  {}", bold(&cli.output.display().to_string()));
    }

    if cli.strict {
        summary.into_result().context("Some pages failed")?;
    }
    Ok(())
}

/// Make sure a pdfium library is available, downloading it on first run.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    #[cfg(feature = "bundled")]
    {
        let _ = quiet;
        tokio::task::block_in_place(pdfium_auto::ensure_pdfium_bundled)
            .context("Failed to extract bundled PDFium engine")?;
    }

    #[cfg(not(feature = "bundled"))]
    if !pdfium_auto::is_pdfium_cached() {
        if quiet {
            tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
                .context("Failed to download PDFium engine")?;
        } else {
            let dl_bar = ProgressBar::new(0);
            dl_bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  \
                     [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  ")
                .tick_strings(TICKS),
            );
            dl_bar.set_prefix("PDF engine");
            dl_bar.enable_steady_tick(Duration::from_millis(80));

            let bar = dl_bar.clone();
            tokio::task::block_in_place(|| {
                pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
                    if let Some(t) = total {
                        if bar.length().unwrap_or(0) != t {
                            bar.set_length(t);
                        }
                    }
                    bar.set_position(downloaded);
                }))
            })
            .context("Failed to download PDFium engine")?;

            dl_bar.finish_with_message("ready ✓");
        }
    }
    Ok(())
}

async fn open_sink(path: &Path) -> Result<Arc<dyn RecordSink>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let sink: Arc<dyn RecordSink> = match ext.as_deref() {
        Some("jsonl") | Some("json") | Some("ndjson") => Arc::new(
            JsonlSink::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        _ => Arc::new(
            SqliteSink::open(path).with_context(|| format!("Failed to open database {}", path.display()))?,
        ),
    };
    Ok(sink)
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, parser: ParserKind, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    if !(cli.store_interval.is_finite() && cli.store_interval > 0.0) {
        anyhow::bail!("--store-interval must be a positive number of seconds");
    }

    let mut builder = ExtractionConfig::builder()
        .parser(parser)
        .layout(cli.layout.into())
        .chunk_words(cli.chunk_words)
        .concurrency(cli.concurrency)
        .batch_size(cli.batch_size)
        .flush_interval(Duration::from_secs_f64(cli.store_interval))
        .flush_retries(cli.flush_retries)
        .pages(parse_pages(&cli.pages)?)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .max_rendered_pixels(cli.max_pixels)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start.trim().parse().context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;
        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if pages.contains(&0) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1");
        }
        return Ok(PageSelection::Set(pages));
    }

    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}
