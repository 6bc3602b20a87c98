//! Configuration types for provider directory extraction.
//!
//! Every knob lives in [`ExtractionConfig`], built once at startup through
//! [`ExtractionConfigBuilder`] and handed by reference to each component.
//! The library never reads configuration from the environment on its own;
//! the only exception is LLM provider auto-detection, which is delegated to
//! `edgequake_llm::ProviderFactory` when no provider was configured.

use crate::error::DirectoryError;
use crate::pipeline::segment::DirectoryLayout;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one extraction run.
///
/// # Example
/// ```rust
/// use pdf2providers::ExtractionConfig;
/// use std::time::Duration;
///
/// let config = ExtractionConfig::builder()
///     .batch_size(25)
///     .flush_interval(Duration::from_secs(10))
///     .concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 25);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// How page text is obtained. Default: [`ParserKind::Auto`].
    pub parser: ParserKind,

    /// How provider blocks are laid out on the page. Default: [`DirectoryLayout::Auto`].
    pub layout: DirectoryLayout,

    /// Pack consecutive blocks into one backend call up to this many words.
    /// `0` sends one block per call. Default: 0.
    pub chunk_words: usize,

    /// Number of pages extracted at the same time. Default: 4.
    ///
    /// Blocks of one page are sent one after another, so this is also the
    /// ceiling on simultaneous backend calls. Lower it on `429` errors.
    pub concurrency: usize,

    /// Records buffered before a flush is forced. Default: 10.
    pub batch_size: usize,

    /// Longest time a non-empty buffer waits before it is flushed. Default: 5 s.
    pub flush_interval: Duration,

    /// Extra attempts for the final flush before the run fails. Default: 3.
    pub flush_retries: u32,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama", "openrouter").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for extraction calls. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts on a failed backend call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom extraction system prompt. If None, uses the built-in prompt.
    pub system_prompt: Option<String>,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Longest rendered edge in pixels for [`ParserKind::Vision`]. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-page progress events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            parser: ParserKind::default(),
            layout: DirectoryLayout::default(),
            chunk_words: 0,
            concurrency: 4,
            batch_size: 10,
            flush_interval: Duration::from_secs(5),
            flush_retries: 3,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            system_prompt: None,
            pages: PageSelection::default(),
            password: None,
            max_rendered_pixels: 2000,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("parser", &self.parser)
            .field("layout", &self.layout)
            .field("chunk_words", &self.chunk_words)
            .field("concurrency", &self.concurrency)
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("flush_retries", &self.flush_retries)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pages", &self.pages)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn parser(mut self, parser: ParserKind) -> Self {
        self.config.parser = parser;
        self
    }

    pub fn layout(mut self, layout: DirectoryLayout) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn chunk_words(mut self, words: usize) -> Self {
        self.config.chunk_words = words;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    pub fn flush_retries(mut self, n: u32) -> Self {
        self.config.flush_retries = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, DirectoryError> {
        let c = &self.config;
        if c.batch_size == 0 {
            return Err(DirectoryError::InvalidConfig("Batch size must be ≥ 1".into()));
        }
        if c.flush_interval.is_zero() {
            return Err(DirectoryError::InvalidConfig(
                "Flush interval must be greater than zero".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(DirectoryError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(DirectoryError::InvalidConfig(
                "API timeout must be at least one second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Where page text comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParserKind {
    /// `Markdown` for `.md`/`.txt` inputs, `Text` for everything else. (default)
    #[default]
    Auto,
    /// The PDF's embedded text layer, read locally through pdfium.
    Text,
    /// Each page rendered to an image and transcribed by a vision LLM.
    Vision,
    /// A text dump already split into pages (`## Page N` headings).
    Markdown,
}

impl ParserKind {
    /// Resolve `Auto` against the input's file extension.
    pub fn resolve(self, input: &str) -> ParserKind {
        if self != ParserKind::Auto {
            return self;
        }
        let lower = input.to_ascii_lowercase();
        if lower.ends_with(".md") || lower.ends_with(".markdown") || lower.ends_with(".txt") {
            ParserKind::Markdown
        } else {
            ParserKind::Text
        }
    }
}

/// Specifies which pages of the document to extract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Every page (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Whether a 1-indexed page number is selected.
    pub fn contains(&self, page_num: usize) -> bool {
        match self {
            PageSelection::All => page_num >= 1,
            PageSelection::Single(p) => *p == page_num,
            PageSelection::Range(start, end) => page_num >= (*start).max(1) && page_num <= *end,
            PageSelection::Set(pages) => pages.contains(&page_num),
        }
    }

    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (1..=total_pages)
            .filter(|&p| self.contains(p))
            .map(|p| p - 1)
            .collect();
        indices.dedup();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ExtractionConfig::default();
        assert_eq!(c.batch_size, 10);
        assert_eq!(c.flush_interval, Duration::from_secs(5));
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.chunk_words, 0);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = ExtractionConfig::builder().batch_size(0).build().unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidConfig(_)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = ExtractionConfig::builder()
            .flush_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Flush interval"));
    }

    #[test]
    fn concurrency_is_clamped_to_one() {
        let c = ExtractionConfig::builder().concurrency(0).build().expect("valid");
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn parser_auto_resolves_by_extension() {
        assert_eq!(ParserKind::Auto.resolve("dir/ca_la.md"), ParserKind::Markdown);
        assert_eq!(ParserKind::Auto.resolve("dump.TXT"), ParserKind::Markdown);
        assert_eq!(ParserKind::Auto.resolve("il_cook.pdf"), ParserKind::Text);
        assert_eq!(ParserKind::Vision.resolve("notes.md"), ParserKind::Vision);
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(5), vec![0, 1, 2, 3, 4]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 4).to_indices(5), vec![1, 2, 3]);
        assert_eq!(PageSelection::Range(4, 99).to_indices(5), vec![3, 4]);
        assert_eq!(PageSelection::Set(vec![3, 1, 3]).to_indices(5), vec![0, 2]);
    }
}
