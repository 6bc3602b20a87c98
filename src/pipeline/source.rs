//! Page sources: where the raw text of each directory page comes from.
//!
//! Every source yields one [`SourcePage`] per selected page. A page whose
//! text could not be produced carries a [`PageError`] instead of text, so a
//! single unreadable page never hides the others.

use crate::config::{ExtractionConfig, PageSelection};
use crate::error::{DirectoryError, PageError};
use crate::pipeline::backend::backoff_delay;
use crate::pipeline::clean::clean_transcription;
use crate::pipeline::render;
use crate::prompts::TRANSCRIPTION_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Raw text of one page, or the reason it is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePage {
    /// 1-indexed.
    pub page_num: usize,
    pub content: Result<String, PageError>,
}

impl SourcePage {
    pub fn text(page_num: usize, text: impl Into<String>) -> Self {
        Self {
            page_num,
            content: Ok(text.into()),
        }
    }

    pub fn unavailable(page_num: usize, detail: impl Into<String>) -> Self {
        Self {
            page_num,
            content: Err(PageError::PageUnavailable {
                page: page_num,
                detail: detail.into(),
            }),
        }
    }
}

/// Produces the pages of one directory. Consumed once per run.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn pages(&self) -> Result<Vec<SourcePage>, DirectoryError>;
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Pages already in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticPages {
    pages: Vec<SourcePage>,
}

impl StaticPages {
    /// Number the texts from page 1.
    pub fn new<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pages = texts
            .into_iter()
            .enumerate()
            .map(|(i, t)| SourcePage::text(i + 1, t))
            .collect();
        Self { pages }
    }

    pub fn from_pages(pages: Vec<SourcePage>) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl PageSource for StaticPages {
    async fn pages(&self) -> Result<Vec<SourcePage>, DirectoryError> {
        Ok(self.pages.clone())
    }
}

// ── Markdown / text dump ─────────────────────────────────────────────────

static RE_PAGE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^#{1,3}\s*page\s+(\d+)\s*$").unwrap());

static RE_PAGE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*-{2,}\s*page\s+break\s*-{2,}\s*$|\x0C").unwrap());

/// A text or markdown dump of the directory, already transcribed.
pub struct MarkdownPageSource {
    path: PathBuf,
    selection: PageSelection,
}

impl MarkdownPageSource {
    pub fn new(path: impl Into<PathBuf>, selection: PageSelection) -> Self {
        Self {
            path: path.into(),
            selection,
        }
    }
}

#[async_trait]
impl PageSource for MarkdownPageSource {
    async fn pages(&self) -> Result<Vec<SourcePage>, DirectoryError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| DirectoryError::ReadFailed {
                path: self.path.clone(),
                source,
            })?;

        let all = split_markdown_pages(&text);
        let total = all.len();
        let pages: Vec<SourcePage> = all
            .into_iter()
            .filter(|(n, _)| self.selection.contains(*n))
            .map(|(n, t)| SourcePage::text(n, t))
            .collect();

        if pages.is_empty() && total > 0 {
            return Err(DirectoryError::PageOutOfRange { total });
        }
        info!("{}: {} of {} pages selected", self.path.display(), pages.len(), total);
        Ok(pages)
    }
}

/// Split a dump into `(page_num, text)`.
///
/// `## Page N` headings number the pages explicitly. Without them, page
/// breaks (`--- PAGE BREAK ---` lines or form feeds) separate consecutive
/// pages from 1. A dump with neither is a single page.
pub fn split_markdown_pages(text: &str) -> Vec<(usize, String)> {
    let headings: Vec<(usize, usize, usize)> = RE_PAGE_HEADING
        .captures_iter(text)
        .filter_map(|c| {
            let m = c.get(0)?;
            let n = c[1].parse::<usize>().ok()?;
            Some((n, m.start(), m.end()))
        })
        .collect();

    if !headings.is_empty() {
        let preamble = text[..headings[0].1].trim();
        if !preamble.is_empty() {
            debug!("Ignoring {} chars before the first page heading", preamble.len());
        }
        return headings
            .iter()
            .enumerate()
            .map(|(i, &(n, _, body_start))| {
                let body_end = headings.get(i + 1).map_or(text.len(), |h| h.1);
                (n, text[body_start..body_end].trim().to_string())
            })
            .collect();
    }

    let parts: Vec<&str> = RE_PAGE_BREAK.split(text).collect();
    if parts.len() == 1 && text.trim().is_empty() {
        return Vec::new();
    }
    parts
        .into_iter()
        .enumerate()
        .map(|(i, p)| (i + 1, p.trim().to_string()))
        .collect()
}

// ── PDF text layer ───────────────────────────────────────────────────────

/// The PDF's embedded text layer, read locally through pdfium.
pub struct PdfTextSource {
    path: PathBuf,
    password: Option<String>,
    selection: PageSelection,
}

impl PdfTextSource {
    pub fn new(path: impl Into<PathBuf>, config: &ExtractionConfig) -> Self {
        Self {
            path: path.into(),
            password: config.password.clone(),
            selection: config.pages.clone(),
        }
    }
}

#[async_trait]
impl PageSource for PdfTextSource {
    async fn pages(&self) -> Result<Vec<SourcePage>, DirectoryError> {
        let pages = render::extract_text(&self.path, self.password.as_deref(), &self.selection).await?;
        Ok(pages
            .into_iter()
            .map(|(page_num, content)| SourcePage { page_num, content })
            .collect())
    }
}

// ── Vision transcription ─────────────────────────────────────────────────

/// Each page rendered to PNG and transcribed by a vision LLM.
pub struct VisionPageSource {
    path: PathBuf,
    password: Option<String>,
    selection: PageSelection,
    max_pixels: u32,
    concurrency: usize,
    provider: Arc<dyn LLMProvider>,
    options: TranscriptionOptions,
}

#[derive(Debug, Clone, Copy)]
struct TranscriptionOptions {
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    call_timeout: Duration,
}

impl VisionPageSource {
    pub fn new(path: impl Into<PathBuf>, provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            path: path.into(),
            password: config.password.clone(),
            selection: config.pages.clone(),
            max_pixels: config.max_rendered_pixels,
            concurrency: config.concurrency,
            provider,
            options: TranscriptionOptions {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                max_retries: config.max_retries,
                retry_backoff_ms: config.retry_backoff_ms,
                call_timeout: Duration::from_secs(config.api_timeout_secs),
            },
        }
    }
}

#[async_trait]
impl PageSource for VisionPageSource {
    async fn pages(&self) -> Result<Vec<SourcePage>, DirectoryError> {
        let rendered = render::render_pages(
            &self.path,
            self.password.as_deref(),
            &self.selection,
            self.max_pixels,
        )
        .await?;
        info!("Transcribing {} pages with concurrency {}", rendered.len(), self.concurrency);

        let provider = &self.provider;
        let options = self.options;
        let mut pages: Vec<SourcePage> = stream::iter(rendered)
            .map(|(page_num, image)| async move {
                let image = match image {
                    Ok(img) => img,
                    Err(e) => {
                        return SourcePage {
                            page_num,
                            content: Err(e),
                        }
                    }
                };
                let data = match render::encode_page(&image) {
                    Ok(d) => d,
                    Err(e) => return SourcePage::unavailable(page_num, format!("PNG encode failed: {e}")),
                };
                drop(image);
                match transcribe_page(provider, page_num, data, options).await {
                    Ok(text) => SourcePage::text(page_num, text),
                    Err(detail) => SourcePage::unavailable(page_num, detail),
                }
            })
            .buffer_unordered(self.concurrency.max(1))
            .collect()
            .await;

        pages.sort_by_key(|p| p.page_num);
        Ok(pages)
    }
}

async fn transcribe_page(
    provider: &Arc<dyn LLMProvider>,
    page_num: usize,
    image: ImageData,
    options: TranscriptionOptions,
) -> Result<String, String> {
    let messages = vec![
        ChatMessage::system(TRANSCRIPTION_SYSTEM_PROMPT),
        ChatMessage::user_with_images("", vec![image]),
    ];
    let completion = CompletionOptions {
        temperature: Some(options.temperature),
        max_tokens: Some(options.max_tokens),
        ..Default::default()
    };

    let mut last_err = String::from("no attempt made");
    for attempt in 0..=options.max_retries {
        if attempt > 0 {
            let backoff = backoff_delay(options.retry_backoff_ms, attempt);
            warn!(
                "Page {}: transcription retry {}/{} after {}ms",
                page_num,
                attempt,
                options.max_retries,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        match timeout(options.call_timeout, provider.chat(&messages, Some(&completion))).await {
            Ok(Ok(response)) => {
                debug!(
                    "Page {}: transcribed, {} input tokens, {} output tokens",
                    page_num, response.prompt_tokens, response.completion_tokens
                );
                return Ok(clean_transcription(&response.content));
            }
            Ok(Err(e)) => last_err = e.to_string(),
            Err(_) => last_err = format!("timed out after {}s", options.call_timeout.as_secs()),
        }
        warn!("Page {}: transcription attempt {} failed: {}", page_num, attempt + 1, last_err);
    }

    Err(format!("transcription failed: {last_err}"))
}
