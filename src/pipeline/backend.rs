//! Extraction backend: one block of directory text in, untyped JSON out.
//!
//! The [`ExtractionBackend`] trait is the seam between the extractor and the
//! LLM. [`LlmBackend`] is the production implementation over an
//! `edgequake_llm` provider; tests plug in deterministic stubs.
//!
//! ## Retry Strategy
//!
//! Transport failures (HTTP 429 / 5xx, connection resets, per-call timeouts)
//! are retried with exponential backoff (`retry_backoff_ms * 2^(attempt-1)`).
//! With a 500 ms base and 3 retries the waits are 500 ms → 1 s → 2 s. Once
//! retries are exhausted the call fails with [`BackendError::Unavailable`].
//! A response that arrives but carries no usable JSON is
//! [`BackendError::Malformed`] and is not retried.

use crate::config::ExtractionConfig;
use crate::error::DirectoryError;
use crate::pipeline::clean::extract_json;
use crate::prompts::{extraction_user_message, EXTRACTION_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Network, authentication or timeout failure after all retries.
    /// Aborts the page.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but the answer is not JSON. Skips the block.
    #[error("malformed backend response: {0}")]
    Malformed(String),
}

/// Turns one block of directory text into JSON.
///
/// `county` and `specialty` are the page headings, passed as hints.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn extract(
        &self,
        block: &str,
        county: Option<&str>,
        specialty: Option<&str>,
    ) -> Result<Value, BackendError>;
}

/// [`ExtractionBackend`] over an `edgequake_llm` chat provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    call_timeout: Duration,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| EXTRACTION_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve the provider from `config` and wrap it.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, DirectoryError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExtractionBackend for LlmBackend {
    async fn extract(
        &self,
        block: &str,
        county: Option<&str>,
        specialty: Option<&str>,
    ) -> Result<Value, BackendError> {
        let user = extraction_user_message(block, county, specialty);
        let messages = vec![ChatMessage::system(&self.system_prompt), ChatMessage::user(&user)];
        let options = self.options();

        let mut last_err = String::from("no attempt made");
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_delay(self.retry_backoff_ms, attempt);
                warn!(
                    "Extraction retry {}/{} after {}ms",
                    attempt,
                    self.max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }

            match timeout(self.call_timeout, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "Extraction call: {} input tokens, {} output tokens",
                        response.prompt_tokens, response.completion_tokens
                    );
                    return parse_response(&response.content);
                }
                Ok(Err(e)) => {
                    last_err = e.to_string();
                    warn!("Extraction attempt {} failed: {}", attempt + 1, last_err);
                }
                Err(_) => {
                    last_err = format!("timed out after {}s", self.call_timeout.as_secs());
                    warn!("Extraction attempt {} {}", attempt + 1, last_err);
                }
            }
        }

        Err(BackendError::Unavailable(last_err))
    }
}

/// Pull the JSON payload out of a chat response.
pub fn parse_response(content: &str) -> Result<Value, BackendError> {
    let json = extract_json(content).ok_or_else(|| {
        BackendError::Malformed(format!("no JSON in response: {:.80}", content.trim()))
    })?;
    serde_json::from_str(json).map_err(|e| BackendError::Malformed(e.to_string()))
}

/// Wait before retry number `attempt` (1-based).
pub(crate) fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))))
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, DirectoryError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DirectoryError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key (`OPENAI_API_KEY`, `OPENROUTER_API_KEY`, …).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
///
/// Called before any page is processed so a missing key fails the run at
/// startup.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, DirectoryError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            let model = config.model.clone().unwrap_or(model);
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DirectoryError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, OPENROUTER_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
