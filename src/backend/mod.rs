//! AI provider abstraction.
//!
//! A [`Backend`] turns a provider-agnostic [`LlmRequest`] into one HTTP call
//! and normalizes the answer into an [`LlmResponse`]. The parser never talks
//! to a provider directly; it goes through [`with_backoff`], which adds
//! transport retries for transient failures.
//!
//! ```text
//! AiCall ──► LlmRequest ──► with_backoff ──► Backend::complete ──► LlmResponse
//!                                                   │
//!                                  ┌────────────────┼───────────────┐
//!                             OllamaBackend    OpenAiBackend    MockBackend
//!                             /api/chat        /v1/chat/...     scripted
//! ```

pub mod backoff;
pub mod mock;
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;

pub use backoff::{BackoffConfig, JitterStrategy};
pub use mock::MockBackend;
pub use ollama::OllamaBackend;
#[cfg(feature = "openai")]
pub use openai::OpenAiBackend;

use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Invoked before each transport retry with `(attempt, delay, reason)`.
pub type RetryCallback<'a> = Option<&'a mut (dyn FnMut(u32, Duration, &str) + Send)>;

/// What shape of answer the provider should produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Ask the provider for a single JSON object.
    #[default]
    Structured,
    Text,
}

/// A provider-agnostic completion request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    /// User-turn text.
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub format: ResponseFormat,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.1,
            max_tokens: 2048,
            format: ResponseFormat::Structured,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A normalized provider answer.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub status: u16,
    pub token_usage: Option<TokenUsage>,
}

/// An AI provider.
///
/// Object safe; the parser holds one as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run one completion.
    async fn complete(&self, client: &Client, base_url: &str, request: &LlmRequest) -> Result<LlmResponse>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Transport failures worth another attempt: configured HTTP statuses and
/// connection-level errors.
pub fn is_retryable(error: &PipelineError, config: &BackoffConfig) -> bool {
    match error {
        PipelineError::HttpError { status, .. } => config.retryable_statuses.contains(status),
        PipelineError::Request(_) => true,
        _ => false,
    }
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// Call `backend` with transport-level retry.
///
/// Returns the first success, or the last error once retries run out or a
/// non-retryable error occurs. A `Retry-After` from the provider replaces
/// the computed delay when `config.respect_retry_after` is set.
pub async fn with_backoff(
    backend: &Arc<dyn Backend>,
    client: &Client,
    base_url: &str,
    request: &LlmRequest,
    config: &BackoffConfig,
    cancel: Option<&AtomicBool>,
    mut on_retry: RetryCallback<'_>,
) -> Result<LlmResponse> {
    let mut attempt = 0;
    loop {
        if is_cancelled(cancel) {
            return Err(PipelineError::Cancelled);
        }

        let error = match backend.complete(client, base_url, request).await {
            Ok(response) => return Ok(response),
            Err(e) if attempt < config.max_retries && is_retryable(&e, config) => e,
            Err(e) => return Err(e),
        };

        let delay = match &error {
            PipelineError::HttpError {
                retry_after: Some(ra), ..
            } if config.respect_retry_after => *ra,
            _ => config.delay_for_attempt(attempt),
        };
        attempt += 1;

        let reason = error.to_string();
        tracing::debug!(backend = backend.name(), attempt, ?delay, %reason, "transport retry");
        if let Some(cb) = on_retry.as_mut() {
            cb(attempt, delay, &reason);
        }
        tokio::time::sleep(delay).await;
    }
}

/// Integer-seconds `Retry-After` value.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Send a JSON POST and return the decoded body and status.
///
/// Non-success statuses become [`PipelineError::HttpError`] carrying the
/// body text and any `Retry-After`.
pub(crate) async fn send_json(builder: RequestBuilder, body: &Value) -> Result<(Value, u16)> {
    let resp = builder.json(body).send().await?;
    let status = resp.status().as_u16();

    if !resp.status().is_success() {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let text = resp.text().await.unwrap_or_default();
        return Err(PipelineError::HttpError {
            status,
            body: text,
            retry_after,
        });
    }

    Ok((resp.json().await?, status))
}
