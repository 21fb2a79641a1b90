//! One bounded call to the AI provider.
//!
//! [`AiCall`] turns an [`EnhancedPrompt`] into an [`LlmRequest`], sends it
//! through [`backend::with_backoff`] and bounds the whole exchange,
//! transport retries included, by `aiProvider.timeoutMs`.

use crate::{
    backend::{self, LlmRequest, LlmResponse, ResponseFormat},
    config::AiProviderConfig,
    error::Result,
    events::{emit, Event},
    exec_ctx::ExecCtx,
    prompt::EnhancedPrompt,
    PipelineError,
};
use std::time::Duration;

/// Temperature drop per prompt-enhancement attempt.
pub const TEMPERATURE_STEP: f64 = 0.2;

/// Parameters for AI calls, derived from the `aiProvider` section.
///
/// # Example
///
/// ```
/// use loadtest_parser::config::AiProviderConfig;
/// use loadtest_parser::llm_call::AiCall;
///
/// let call = AiCall::from_config("llama3.2:3b", &AiProviderConfig::default());
/// assert_eq!(call.cooled_temperature(0), 0.1);
/// assert_eq!(call.cooled_temperature(1), 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct AiCall {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Raw provider answer plus transport bookkeeping.
#[derive(Debug, Clone)]
pub struct AiOutput {
    pub response: LlmResponse,
    pub transport_retries: u32,
    pub backoff_total_ms: u64,
}

impl AiCall {
    pub fn from_config(model: impl Into<String>, config: &AiProviderConfig) -> Self {
        Self {
            model: model.into(),
            temperature: config.temperature,
            max_tokens: 2048,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Configured temperature minus [`TEMPERATURE_STEP`] per enhancement,
    /// never below zero.
    pub fn cooled_temperature(&self, enhancements: u32) -> f64 {
        (self.temperature - TEMPERATURE_STEP * f64::from(enhancements)).max(0.0)
    }

    /// Build the request for `input`. `enhancements` counts prior
    /// prompt-enhancement attempts.
    pub fn build_request(&self, prompt: &EnhancedPrompt, input: &str, enhancements: u32) -> LlmRequest {
        LlmRequest {
            model: self.model.clone(),
            prompt: prompt.user_prompt(input),
            system_prompt: (!prompt.system_prompt.is_empty()).then(|| prompt.system_prompt.clone()),
            temperature: self.cooled_temperature(enhancements),
            max_tokens: self.max_tokens,
            format: ResponseFormat::Structured,
        }
    }

    /// Send `request` through the context's backend.
    ///
    /// Fails with [`PipelineError::Timeout`] when the provider does not
    /// answer within the configured timeout, and with
    /// [`PipelineError::Other`] when the context has no backend.
    pub async fn execute(&self, ctx: &ExecCtx, request: &LlmRequest, attempt_id: &str) -> Result<AiOutput> {
        ctx.check_cancelled()?;
        let ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        match tokio::time::timeout(self.timeout, self.call_backend(ctx, request, attempt_id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(attempt_id, timeout_ms = ms, model = %self.model, "AI call timed out");
                Err(PipelineError::Timeout { ms })
            }
        }
    }

    /// Execute via the backend, emitting retry events and tracking transport retries.
    async fn call_backend(&self, ctx: &ExecCtx, request: &LlmRequest, attempt_id: &str) -> Result<AiOutput> {
        let Some(backend) = ctx.backend.as_ref() else {
            return Err(PipelineError::Other("AI provider disabled".into()));
        };
        let mut transport_retries: u32 = 0;
        let mut backoff_total_ms: u64 = 0;
        let id = attempt_id.to_string();
        let event_handler = ctx.event_handler.clone();

        let mut on_retry = |attempt: u32, delay: Duration, reason: &str| {
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            transport_retries = attempt;
            backoff_total_ms += delay_ms;
            emit(
                &event_handler,
                Event::TransportRetry {
                    attempt_id: id.clone(),
                    attempt,
                    delay_ms,
                    reason: reason.to_string(),
                },
            );
        };

        tracing::debug!(attempt_id, backend = backend.name(), model = %request.model, "calling AI provider");
        let response = backend::with_backoff(
            backend,
            &ctx.client,
            &ctx.base_url,
            request,
            &ctx.backoff,
            ctx.cancel_flag(),
            Some(&mut on_retry),
        )
        .await?;

        Ok(AiOutput {
            response,
            transport_retries,
            backoff_total_ms,
        })
    }
}
