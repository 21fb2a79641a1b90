//! Execution context shared by every parse.
//!
//! [`ExecCtx`] carries the HTTP client, AI backend, endpoint, model,
//! cancellation handle, optional event handler, and the process-wide
//! [`ConfigManager`] and [`ParsingMetricsCollector`]. Build it once at
//! startup and share it; each parse call reads from it without mutating
//! per-request state.

use crate::backend::{Backend, BackoffConfig, OllamaBackend};
#[cfg(feature = "openai")]
use crate::backend::OpenAiBackend;
use crate::config::ConfigManager;
use crate::events::EventHandler;
use crate::monitoring::ParsingMetricsCollector;
use reqwest::Client;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "llama3.2:3b";

/// Shared execution context for [`CommandParser`](crate::CommandParser).
///
/// # Example
///
/// ```
/// use loadtest_parser::ExecCtx;
///
/// let ctx = ExecCtx::builder("http://localhost:11434")
///     .model("qwen2.5:7b")
///     .build();
/// assert!(ctx.ai_enabled());
///
/// let offline = ExecCtx::builder("http://unused").without_ai().build();
/// assert!(!offline.ai_enabled());
/// ```
pub struct ExecCtx {
    /// HTTP client (cheap to clone -- uses `Arc` internally).
    pub client: Client,
    /// Base URL for the AI provider (e.g. `http://localhost:11434`).
    pub base_url: String,
    pub model: String,
    /// AI backend. `None` disables the AI path; parses go straight to the
    /// deterministic fallback.
    pub backend: Option<Arc<dyn Backend>>,
    /// Transport retry configuration. Default: [`BackoffConfig::none()`].
    pub backoff: BackoffConfig,
    pub config: Arc<ConfigManager>,
    pub metrics: Arc<ParsingMetricsCollector>,
    /// Optional cancellation flag, checked at stage boundaries.
    pub cancellation: Option<Arc<AtomicBool>>,
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    /// Create a new builder.
    pub fn builder(base_url: impl Into<String>) -> ExecCtxBuilder {
        ExecCtxBuilder {
            client: None,
            base_url: base_url.into(),
            model: None,
            backend: Some(Arc::new(OllamaBackend)),
            backoff: None,
            config: None,
            metrics: None,
            cancellation: None,
            event_handler: None,
            timeout: None,
        }
    }

    pub fn ai_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Return an error if cancellation has been requested.
    pub fn check_cancelled(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            return Err(crate::PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Get a reference to the cancellation AtomicBool, if set.
    pub fn cancel_flag(&self) -> Option<&AtomicBool> {
        self.cancellation.as_deref()
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .field("backoff", &self.backoff)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`ExecCtx`].
pub struct ExecCtxBuilder {
    client: Option<Client>,
    base_url: String,
    model: Option<String>,
    backend: Option<Arc<dyn Backend>>,
    backoff: Option<BackoffConfig>,
    config: Option<Arc<ConfigManager>>,
    metrics: Option<Arc<ParsingMetricsCollector>>,
    cancellation: Option<Arc<AtomicBool>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    timeout: Option<Duration>,
}

impl ExecCtxBuilder {
    /// Set the HTTP client. If not set, a default client is created.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the AI backend. Default: [`OllamaBackend`].
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Disable the AI path entirely.
    pub fn without_ai(mut self) -> Self {
        self.backend = None;
        self
    }

    /// Use the OpenAI-compatible backend with API key authentication.
    #[cfg(feature = "openai")]
    pub fn openai_with_key(mut self, api_key: impl Into<String>) -> Self {
        self.backend = Some(Arc::new(OpenAiBackend::new().with_api_key(api_key)));
        self
    }

    /// Set the transport retry configuration. Default: [`BackoffConfig::none()`].
    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = Some(config);
        self
    }

    /// Share a configuration manager. Default: a fresh one with defaults.
    pub fn config(mut self, config: Arc<ConfigManager>) -> Self {
        self.config = Some(config);
        self
    }

    /// Share a metrics collector. Default: a fresh one configured from the
    /// monitoring section.
    pub fn metrics(mut self, metrics: Arc<ParsingMetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the cancellation flag.
    pub fn cancellation(mut self, cancel: Option<Arc<AtomicBool>>) -> Self {
        self.cancellation = cancel;
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Set the HTTP client timeout. Default: 60 seconds.
    ///
    /// Ignored when a custom `Client` is provided via `.client()`. The
    /// per-call bound is `aiProvider.timeoutMs` regardless.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the execution context.
    pub fn build(self) -> ExecCtx {
        let timeout = self.timeout.unwrap_or(Duration::from_secs(60));
        let client = self.client.unwrap_or_else(|| {
            Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to build HTTP client, using defaults");
                Client::new()
            })
        });
        let config = self.config.unwrap_or_default();
        let metrics = self
            .metrics
            .unwrap_or_else(|| Arc::new(ParsingMetricsCollector::new(config.get_config().monitoring)));
        ExecCtx {
            client,
            base_url: normalize_base_url(&self.base_url),
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            backend: self.backend,
            backoff: self.backoff.unwrap_or_else(BackoffConfig::none),
            config,
            metrics,
            cancellation: self.cancellation,
            event_handler: self.event_handler,
        }
    }
}

/// Strip known provider path suffixes from a base URL.
/// This prevents double-pathing when backends append their own paths.
/// e.g., "https://api.openai.com/v1" -> "https://api.openai.com"
/// e.g., "http://localhost:11434/api" -> "http://localhost:11434"
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    // Longest first.
    for suffix in &["/v1/chat/completions", "/v1/chat", "/v1", "/api/generate", "/api/chat", "/api"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}
