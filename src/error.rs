use crate::recovery::ParseError;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the parser pipeline and its collaborators.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Low-level HTTP transport failure (connection refused, DNS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations when
    /// the provider returns a non-success status code.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// The AI provider did not answer within `aiProvider.timeoutMs`.
    #[error("AI request timeout after {ms}ms")]
    Timeout { ms: u64 },

    /// The parse was cancelled via the cancellation flag.
    #[error("parse was cancelled")]
    Cancelled,

    /// Invalid configuration detected on load or update.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Every recovery strategy failed, or the retry ceiling was hit.
    ///
    /// Carries the last classified [`ParseError`]; the confidence of a
    /// terminal failure is always zero.
    #[error("parsing failed after recovery ({}): {error}", recovery_path.join(" -> "))]
    Exhausted {
        error: Box<ParseError>,
        recovery_path: Vec<String>,
    },

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// The classified parse error behind a terminal failure, if any.
    pub fn parse_error(&self) -> Option<&ParseError> {
        match self {
            PipelineError::Exhausted { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
