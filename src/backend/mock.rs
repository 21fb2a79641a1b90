//! Scripted backend for tests and offline demos.
//!
//! ```
//! use loadtest_parser::backend::MockBackend;
//!
//! let mock = MockBackend::new(vec![r#"{"name": "smoke"}"#.to_string()]);
//! assert_eq!(mock.calls(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::PipelineError;

/// Replays a script of replies and failures in order, cycling when the
/// script runs out.
#[derive(Debug)]
pub struct MockBackend {
    script: Vec<Result<String>>,
    index: AtomicUsize,
    latency: Option<Duration>,
    seen: Mutex<Vec<LlmRequest>>,
}

impl MockBackend {
    /// Successful replies only.
    pub fn new(responses: Vec<String>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    /// Always the same reply.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Replies and failures, in order.
    ///
    /// An empty script behaves like a provider that never answers with
    /// anything useful: every call fails.
    pub fn scripted(script: Vec<Result<String>>) -> Self {
        Self {
            script,
            index: AtomicUsize::new(0),
            latency: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long before every reply.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of `complete` calls so far.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn next_reply(&self) -> Result<String> {
        let call = self.index.fetch_add(1, Ordering::Relaxed);
        if self.script.is_empty() {
            return Err(PipelineError::Other("mock backend has no scripted replies".into()));
        }
        match &self.script[call % self.script.len()] {
            Ok(text) => Ok(text.clone()),
            Err(e) => Err(replay(e)),
        }
    }
}

/// Rebuild a scripted error. Errors wrapping foreign sources replay as
/// [`PipelineError::Other`] with the same message.
fn replay(error: &PipelineError) -> PipelineError {
    match error {
        PipelineError::HttpError {
            status,
            body,
            retry_after,
        } => PipelineError::HttpError {
            status: *status,
            body: body.clone(),
            retry_after: *retry_after,
        },
        PipelineError::Timeout { ms } => PipelineError::Timeout { ms: *ms },
        PipelineError::Cancelled => PipelineError::Cancelled,
        PipelineError::InvalidConfig(msg) => PipelineError::InvalidConfig(msg.clone()),
        other => PipelineError::Other(other.to_string()),
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(&self, _client: &Client, _base_url: &str, request: &LlmRequest) -> Result<LlmResponse> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let text = self.next_reply()?;
        Ok(LlmResponse {
            text,
            status: 200,
            token_usage: None,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn call(mock: &MockBackend) -> Result<LlmResponse> {
        mock.complete(&Client::new(), "http://unused", &LlmRequest::new("m", "p")).await
    }

    #[tokio::test]
    async fn test_mock_cycles_responses() {
        let mock = MockBackend::new(vec!["first".into(), "second".into()]);
        assert_eq!(call(&mock).await.unwrap().text, "first");
        assert_eq!(call(&mock).await.unwrap().text, "second");
        assert_eq!(call(&mock).await.unwrap().text, "first");
        assert_eq!(mock.calls(), 3);
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_replays_errors() {
        let mock = MockBackend::scripted(vec![
            Err(PipelineError::HttpError {
                status: 429,
                body: "Rate limit exceeded".into(),
                retry_after: None,
            }),
            Ok("ok".into()),
        ]);
        let err = call(&mock).await.unwrap_err();
        assert!(matches!(err, PipelineError::HttpError { status: 429, .. }));
        assert_eq!(call(&mock).await.unwrap().text, "ok");
        assert!(call(&mock).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_script_always_fails() {
        let mock = MockBackend::scripted(Vec::new());
        assert!(call(&mock).await.is_err());
        assert_eq!(mock.calls(), 1);
    }
}
