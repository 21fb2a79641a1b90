//! OpenAI-compatible chat completions (`/v1/chat/completions`).
//!
//! Works against OpenAI itself and the many servers that mirror its API
//! (vLLM, llama.cpp server, LM Studio, Groq, Ollama's `/v1/`).

use super::{send_json, Backend, LlmRequest, LlmResponse, ResponseFormat, TokenUsage};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Backend for any OpenAI-compatible API.
///
/// ```
/// use loadtest_parser::backend::OpenAiBackend;
///
/// let backend = OpenAiBackend::new().with_api_key("sk-test");
/// assert!(backend.has_api_key());
/// ```
#[derive(Clone, Default)]
pub struct OpenAiBackend {
    api_key: Option<String>,
    organization: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = self.api_key.as_ref().map(|k| match k.get(..6) {
            Some(prefix) if k.len() > 6 => format!("{}***", prefix),
            _ => "***".to_string(),
        });
        f.debug_struct("OpenAiBackend")
            .field("api_key", &redacted)
            .field("organization", &self.organization)
            .finish()
    }
}

impl OpenAiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sent as `Authorization: Bearer {key}`.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sent as `OpenAI-Organization`.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn build_body(request: &LlmRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false,
        });
        if request.format == ResponseFormat::Structured {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    fn token_usage(resp: &Value) -> Option<TokenUsage> {
        let usage = resp.get("usage")?;
        Some(TokenUsage {
            prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
        })
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(&self, client: &Client, base_url: &str, request: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));

        let mut builder = client.post(&url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org.as_str());
        }

        let (resp, status) = send_json(builder, &Self::build_body(request)).await?;
        let text = resp
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(LlmResponse {
            text,
            status,
            token_usage: Self::token_usage(&resp),
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_shape() {
        let mut request = LlmRequest::new("gpt-4o-mini", "curl https://a.test");
        request.system_prompt = Some("Emit JSON.".into());
        let body = OpenAiBackend::build_body(&request);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 2048);
    }

    #[test]
    fn test_text_format_has_no_response_format() {
        let mut request = LlmRequest::new("m", "p");
        request.format = ResponseFormat::Text;
        let body = OpenAiBackend::build_body(&request);
        assert!(body.get("response_format").is_none());
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_debug_redacts_key() {
        let backend = OpenAiBackend::new().with_api_key("sk-abcdefghijkl");
        let debug = format!("{:?}", backend);
        assert!(debug.contains("sk-abc***"));
        assert!(!debug.contains("ghijkl"));
    }

    #[test]
    fn test_token_usage() {
        let resp = json!({"usage": {"prompt_tokens": 5, "completion_tokens": 9}});
        assert_eq!(
            OpenAiBackend::token_usage(&resp),
            Some(TokenUsage {
                prompt_tokens: 5,
                completion_tokens: 9
            })
        );
    }
}
