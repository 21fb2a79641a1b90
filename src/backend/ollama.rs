//! Ollama's native API.

use super::{send_json, Backend, LlmRequest, LlmResponse, ResponseFormat, TokenUsage};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Backend for a local or remote Ollama server.
///
/// Requests with a system prompt go to `/api/chat`; prompt-only requests go
/// to `/api/generate`. Structured requests set `"format": "json"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaBackend;

impl OllamaBackend {
    fn use_chat(request: &LlmRequest) -> bool {
        request.system_prompt.as_ref().is_some_and(|s| !s.is_empty())
    }

    fn build_body(request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });
        match &request.system_prompt {
            Some(system) if !system.is_empty() => {
                body["messages"] = json!([
                    {"role": "system", "content": system},
                    {"role": "user", "content": request.prompt},
                ]);
            }
            _ => body["prompt"] = json!(request.prompt),
        }
        if request.format == ResponseFormat::Structured {
            body["format"] = json!("json");
        }
        body
    }

    fn token_usage(resp: &Value) -> Option<TokenUsage> {
        let prompt = resp.get("prompt_eval_count").and_then(Value::as_u64);
        let completion = resp.get("eval_count").and_then(Value::as_u64);
        if prompt.is_none() && completion.is_none() {
            return None;
        }
        Some(TokenUsage {
            prompt_tokens: prompt.unwrap_or(0),
            completion_tokens: completion.unwrap_or(0),
        })
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn complete(&self, client: &Client, base_url: &str, request: &LlmRequest) -> Result<LlmResponse> {
        let base = base_url.trim_end_matches('/');
        let chat = Self::use_chat(request);
        let url = if chat {
            format!("{}/api/chat", base)
        } else {
            format!("{}/api/generate", base)
        };

        let (resp, status) = send_json(client.post(&url), &Self::build_body(request)).await?;

        let text = if chat {
            resp.pointer("/message/content")
        } else {
            resp.get("response")
        }
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
        "ollama"
    }
}
