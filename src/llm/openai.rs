//! OpenAI 兼容 Chat Completions 客户端
//!
//! 直接用 reqwest 调用 `{base_url}/chat/completions`，请求 `response_format = json_schema`；
//! 需要原始 HTTP 状态码来区分 429 / 5xx / 其它 4xx。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::{LlmClient, LlmError, StructuredRequest};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    strict_schema: bool,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            api_key,
            strict_schema: false,
            usage: TokenUsage::default(),
        }
    }

    /// 开启 strict schema（要求 schema 满足上游 strict 模式约束）
    pub fn with_strict_schema(mut self, strict: bool) -> Self {
        self.strict_schema = strict;
        self
    }

    fn request_body(&self, request: &StructuredRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.instructions },
                { "role": "user", "content": request.payload },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "schema": request.schema,
                    "strict": self.strict_schema,
                }
            }
        })
    }
}

fn classify_status(status: reqwest::StatusCode, retry_after: Option<u64>, body: String) -> LlmError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        LlmError::RateLimited {
            retry_after_ms: retry_after.map(|s| s * 1000),
        }
    } else {
        LlmError::Status {
            status: status.as_u16(),
            message: body,
        }
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Transport(e.to_string())
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete_structured(&self, request: &StructuredRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, body));
        }

        let parsed: ChatResponse = resp.json().await.map_err(transport_error)?;

        if let Some(usage) = &parsed.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }

        let message = parsed.choices.into_iter().next().map(|c| c.message);
        match message {
            Some(ChatMessage { content: Some(content), .. }) => Ok(content),
            Some(ChatMessage { refusal: Some(refusal), .. }) => {
                tracing::warn!("Reasoning backend refused: {}", refusal);
                Ok(String::new())
            }
            _ => Ok(String::new()),
        }
    }

    fn name(&self) -> &str {
        &self.model
    }

    fn token_usage(&self) -> Option<(u64, u64)> {
        Some(self.usage.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        let err = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, Some(2), String::new());
        assert_eq!(err, LlmError::RateLimited { retry_after_ms: Some(2000) });
        assert!(err.is_retriable());
    }

    #[test]
    fn test_token_usage_accumulates() {
        let client = OpenAiClient::new(Some("http://localhost:1/v1/"), "gpt-4o-mini", Some("sk-test"));
        assert_eq!(client.token_usage(), Some((0, 0)));
        client.usage.add(120, 30);
        client.usage.add(80, 20);
        assert_eq!(client.token_usage(), Some((200, 50)));
    }

    #[test]
    fn test_classify_client_error() {
        let err = classify_status(reqwest::StatusCode::UNAUTHORIZED, None, "bad key".into());
        assert!(matches!(err, LlmError::Status { status: 401, .. }));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_request_body_shape() {
        let client = OpenAiClient::new(Some("http://localhost:9/v1/"), "gpt-4o-mini", Some("k"));
        let body = client.request_body(&StructuredRequest {
            instructions: "sys".into(),
            payload: "{}".into(),
            schema_name: "turn".into(),
            schema: serde_json::json!({"type": "object"}),
        });
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(client.base_url, "http://localhost:9/v1");
    }
}
