use std::time::{Duration, Instant};

use async_trait::async_trait;
use insight_config::Llm;
use insight_contracts::{
    ChatMessage, CompletionRequest, CompletionResult, ResponseFormat, TokenUsage,
};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("missing credential: no API key configured")]
    MissingCredential,
    #[error("upstream returned HTTP {status}")]
    Upstream { status: u16 },
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream response is not valid JSON: {0}")]
    Decode(String),
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// False when no credential is configured; callers skip the call entirely.
    fn has_credential(&self) -> bool;

    async fn call(&self, request: &CompletionRequest) -> Result<CompletionResult, ClientError>;
}

#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    response_format: Value,
    messages: &'a [ChatMessage],
}

impl HttpCompletionClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn from_config(llm: &Llm) -> Result<Self, String> {
        Self::new(
            &llm.base_url,
            llm.api_key.clone(),
            Duration::from_millis(llm.timeout_ms),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    async fn call(&self, request: &CompletionRequest) -> Result<CompletionResult, ClientError> {
        let api_key = self.api_key.as_deref().ok_or(ClientError::MissingCredential)?;

        let body = ChatCompletionBody {
            model: &request.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: match request.response_format {
                ResponseFormat::Json => json!({"type": "json_object"}),
                ResponseFormat::Text => json!({"type": "text"}),
            },
            messages: &request.messages,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(status = %status, model = %request.model, "completion response received");
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %text, "completion request rejected upstream");
            return Err(ClientError::Upstream {
                status: status.as_u16(),
            });
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        Ok(CompletionResult {
            content: raw
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(str::to_string),
            model: raw.get("model").and_then(Value::as_str).map(str::to_string),
            usage: raw.get("usage").map(parse_usage),
            raw,
            elapsed_ms,
        })
    }
}

fn parse_usage(usage: &Value) -> TokenUsage {
    let count = |key: &str| {
        usage
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(0)
    };
    TokenUsage {
        prompt_tokens: count("prompt_tokens"),
        completion_tokens: count("completion_tokens"),
        total_tokens: count("total_tokens"),
    }
}
