//! Adapter for a hosted Anthropic-style messages service. System prompts
//! travel in a dedicated `system` field and streaming uses typed SSE
//! events rather than a `[DONE]` sentinel.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;

use crate::error::{RejectKind, RouteError};
use crate::providers::{ProviderAdapter, StreamHandle};
use crate::types::{ChatRequest, ChatResponse, Role, TokenUsage};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AnthropicAdapter {
    name: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_model: default_model.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
        }
    }

    /// System messages move into the `system` field; the messages array
    /// carries only user/assistant turns.
    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({"role": m.role.to_string(), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }
        body
    }

    async fn post(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, RouteError> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.build_body(request, stream))
            .send()
            .await
            .map_err(|e| RouteError::unavailable(&self.name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let kind = RejectKind::from_status_and_body(status.as_u16(), &body);
            return Err(RouteError::rejected(
                &self.name,
                kind,
                format!("{status}: {body}"),
            ));
        }
        Ok(response)
    }
}

/// Extract content, resolved model, and usage from a messages-API body.
pub(crate) fn parse_message(
    body: &serde_json::Value,
    requested_model: &str,
) -> (String, String, Option<TokenUsage>) {
    let content = body["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    let model = body["model"]
        .as_str()
        .unwrap_or(requested_model)
        .to_string();
    let usage = body["usage"].as_object().map(|u| {
        TokenUsage::new(
            u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        )
    });
    (content, model, usage)
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn check(&self) -> Result<(), String> {
        if self.api_key.is_empty() {
            return Err("API key not configured".into());
        }
        let url = format!("{}/v1/models", self.base_url);
        match self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(format!("probe returned {}", resp.status())),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, RouteError> {
        let started = Instant::now();
        let response = self.post(request, false).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RouteError::rejected(&self.name, RejectKind::Other, e.to_string()))?;

        let (content, model, usage) = parse_message(&body, &request.model);
        Ok(ChatResponse {
            content,
            model,
            provider: self.name.clone(),
            usage,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn stream(&self, request: &ChatRequest) -> Result<StreamHandle, RouteError> {
        let started = Instant::now();
        let response = self.post(request, true).await?;

        let (producer, handle) = StreamHandle::channel();
        let provider = self.name.clone();
        let requested_model = request.model.clone();
        tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();
            let mut content = String::new();
            let mut model = requested_model;
            let mut prompt_tokens = 0u32;
            let mut completion_tokens = 0u32;

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        producer.resolve(Err(RouteError::rejected(
                            &provider,
                            RejectKind::Other,
                            format!("stream decode error: {e}"),
                        )));
                        return;
                    }
                };
                let data: serde_json::Value = match serde_json::from_str(&event.data) {
                    Ok(value) => value,
                    Err(_) => continue,
                };
                match data["type"].as_str() {
                    Some("message_start") => {
                        if let Some(served) = data["message"]["model"].as_str() {
                            model = served.to_string();
                        }
                        prompt_tokens = data["message"]["usage"]["input_tokens"]
                            .as_u64()
                            .unwrap_or(0) as u32;
                    }
                    Some("content_block_delta") => {
                        if let Some(text) = data["delta"]["text"].as_str() {
                            content.push_str(text);
                            if !producer.send_chunk(text.to_string()).await {
                                producer.resolve(Err(RouteError::rejected(
                                    &provider,
                                    RejectKind::Other,
                                    "stream cancelled by consumer",
                                )));
                                return;
                            }
                        }
                    }
                    Some("message_delta") => {
                        if let Some(out) = data["usage"]["output_tokens"].as_u64() {
                            completion_tokens = out as u32;
                        }
                    }
                    Some("message_stop") => break,
                    _ => {}
                }
            }

            producer.resolve(Ok(ChatResponse {
                content,
                model,
                provider,
                usage: Some(TokenUsage::new(prompt_tokens, completion_tokens)),
                latency_ms: started.elapsed().as_millis() as u64,
            }));
        });

        Ok(handle)
    }
}
