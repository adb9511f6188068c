//! Adapter for a hosted OpenAI-style chat completions service (Bearer
//! auth, `[DONE]` SSE sentinel). Shares the wire parsers with the local
//! adapter since the formats match.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;

use crate::error::{RejectKind, RouteError};
use crate::providers::local::{delta_text, parse_completion};
use crate::providers::{ProviderAdapter, StreamHandle};
use crate::types::{ChatRequest, ChatResponse, TokenUsage};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OpenAiAdapter {
    name: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiAdapter {
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

    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": stream,
        });
        if stream {
            // Ask for the usage chunk so the final response can carry
            // token counts.
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    async fn post(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, RouteError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
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
        let url = format!("{}/models", self.base_url);
        match self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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

        let (content, model, usage) = parse_completion(&body, &request.model);
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
            let mut usage = None;

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
                if event.data.trim() == "[DONE]" {
                    break;
                }
                let chunk: serde_json::Value = match serde_json::from_str(&event.data) {
                    Ok(value) => value,
                    Err(_) => continue,
                };
                if let Some(served) = chunk["model"].as_str() {
                    model = served.to_string();
                }
                if let Some(u) = chunk["usage"].as_object() {
                    usage = Some(TokenUsage::new(
                        u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                        u.get("completion_tokens")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0) as u32,
                    ));
                }
                if let Some(text) = delta_text(&chunk) {
                    content.push_str(&text);
                    if !producer.send_chunk(text).await {
                        producer.resolve(Err(RouteError::rejected(
                            &provider,
                            RejectKind::Other,
                            "stream cancelled by consumer",
                        )));
                        return;
                    }
                }
            }

            producer.resolve(Ok(ChatResponse {
                content,
                model,
                provider,
                usage,
                latency_ms: started.elapsed().as_millis() as u64,
            }));
        });

        Ok(handle)
    }
}
