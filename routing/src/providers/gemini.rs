//! Adapter for a hosted Gemini-style generateContent service. The key
//! travels in the URL, assistant turns are role `model`, and streaming
//! uses `:streamGenerateContent?alt=sse`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;

use crate::error::{RejectKind, RouteError};
use crate::providers::{ProviderAdapter, StreamHandle};
use crate::types::{ChatRequest, ChatResponse, Role, TokenUsage};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct GeminiAdapter {
    name: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl GeminiAdapter {
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

    fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let contents: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                serde_json::json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });
        if !system.is_empty() {
            body["systemInstruction"] =
                serde_json::json!({"parts": [{"text": system.join("\n\n")}]});
        }
        body
    }

    async fn post(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, RouteError> {
        let verb = if stream {
            "streamGenerateContent?alt=sse&key="
        } else {
            "generateContent?key="
        };
        let url = format!(
            "{}/v1beta/models/{}:{}{}",
            self.base_url, request.model, verb, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&self.build_body(request))
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

/// Extract content and usage from a generateContent body. The body never
/// echoes a model identifier, so the requested one stands.
pub(crate) fn parse_candidate(body: &serde_json::Value) -> (String, Option<TokenUsage>) {
    let content = body["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    let usage = body["usageMetadata"].as_object().map(|u| {
        TokenUsage::new(
            u.get("promptTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            u.get("candidatesTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
        )
    });
    (content, usage)
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
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
        let url = format!("{}/v1beta/models?key={}", self.base_url, self.api_key);
        match self
            .client
            .get(&url)
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

        let (content, usage) = parse_candidate(&body);
        Ok(ChatResponse {
            content,
            model: request.model.clone(),
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
        let model = request.model.clone();
        tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();
            let mut content = String::new();
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
                let data: serde_json::Value = match serde_json::from_str(&event.data) {
                    Ok(value) => value,
                    Err(_) => continue,
                };
                let (text, chunk_usage) = parse_candidate(&data);
                if chunk_usage.is_some() {
                    usage = chunk_usage;
                }
                if !text.is_empty() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn adapter() -> GeminiAdapter {
        GeminiAdapter::new("gemini", DEFAULT_BASE_URL, "key", "gemini-2.5-flash")
    }

    #[test]
    fn test_assistant_role_maps_to_model() {
        let req = ChatRequest::new(
            "gemini-2.5-flash",
            vec![
                Message::system("be terse"),
                Message::user("hi"),
                Message::assistant("hello"),
            ],
        );
        let body = adapter().build_body(&req);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
    }

    #[test]
    fn test_generation_config_carries_sampling() {
        let req = ChatRequest::new("gemini-2.5-flash", vec![Message::user("hi")])
            .with_temperature(0.7)
            .with_max_tokens(256);
        let body = adapter().build_body(&req);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn test_parse_candidate_body() {
        let body = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "42"}]}}],
            "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 1},
        });
        let (content, usage) = parse_candidate(&body);
        assert_eq!(content, "42");
        assert_eq!(usage, Some(TokenUsage::new(9, 1)));
    }

    #[tokio::test]
    async fn test_missing_key_probes_false_without_network() {
        let adapter = GeminiAdapter::new("gemini", DEFAULT_BASE_URL, "", "gemini-2.5-flash");
        assert!(!adapter.is_available().await);
    }
}
