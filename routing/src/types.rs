//! Request/response contract shared by every backend adapter, plus the
//! health and metrics records the router maintains per backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role tag for one conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One role-tagged message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Declaration of a tool the model may request, passed through to backends
/// that support function calling. Opaque to the routing layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

/// A completion request. Immutable once dispatched; the router clones it
/// when it has to substitute a fallback adapter's default model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Requested model identifier. Only honored verbatim by the first
    /// adapter in the fallback chain; later adapters use their own default.
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDecl>>,
    /// Set by the streaming path; streaming requests never touch the cache.
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.2,
            max_tokens: 1024,
            tools: None,
            stream: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token accounting as reported by a backend, when it reports any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A completed response. Produced exactly once per attempt that finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    /// Model that actually served the request. May differ from the
    /// requested model after fallback or an unknown-model retry.
    pub model: String,
    /// Name of the adapter that served the request.
    pub provider: String,
    pub usage: Option<TokenUsage>,
    pub latency_ms: u64,
}

/// On-demand availability probe result for one backend.
///
/// Ephemeral: recomputed every time it is asked for, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub available: bool,
    /// Wall-clock time the probe took.
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ProviderHealth {
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            available: true,
            latency_ms,
            error: None,
        }
    }

    pub fn unavailable(latency_ms: u64, reason: impl Into<String>) -> Self {
        Self {
            available: false,
            latency_ms,
            error: Some(reason.into()),
        }
    }
}

/// Per-backend dispatch counters. Owned and mutated only by the router;
/// callers get cloned snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub provider: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_cost_usd: f64,
    /// Moving average over successful responses only.
    pub avg_latency_ms: u64,
    pub last_used: Option<DateTime<Utc>>,
}

impl ProviderMetrics {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            total_requests: 0,
            successes: 0,
            failures: 0,
            total_cost_usd: 0.0,
            avg_latency_ms: 0,
            last_used: None,
        }
    }

    /// Fold a successful response into the counters. The latency average
    /// is weighted over prior successes; failures never touch it.
    pub fn record_success(&mut self, latency_ms: u64, cost_usd: f64) {
        self.avg_latency_ms =
            (self.avg_latency_ms * self.successes + latency_ms) / (self.successes + 1);
        self.successes += 1;
        self.total_requests += 1;
        self.total_cost_usd += cost_usd;
        self.last_used = Some(Utc::now());
    }

    /// Count a failed attempt. Latency average is left untouched.
    pub fn record_failure(&mut self) {
        self.failures += 1;
        self.total_requests += 1;
        self.last_used = Some(Utc::now());
    }

    /// Success rate over all attempts, 1.0 when nothing was attempted.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successes as f64 / self.total_requests as f64
        }
    }
}
