//! Closed set of backend kinds and the kind → constructor mapping.
//!
//! Backend configuration is a tagged union rather than a duck-typed bag
//! of fields: each kind states up front what it needs and validation
//! happens before any adapter is built.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::providers::anthropic::AnthropicAdapter;
use crate::providers::gemini::GeminiAdapter;
use crate::providers::local::LocalAdapter;
use crate::providers::openai::OpenAiAdapter;
use crate::providers::ProviderAdapter;

/// Supported backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-compatible local inference engine; free, no credentials.
    Local,
    /// Hosted OpenAI-style chat completions service.
    OpenAi,
    /// Hosted Anthropic-style messages service.
    Anthropic,
    /// Hosted Gemini-style generateContent service.
    Gemini,
}

impl BackendKind {
    /// Whether this kind needs an API key to operate.
    pub fn requires_key(self) -> bool {
        !matches!(self, Self::Local)
    }

    /// Vendor base URL applied when the config leaves it empty. Local
    /// engines have no sensible default and must configure one.
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::Local => None,
            Self::OpenAi => Some(crate::providers::openai::DEFAULT_BASE_URL),
            Self::Anthropic => Some(crate::providers::anthropic::DEFAULT_BASE_URL),
            Self::Gemini => Some(crate::providers::gemini::DEFAULT_BASE_URL),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

/// Build the adapter for one validated backend config.
pub fn build_adapter(config: &BackendConfig) -> Result<Arc<dyn ProviderAdapter>, String> {
    config.validate()?;
    let base_url = config.resolved_base_url()?;
    let key = config.api_key.clone().unwrap_or_default();

    let adapter: Arc<dyn ProviderAdapter> = match config.kind {
        BackendKind::Local => Arc::new(LocalAdapter::new(
            &config.name,
            base_url,
            &config.default_model,
        )),
        BackendKind::OpenAi => Arc::new(OpenAiAdapter::new(
            &config.name,
            base_url,
            key,
            &config.default_model,
        )),
        BackendKind::Anthropic => Arc::new(AnthropicAdapter::new(
            &config.name,
            base_url,
            key,
            &config.default_model,
        )),
        BackendKind::Gemini => Arc::new(GeminiAdapter::new(
            &config.name,
            base_url,
            key,
            &config.default_model,
        )),
    };
    Ok(adapter)
}
