//! Routing configuration: backend declarations plus chain and cache
//! options. Construction-time only — nothing here is consulted after the
//! router is built.

use serde::{Deserialize, Serialize};

use crate::registry::BackendKind;

pub const ENV_LOCAL_URL: &str = "ADVISOR_LOCAL_URL";
pub const ENV_LOCAL_MODEL: &str = "ADVISOR_LOCAL_MODEL";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_DEFAULT_BACKEND: &str = "ADVISOR_DEFAULT_BACKEND";
pub const ENV_FALLBACKS: &str = "ADVISOR_FALLBACKS";
pub const ENV_CACHE_TTL_SECS: &str = "ADVISOR_CACHE_TTL_SECS";

/// One backend declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique name used in chain config, metrics, and health maps.
    pub name: String,
    pub kind: BackendKind,
    /// Omitted for hosted kinds to use the vendor default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub default_model: String,
    /// In-flight cap enforced by the guard layer.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Deadline for one backend call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    120
}

impl BackendConfig {
    pub fn local(
        name: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: BackendKind::Local,
            base_url: Some(base_url.into()),
            api_key: None,
            default_model: default_model.into(),
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn hosted(
        name: impl Into<String>,
        kind: BackendKind,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            base_url: None,
            api_key: Some(api_key.into()),
            default_model: default_model.into(),
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("backend name must not be empty".into());
        }
        if self.default_model.trim().is_empty() {
            return Err(format!("backend '{}' has no default model", self.name));
        }
        if self.kind.requires_key() && self.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(format!(
                "backend '{}' ({}) requires an API key",
                self.name, self.kind
            ));
        }
        self.resolved_base_url().map(|_| ())
    }

    /// Configured base URL or the vendor default.
    pub fn resolved_base_url(&self) -> Result<String, String> {
        match (&self.base_url, self.kind.default_base_url()) {
            (Some(url), _) if !url.trim().is_empty() => Ok(url.clone()),
            (_, Some(default)) => Ok(default.to_string()),
            _ => Err(format!(
                "backend '{}' ({}) requires a base URL",
                self.name, self.kind
            )),
        }
    }
}

/// Router-level configuration: which backends exist and in what fallback
/// order, plus cache behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub backends: Vec<BackendConfig>,
    /// First position in the fallback chain.
    pub default_backend: String,
    /// Explicit fallbacks after the default; remaining registered
    /// backends are appended after these.
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for RoutingConfig {
    /// Environment-driven default: the local engine is always registered;
    /// each hosted vendor joins the chain when its API key is present.
    fn default() -> Self {
        let mut backends = vec![BackendConfig::local(
            "local",
            std::env::var(ENV_LOCAL_URL).unwrap_or_else(|_| "http://localhost:8080/v1".into()),
            std::env::var(ENV_LOCAL_MODEL).unwrap_or_else(|_| "qwen3-8b".into()),
        )];
        let mut fallbacks = Vec::new();

        if let Ok(key) = std::env::var(ENV_OPENAI_API_KEY) {
            backends.push(BackendConfig::hosted(
                "openai",
                BackendKind::OpenAi,
                key,
                "gpt-4o-mini",
            ));
            fallbacks.push("openai".to_string());
        }
        if let Ok(key) = std::env::var(ENV_ANTHROPIC_API_KEY) {
            backends.push(BackendConfig::hosted(
                "anthropic",
                BackendKind::Anthropic,
                key,
                "claude-sonnet-4",
            ));
            fallbacks.push("anthropic".to_string());
        }
        if let Ok(key) = std::env::var(ENV_GEMINI_API_KEY) {
            backends.push(BackendConfig::hosted(
                "gemini",
                BackendKind::Gemini,
                key,
                "gemini-2.5-flash",
            ));
            fallbacks.push("gemini".to_string());
        }

        let default_backend =
            std::env::var(ENV_DEFAULT_BACKEND).unwrap_or_else(|_| "local".into());
        if let Ok(list) = std::env::var(ENV_FALLBACKS) {
            fallbacks = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        let cache_ttl_secs = std::env::var(ENV_CACHE_TTL_SECS)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_cache_ttl_secs);

        Self {
            backends,
            default_backend,
            fallbacks,
            cache_enabled: true,
            cache_ttl_secs,
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.backends.is_empty() {
            return Err("at least one backend must be configured".into());
        }
        for backend in &self.backends {
            backend.validate()?;
        }
        let mut seen = std::collections::HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend.name.as_str()) {
                return Err(format!("duplicate backend name '{}'", backend.name));
            }
        }
        if !self.backends.iter().any(|b| b.name == self.default_backend) {
            return Err(format!(
                "default backend '{}' is not a configured backend",
                self.default_backend
            ));
        }
        for name in &self.fallbacks {
            if !self.backends.iter().any(|b| &b.name == name) {
                return Err(format!("fallback '{name}' is not a configured backend"));
            }
        }
        Ok(())
    }

    /// Backend names in fallback-chain order: the default first, then the
    /// explicit fallbacks (deduplicated), then remaining registered
    /// backends in declaration order.
    pub fn chain_order(&self) -> Vec<String> {
        let mut order = vec![self.default_backend.clone()];
        for name in &self.fallbacks {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }
        for backend in &self.backends {
            if !order.contains(&backend.name) {
                order.push(backend.name.clone());
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RoutingConfig {
        RoutingConfig {
            backends: vec![
                BackendConfig::local("local", "http://localhost:8080/v1", "qwen3-8b"),
                BackendConfig::hosted("openai", BackendKind::OpenAi, "sk", "gpt-4o-mini"),
                BackendConfig::hosted("gemini", BackendKind::Gemini, "sk", "gemini-2.5-flash"),
                BackendConfig::hosted("anthropic", BackendKind::Anthropic, "sk", "claude-sonnet-4"),
            ],
            default_backend: "anthropic".into(),
            fallbacks: vec!["local".into(), "anthropic".into()],
            cache_enabled: true,
            cache_ttl_secs: 300,
        }
    }

    #[test]
    fn test_chain_order_default_then_fallbacks_then_rest() {
        // "anthropic" appears in fallbacks too and must not repeat.
        assert_eq!(
            config().chain_order(),
            vec!["anthropic", "local", "openai", "gemini"]
        );
    }

    #[test]
    fn test_validate_accepts_good_config() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_default() {
        let mut config = config();
        config.default_backend = "nope".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut config = config();
        config
            .backends
            .push(BackendConfig::local("local", "http://other:8080/v1", "m"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_keyless_hosted_backend() {
        let mut config = config();
        config.backends[1].api_key = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let text = r#"
            default_backend = "local"
            fallbacks = ["openai"]

            [[backends]]
            name = "local"
            kind = "local"
            base_url = "http://localhost:8080/v1"
            default_model = "qwen3-8b"

            [[backends]]
            name = "openai"
            kind = "openai"
            api_key = "sk-test"
            default_model = "gpt-4o-mini"
        "#;
        let config: RoutingConfig = toml::from_str(text).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.backends[0].max_concurrent, 4);
        assert_eq!(config.cache_ttl_secs, 300);
        assert!(config.cache_enabled);
    }
}
