//! Error taxonomy for the routing layer.
//!
//! The chain walk in the router never inspects error message text. Adapters
//! translate wire-level failures into a structured [`RejectKind`] at the
//! edge, where status codes and response bodies are still visible, and the
//! router branches on the kind alone.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured classification of a backend rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectKind {
    /// The requested model is unknown to this backend. The router retries
    /// once on the same adapter with its default model when this happens
    /// at the first chain position.
    UnknownModel,
    /// Rate limit or quota exceeded.
    Quota,
    /// The backend considered the request malformed.
    InvalidPayload,
    /// Anything else the backend reported.
    Other,
}

impl RejectKind {
    /// Classify an HTTP error response. Bodies are consulted because some
    /// backends report unknown models as 400 with a prose message rather
    /// than 404.
    pub fn from_status_and_body(status: u16, body: &str) -> Self {
        if status == 404 {
            return Self::UnknownModel;
        }
        if status == 429 {
            return Self::Quota;
        }
        let lower = body.to_lowercase();
        if lower.contains("model") && (lower.contains("not found") || lower.contains("404")) {
            return Self::UnknownModel;
        }
        if (400..500).contains(&status) {
            Self::InvalidPayload
        } else {
            Self::Other
        }
    }
}

impl std::fmt::Display for RejectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownModel => write!(f, "unknown model"),
            Self::Quota => write!(f, "quota exceeded"),
            Self::InvalidPayload => write!(f, "invalid payload"),
            Self::Other => write!(f, "request failed"),
        }
    }
}

/// Failures surfaced by adapters and the router.
///
/// Inside the fallback chain every per-adapter variant means "record the
/// failure and move to the next adapter"; only [`RouteError::NoProviderAvailable`]
/// escapes `ProviderRouter::complete`.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("provider '{provider}' timed out after {waited_ms}ms")]
    Timeout { provider: String, waited_ms: u64 },

    #[error("provider '{provider}' rejected the request ({kind}): {message}")]
    RequestFailed {
        provider: String,
        kind: RejectKind,
        message: String,
    },

    #[error("all {attempts} providers in the fallback chain failed; last error: {last}")]
    NoProviderAvailable { attempts: usize, last: String },
}

impl RouteError {
    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(provider: impl Into<String>, waited_ms: u64) -> Self {
        Self::Timeout {
            provider: provider.into(),
            waited_ms,
        }
    }

    pub fn rejected(provider: impl Into<String>, kind: RejectKind, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    /// The adapter this error came from, when it came from one.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::ProviderUnavailable { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::RequestFailed { provider, .. } => Some(provider),
            Self::NoProviderAvailable { .. } => None,
        }
    }

    /// Whether a later attempt could plausibly succeed. Unavailability and
    /// timeouts are transient; quota clears over time; an exhausted chain
    /// leaves nothing in an inconsistent state, so callers may retry it
    /// wholesale.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderUnavailable { .. } | Self::Timeout { .. } => true,
            Self::RequestFailed { kind, .. } => {
                matches!(kind, RejectKind::Quota | RejectKind::Other)
            }
            Self::NoProviderAvailable { .. } => true,
        }
    }

    /// True when the backend rejected the requested model as unknown.
    pub fn unknown_model(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed {
                kind: RejectKind::UnknownModel,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_kind_from_404() {
        assert_eq!(
            RejectKind::from_status_and_body(404, ""),
            RejectKind::UnknownModel
        );
    }

    #[test]
    fn test_reject_kind_from_429() {
        assert_eq!(RejectKind::from_status_and_body(429, ""), RejectKind::Quota);
    }

    #[test]
    fn test_reject_kind_model_not_found_in_body() {
        let body = r#"{"error": {"message": "The model `m1` was not found"}}"#;
        assert_eq!(
            RejectKind::from_status_and_body(400, body),
            RejectKind::UnknownModel
        );
    }

    #[test]
    fn test_reject_kind_generic_client_error() {
        assert_eq!(
            RejectKind::from_status_and_body(422, "bad temperature"),
            RejectKind::InvalidPayload
        );
    }

    #[test]
    fn test_reject_kind_server_error_is_other() {
        assert_eq!(
            RejectKind::from_status_and_body(500, "internal"),
            RejectKind::Other
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RouteError::unavailable("a", "down").is_retryable());
        assert!(RouteError::timeout("a", 1000).is_retryable());
        assert!(RouteError::rejected("a", RejectKind::Quota, "429").is_retryable());
        assert!(!RouteError::rejected("a", RejectKind::InvalidPayload, "400").is_retryable());
        assert!(!RouteError::rejected("a", RejectKind::UnknownModel, "404").is_retryable());
        let exhausted = RouteError::NoProviderAvailable {
            attempts: 2,
            last: "x".into(),
        };
        assert!(exhausted.is_retryable());
    }

    #[test]
    fn test_unknown_model_detection() {
        let err = RouteError::rejected("a", RejectKind::UnknownModel, "no such model");
        assert!(err.unknown_model());
        let err = RouteError::rejected("a", RejectKind::Quota, "slow down");
        assert!(!err.unknown_model());
    }

    #[test]
    fn test_provider_attribution() {
        assert_eq!(RouteError::timeout("gemini", 5).provider(), Some("gemini"));
        let exhausted = RouteError::NoProviderAvailable {
            attempts: 3,
            last: "x".into(),
        };
        assert_eq!(exhausted.provider(), None);
    }

    #[test]
    fn test_display_carries_context() {
        let err = RouteError::rejected("openai", RejectKind::UnknownModel, "m1 missing");
        let text = err.to_string();
        assert!(text.contains("openai"));
        assert!(text.contains("unknown model"));
        assert!(text.contains("m1 missing"));
    }
}
