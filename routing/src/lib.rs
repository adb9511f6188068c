//! Multi-provider LLM routing.
//!
//! This crate is the lower layer of the advisor swarm: a uniform
//! request/response contract over heterogeneous completion backends
//! (a local OpenAI-compatible engine plus hosted OpenAI-, Anthropic-,
//! and Gemini-style services) with:
//!
//! - an ordered fallback chain that substitutes per-backend default
//!   models and retries first-position unknown-model rejections
//! - per-adapter concurrency caps and deadlines ([`guard`])
//! - a fingerprint-keyed TTL response cache for non-streaming requests
//! - pull-based streaming with a deferred final response
//! - per-backend health probes, cost estimation, and dispatch metrics

pub mod cache;
pub mod config;
pub mod error;
pub mod guard;
pub mod pricing;
pub mod providers;
pub mod registry;
pub mod router;
pub mod types;

pub use config::{BackendConfig, RoutingConfig};
pub use error::{RejectKind, RouteError};
pub use guard::GuardedProvider;
pub use providers::{ProviderAdapter, StreamHandle, StreamProducer};
pub use registry::BackendKind;
pub use router::{ProviderRouter, RouterOptions};
pub use types::{
    ChatRequest, ChatResponse, Message, ProviderHealth, ProviderMetrics, Role, TokenUsage,
};
