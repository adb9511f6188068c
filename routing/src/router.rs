//! Fallback-chain router over a set of guarded adapters.
//!
//! One `complete` call walks the chain in order until an adapter answers.
//! The first position keeps the caller's requested model; every later
//! position substitutes its own default model, because model names are
//! not portable across backends. A first-position rejection classified as
//! unknown-model earns one retry on the same adapter with its default
//! model before the walk moves on.
//!
//! Metrics and the cache are shared mutable state behind plain mutexes;
//! locks are never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{fingerprint, ResponseCache};
use crate::config::RoutingConfig;
use crate::error::RouteError;
use crate::guard::GuardedProvider;
use crate::providers::StreamHandle;
use crate::registry;
use crate::types::{ChatRequest, ChatResponse, ProviderHealth, ProviderMetrics, TokenUsage};

/// Backoff base for [`ProviderRouter::complete_with_retry`]. Doubles per
/// attempt.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: crate::cache::DEFAULT_TTL,
        }
    }
}

pub struct ProviderRouter {
    chain: Vec<Arc<GuardedProvider>>,
    cache: Arc<ResponseCache>,
    metrics: Arc<Mutex<HashMap<String, ProviderMetrics>>>,
    cache_enabled: bool,
}

impl ProviderRouter {
    pub fn new(providers: Vec<GuardedProvider>, options: RouterOptions) -> Self {
        let chain: Vec<Arc<GuardedProvider>> = providers.into_iter().map(Arc::new).collect();
        let metrics = chain
            .iter()
            .map(|p| (p.name().to_string(), ProviderMetrics::new(p.name())))
            .collect();
        Self {
            chain,
            cache: Arc::new(ResponseCache::new(options.cache_ttl)),
            metrics: Arc::new(Mutex::new(metrics)),
            cache_enabled: options.cache_enabled,
        }
    }

    /// Build every configured backend and assemble the chain in config
    /// order: default backend, explicit fallbacks, remaining backends.
    pub fn from_config(config: &RoutingConfig) -> Result<Self, String> {
        config.validate()?;
        let mut providers = Vec::new();
        for name in config.chain_order() {
            let backend = config
                .backends
                .iter()
                .find(|b| b.name == name)
                .ok_or_else(|| format!("backend '{name}' missing from config"))?;
            let adapter = registry::build_adapter(backend)?;
            providers.push(GuardedProvider::new(
                adapter,
                backend.max_concurrent,
                Duration::from_secs(backend.timeout_secs),
            ));
        }
        Ok(Self::new(
            providers,
            RouterOptions {
                cache_enabled: config.cache_enabled,
                cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            },
        ))
    }

    /// Backend names in chain order.
    pub fn chain_names(&self) -> Vec<String> {
        self.chain.iter().map(|p| p.name().to_string()).collect()
    }

    /// Dispatch a completion through the fallback chain. Only
    /// [`RouteError::NoProviderAvailable`] escapes; per-adapter failures
    /// are recorded and the walk continues.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, RouteError> {
        let fp = (self.cache_enabled && !request.stream).then(|| fingerprint(request));
        if let Some(fp) = &fp {
            if let Some(hit) = self.cache.get(fp) {
                debug!(provider = %hit.provider, model = %hit.model, "cache hit");
                return Ok(hit);
            }
        }

        let mut attempts = 0usize;
        let mut last: Option<RouteError> = None;
        for (position, provider) in self.chain.iter().enumerate() {
            let mut attempt = request.clone();
            if position > 0 {
                attempt.model = provider.default_model().to_string();
            }

            match self.dispatch(provider, &attempt).await {
                Ok(response) => {
                    if let Some(fp) = &fp {
                        self.cache.insert(fp.clone(), response.clone());
                    }
                    return Ok(response);
                }
                Err(err) => {
                    attempts += 1;
                    if position == 0
                        && err.unknown_model()
                        && attempt.model != provider.default_model()
                    {
                        warn!(
                            provider = provider.name(),
                            requested = %attempt.model,
                            default = provider.default_model(),
                            "requested model unknown, retrying with default"
                        );
                        attempt.model = provider.default_model().to_string();
                        match self.dispatch(provider, &attempt).await {
                            Ok(response) => {
                                if let Some(fp) = &fp {
                                    self.cache.insert(fp.clone(), response.clone());
                                }
                                return Ok(response);
                            }
                            Err(retry_err) => {
                                attempts += 1;
                                last = Some(retry_err);
                                continue;
                            }
                        }
                    }
                    last = Some(err);
                }
            }
        }

        Err(RouteError::NoProviderAvailable {
            attempts,
            last: last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no providers configured".into()),
        })
    }

    /// Dispatch a streaming completion through the chain. The cache is
    /// never consulted; metrics record exactly once, when the deferred
    /// final response resolves.
    pub async fn stream(&self, request: &ChatRequest) -> Result<StreamHandle, RouteError> {
        let mut attempts = 0usize;
        let mut last: Option<RouteError> = None;
        for (position, provider) in self.chain.iter().enumerate() {
            let mut attempt = request.clone();
            attempt.stream = true;
            if position > 0 {
                attempt.model = provider.default_model().to_string();
            }

            match self.establish_stream(provider, &attempt).await {
                Ok(handle) => return Ok(handle),
                Err(err) => {
                    attempts += 1;
                    if position == 0
                        && err.unknown_model()
                        && attempt.model != provider.default_model()
                    {
                        attempt.model = provider.default_model().to_string();
                        match self.establish_stream(provider, &attempt).await {
                            Ok(handle) => return Ok(handle),
                            Err(retry_err) => {
                                attempts += 1;
                                last = Some(retry_err);
                                continue;
                            }
                        }
                    }
                    last = Some(err);
                }
            }
        }

        Err(RouteError::NoProviderAvailable {
            attempts,
            last: last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no providers configured".into()),
        })
    }

    /// Full-chain retries with exponential backoff, independent of the
    /// per-call fallback walk: the chain swaps backends, this re-tries
    /// the whole chain.
    pub async fn complete_with_retry(
        &self,
        request: &ChatRequest,
        max_attempts: u32,
    ) -> Result<ChatResponse, RouteError> {
        let mut delay = RETRY_BASE_DELAY;
        let mut last = None;
        for attempt in 0..max_attempts.max(1) {
            if attempt > 0 {
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying full chain");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            match self.complete(request).await {
                Ok(response) => return Ok(response),
                Err(err) => last = Some(err),
            }
        }
        Err(last.unwrap_or(RouteError::NoProviderAvailable {
            attempts: 0,
            last: "no attempts made".into(),
        }))
    }

    /// Probe every backend concurrently. Recomputed on every call.
    pub async fn health(&self) -> HashMap<String, ProviderHealth> {
        let probes = self.chain.iter().map(|provider| async move {
            let started = Instant::now();
            let result = provider.check().await;
            let latency_ms = started.elapsed().as_millis() as u64;
            let health = match result {
                Ok(()) => ProviderHealth::healthy(latency_ms),
                Err(reason) => ProviderHealth::unavailable(latency_ms, reason),
            };
            (provider.name().to_string(), health)
        });
        futures::future::join_all(probes).await.into_iter().collect()
    }

    /// Metrics snapshot in chain order. Idempotent between dispatches.
    pub fn metrics(&self) -> Vec<ProviderMetrics> {
        let table = lock(&self.metrics);
        self.chain
            .iter()
            .filter_map(|p| table.get(p.name()).cloned())
            .collect()
    }

    /// Cost attribution for a served response, using the serving
    /// adapter's own price model (zero for local backends).
    pub fn estimate_cost(&self, provider: &str, model: &str, usage: &TokenUsage) -> f64 {
        self.chain
            .iter()
            .find(|p| p.name() == provider)
            .map(|p| p.estimate_cost(model, usage))
            .unwrap_or(0.0)
    }

    /// Close every backend and drop cached responses. Idempotent.
    pub async fn close(&self) {
        for provider in &self.chain {
            provider.close().await;
        }
        self.cache.clear();
    }

    async fn dispatch(
        &self,
        provider: &Arc<GuardedProvider>,
        request: &ChatRequest,
    ) -> Result<ChatResponse, RouteError> {
        match provider.complete(request).await {
            Ok(response) => {
                let cost = response
                    .usage
                    .map(|u| provider.estimate_cost(&response.model, &u))
                    .unwrap_or(0.0);
                record_success(&self.metrics, provider.name(), response.latency_ms, cost);
                info!(
                    provider = provider.name(),
                    model = %response.model,
                    latency_ms = response.latency_ms,
                    "completion served"
                );
                Ok(response)
            }
            Err(err) => {
                record_failure(&self.metrics, provider.name());
                warn!(provider = provider.name(), error = %err, "dispatch failed");
                Err(err)
            }
        }
    }

    async fn establish_stream(
        &self,
        provider: &Arc<GuardedProvider>,
        request: &ChatRequest,
    ) -> Result<StreamHandle, RouteError> {
        let handle = match provider.stream(request).await {
            Ok(handle) => handle,
            Err(err) => {
                record_failure(&self.metrics, provider.name());
                warn!(provider = provider.name(), error = %err, "stream setup failed");
                return Err(err);
            }
        };

        let (chunks, final_rx) = handle.into_parts();
        let (relay_tx, relay_rx) = tokio::sync::oneshot::channel();
        let metrics = Arc::clone(&self.metrics);
        let provider = Arc::clone(provider);
        tokio::spawn(async move {
            let result = match final_rx.await {
                Ok(result) => result,
                Err(_) => Err(RouteError::unavailable(
                    provider.name(),
                    "producer dropped before resolving the final response",
                )),
            };
            match &result {
                Ok(response) => {
                    let cost = response
                        .usage
                        .map(|u| provider.estimate_cost(&response.model, &u))
                        .unwrap_or(0.0);
                    record_success(&metrics, provider.name(), response.latency_ms, cost);
                    info!(
                        provider = provider.name(),
                        latency_ms = response.latency_ms,
                        "stream completed"
                    );
                }
                Err(err) => {
                    record_failure(&metrics, provider.name());
                    warn!(provider = provider.name(), error = %err, "stream failed");
                }
            }
            let _ = relay_tx.send(result);
        });

        Ok(StreamHandle::from_parts(chunks, relay_rx))
    }
}

fn lock(
    metrics: &Mutex<HashMap<String, ProviderMetrics>>,
) -> std::sync::MutexGuard<'_, HashMap<String, ProviderMetrics>> {
    match metrics.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn record_success(
    metrics: &Mutex<HashMap<String, ProviderMetrics>>,
    provider: &str,
    latency_ms: u64,
    cost_usd: f64,
) {
    lock(metrics)
        .entry(provider.to_string())
        .or_insert_with(|| ProviderMetrics::new(provider))
        .record_success(latency_ms, cost_usd);
}

fn record_failure(metrics: &Mutex<HashMap<String, ProviderMetrics>>, provider: &str) {
    lock(metrics)
        .entry(provider.to_string())
        .or_insert_with(|| ProviderMetrics::new(provider))
        .record_failure();
}
