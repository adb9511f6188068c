//! Fallback-chain behavior against scripted adapters: chain order,
//! caching, the first-position unknown-model retry, whole-chain retry
//! backoff, and exactly-once stream metrics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use routing::providers::{ProviderAdapter, StreamHandle};
use routing::{
    ChatRequest, ChatResponse, GuardedProvider, Message, ProviderRouter, RejectKind, RouteError,
    RouterOptions, TokenUsage,
};

enum Outcome {
    Succeed,
    Reject(RejectKind),
    Unreachable,
    Hang,
}

/// Adapter that answers from a queued script; an exhausted script keeps
/// succeeding.
struct ScriptedAdapter {
    name: String,
    default_model: String,
    script: Mutex<VecDeque<Outcome>>,
    calls: AtomicUsize,
    models_seen: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    fn new(name: &str, default_model: &str, script: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            default_model: default_model.into(),
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            models_seen: Mutex::new(Vec::new()),
        })
    }

    fn next_outcome(&self, request: &ChatRequest) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.models_seen.lock().unwrap().push(request.model.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Succeed)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn response(&self, model: &str) -> ChatResponse {
        ChatResponse {
            content: format!("answer from {}", self.name),
            model: model.to_string(),
            provider: self.name.clone(),
            usage: Some(TokenUsage::new(100, 10)),
            latency_ms: 10,
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn check(&self) -> Result<(), String> {
        Ok(())
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, RouteError> {
        match self.next_outcome(request) {
            Outcome::Succeed => Ok(self.response(&request.model)),
            Outcome::Reject(kind) => Err(RouteError::rejected(&self.name, kind, "scripted")),
            Outcome::Unreachable => Err(RouteError::unavailable(&self.name, "scripted")),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(self.response(&request.model))
            }
        }
    }

    async fn stream(&self, request: &ChatRequest) -> Result<StreamHandle, RouteError> {
        match self.next_outcome(request) {
            Outcome::Succeed => {
                let (producer, handle) = StreamHandle::channel();
                let response = self.response(&request.model);
                tokio::spawn(async move {
                    for chunk in ["ans", "wer"] {
                        if !producer.send_chunk(chunk.into()).await {
                            producer.resolve(Err(RouteError::rejected(
                                &response.provider,
                                RejectKind::Other,
                                "stream cancelled by consumer",
                            )));
                            return;
                        }
                    }
                    producer.resolve(Ok(response));
                });
                Ok(handle)
            }
            Outcome::Reject(kind) => Err(RouteError::rejected(&self.name, kind, "scripted")),
            Outcome::Unreachable => Err(RouteError::unavailable(&self.name, "scripted")),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(RouteError::unavailable(&self.name, "unreachable"))
            }
        }
    }
}

fn router(adapters: &[Arc<ScriptedAdapter>]) -> ProviderRouter {
    let guarded = adapters
        .iter()
        .map(|a| GuardedProvider::new(a.clone() as Arc<dyn ProviderAdapter>, 4, Duration::from_secs(5)))
        .collect();
    ProviderRouter::new(guarded, RouterOptions::default())
}

fn request(model: &str) -> ChatRequest {
    ChatRequest::new(model, vec![Message::user("should we ship this?")])
}

fn metrics_for(router: &ProviderRouter, provider: &str) -> routing::ProviderMetrics {
    router
        .metrics()
        .into_iter()
        .find(|m| m.provider == provider)
        .expect("metrics entry")
}

// Scenario A: the first adapter times out, the second serves with its
// own default model.
#[tokio::test(start_paused = true)]
async fn test_timeout_falls_back_to_next_adapter() {
    let a = ScriptedAdapter::new("a", "m1", vec![Outcome::Hang]);
    let b = ScriptedAdapter::new("b", "m2", vec![]);
    let router = router(&[a.clone(), b.clone()]);

    let response = router.complete(&request("m1")).await.unwrap();
    assert_eq!(response.model, "m2");
    assert_eq!(response.provider, "b");

    let ma = metrics_for(&router, "a");
    assert_eq!((ma.successes, ma.failures), (0, 1));
    let mb = metrics_for(&router, "b");
    assert_eq!((mb.successes, mb.failures), (1, 0));
}

// Scenario B: an identical request repeated inside the TTL answers from
// the cache with no second adapter invocation.
#[tokio::test]
async fn test_cache_hit_skips_adapters() {
    let a = ScriptedAdapter::new("a", "m1", vec![]);
    let router = router(&[a.clone()]);

    let first = router.complete(&request("m1")).await.unwrap();
    let second = router.complete(&request("m1")).await.unwrap();
    assert_eq!(first.content, second.content);
    assert_eq!(a.calls(), 1);
    assert_eq!(metrics_for(&router, "a").successes, 1);
}

#[tokio::test]
async fn test_success_stops_the_walk() {
    let a = ScriptedAdapter::new("a", "m1", vec![]);
    let b = ScriptedAdapter::new("b", "m2", vec![]);
    let router = router(&[a.clone(), b.clone()]);

    router.complete(&request("m1")).await.unwrap();
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 0);
}

#[tokio::test]
async fn test_unknown_model_retries_same_adapter_with_default() {
    let a = ScriptedAdapter::new(
        "a",
        "m-default",
        vec![Outcome::Reject(RejectKind::UnknownModel)],
    );
    let b = ScriptedAdapter::new("b", "m2", vec![]);
    let router = router(&[a.clone(), b.clone()]);

    let response = router.complete(&request("weird-model")).await.unwrap();
    assert_eq!(response.provider, "a");
    assert_eq!(response.model, "m-default");
    assert_eq!(
        *a.models_seen.lock().unwrap(),
        vec!["weird-model", "m-default"]
    );
    assert_eq!(b.calls(), 0);

    let ma = metrics_for(&router, "a");
    assert_eq!((ma.successes, ma.failures), (1, 1));
}

#[tokio::test]
async fn test_unknown_model_not_retried_past_first_position() {
    let a = ScriptedAdapter::new("a", "m1", vec![Outcome::Unreachable]);
    let b = ScriptedAdapter::new(
        "b",
        "m2",
        vec![
            Outcome::Reject(RejectKind::UnknownModel),
            Outcome::Reject(RejectKind::UnknownModel),
        ],
    );
    let router = router(&[a.clone(), b.clone()]);

    let err = router.complete(&request("m1")).await.unwrap_err();
    assert!(matches!(err, RouteError::NoProviderAvailable { .. }));
    // Second position gets exactly one attempt, already on its default.
    assert_eq!(b.calls(), 1);
}

#[tokio::test]
async fn test_exhausted_chain_carries_last_error() {
    let a = ScriptedAdapter::new("a", "m1", vec![Outcome::Unreachable]);
    let b = ScriptedAdapter::new(
        "b",
        "m2",
        vec![Outcome::Reject(RejectKind::InvalidPayload)],
    );
    let router = router(&[a, b]);

    match router.complete(&request("m1")).await.unwrap_err() {
        RouteError::NoProviderAvailable { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(last.contains("b"), "last error should name adapter b: {last}");
        }
        other => panic!("expected NoProviderAvailable, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_backs_off_exponentially() {
    let a = ScriptedAdapter::new(
        "a",
        "m1",
        vec![Outcome::Unreachable, Outcome::Unreachable],
    );
    let router = router(&[a.clone()]);

    let started = tokio::time::Instant::now();
    let response = router
        .complete_with_retry(&request("m1"), 3)
        .await
        .unwrap();
    assert_eq!(response.provider, "a");
    assert_eq!(a.calls(), 3);
    // 1s after the first failure, 2s after the second.
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test]
async fn test_retry_exhaustion_returns_last_error() {
    let a = ScriptedAdapter::new(
        "a",
        "m1",
        vec![Outcome::Unreachable, Outcome::Unreachable],
    );
    let router = router(&[a.clone()]);

    tokio::time::pause();
    let err = router.complete_with_retry(&request("m1"), 2).await.unwrap_err();
    assert!(matches!(err, RouteError::NoProviderAvailable { .. }));
    assert!(err.is_retryable());
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn test_metrics_idempotent_between_dispatches() {
    let a = ScriptedAdapter::new("a", "m1", vec![]);
    let router = router(&[a]);
    router.complete(&request("m1")).await.unwrap();

    let first = serde_json::to_value(router.metrics()).unwrap();
    let second = serde_json::to_value(router.metrics()).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_streaming_requests_bypass_the_cache() {
    let a = ScriptedAdapter::new("a", "m1", vec![]);
    let router = router(&[a.clone()]);

    for _ in 0..2 {
        let mut handle = router.stream(&request("m1")).await.unwrap();
        while handle.next_chunk().await.is_some() {}
        handle.finish().await.unwrap();
    }
    assert_eq!(a.calls(), 2);

    // A non-streaming request with the same fingerprint still dispatches:
    // streams never populated the cache.
    router.complete(&request("m1")).await.unwrap();
    assert_eq!(a.calls(), 3);
}

#[tokio::test]
async fn test_stream_records_one_success_at_final_response() {
    let a = ScriptedAdapter::new("a", "m1", vec![]);
    let router = router(&[a]);

    let mut handle = router.stream(&request("m1")).await.unwrap();
    let mut content = String::new();
    while let Some(chunk) = handle.next_chunk().await {
        content.push_str(&chunk);
    }
    let response = handle.finish().await.unwrap();
    assert_eq!(content, "answer");
    assert_eq!(response.content, "answer from a");

    let metrics = metrics_for(&router, "a");
    assert_eq!((metrics.successes, metrics.failures), (1, 0));
    assert_eq!(metrics.total_requests, 1);
}

#[tokio::test]
async fn test_stream_setup_failure_falls_back() {
    let a = ScriptedAdapter::new("a", "m1", vec![Outcome::Unreachable]);
    let b = ScriptedAdapter::new("b", "m2", vec![]);
    let router = router(&[a, b]);

    let handle = router.stream(&request("m1")).await.unwrap();
    let response = handle.finish().await.unwrap();
    assert_eq!(response.provider, "b");
    assert_eq!(response.model, "m2");

    assert_eq!(metrics_for(&router, "a").failures, 1);
    assert_eq!(metrics_for(&router, "b").successes, 1);
}

#[tokio::test]
async fn test_early_stream_drop_records_one_failure() {
    let a = ScriptedAdapter::new("a", "m1", vec![]);
    let router = router(&[a]);

    let handle = router.stream(&request("m1")).await.unwrap();
    drop(handle);

    // The producer notices the dropped consumer and resolves a failure;
    // wait for the bookkeeping task to observe it.
    for _ in 0..100 {
        if metrics_for(&router, "a").failures == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let metrics = metrics_for(&router, "a");
    assert_eq!((metrics.successes, metrics.failures), (0, 1));
    assert_eq!(metrics.total_requests, 1);
}

#[tokio::test]
async fn test_health_reports_every_backend() {
    let a = ScriptedAdapter::new("a", "m1", vec![]);
    let b = ScriptedAdapter::new("b", "m2", vec![]);
    let router = router(&[a, b]);

    let health = router.health().await;
    assert_eq!(health.len(), 2);
    assert!(health["a"].available);
    assert!(health["b"].available);
}

#[tokio::test]
async fn test_close_is_idempotent_and_stops_dispatch() {
    let a = ScriptedAdapter::new("a", "m1", vec![]);
    let router = router(&[a]);

    router.close().await;
    router.close().await;

    let err = router.complete(&request("m1")).await.unwrap_err();
    assert!(matches!(err, RouteError::NoProviderAvailable { .. }));
    let health = router.health().await;
    assert!(!health["a"].available);
}
