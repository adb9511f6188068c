//! Cross-cutting dispatch policies wrapped around one adapter.
//!
//! Policies compose in a fixed order: first a concurrency cap (at most K
//! in-flight calls, excess callers queue FIFO — tokio semaphores hand out
//! permits in acquire order), then a deadline on the backend call itself.
//! A deadline that fires abandons the wait and reports `Timeout`; the
//! underlying operation is not forcibly killed when the backend client has
//! no cancellation primitive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::RouteError;
use crate::providers::{ProviderAdapter, StreamHandle};
use crate::types::{ChatRequest, ChatResponse, TokenUsage};

/// One adapter behind the concurrency-cap + deadline policies.
///
/// `close()` is idempotent; a closed provider answers `ProviderUnavailable`
/// on dispatch and `false` on probes.
pub struct GuardedProvider {
    inner: Arc<dyn ProviderAdapter>,
    permits: Arc<Semaphore>,
    deadline: Duration,
    closed: AtomicBool,
}

impl GuardedProvider {
    pub fn new(inner: Arc<dyn ProviderAdapter>, max_in_flight: usize, deadline: Duration) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            deadline,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Probe detail. Closed providers fail without touching the backend.
    pub async fn check(&self) -> Result<(), String> {
        if self.is_closed() {
            return Err("provider closed".into());
        }
        self.inner.check().await
    }

    pub async fn is_available(&self) -> bool {
        self.check().await.is_ok()
    }

    pub fn estimate_cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        self.inner.estimate_cost(model, usage)
    }

    /// Dispatch one completion under the cap and deadline.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, RouteError> {
        let _permit = self.acquire().await?;
        match tokio::time::timeout(self.deadline, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(RouteError::timeout(
                self.inner.name(),
                self.deadline.as_millis() as u64,
            )),
        }
    }

    /// Establish one streaming completion. The deadline covers stream
    /// establishment; the in-flight permit is held until the deferred
    /// final response resolves, so a long-lived stream still counts
    /// against the cap.
    pub async fn stream(&self, request: &ChatRequest) -> Result<StreamHandle, RouteError> {
        let permit = self.acquire_owned().await?;
        let handle = match tokio::time::timeout(self.deadline, self.inner.stream(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RouteError::timeout(
                    self.inner.name(),
                    self.deadline.as_millis() as u64,
                ))
            }
        };

        let (chunks, final_rx) = handle.into_parts();
        let (relay_tx, relay_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let result = match final_rx.await {
                Ok(result) => result,
                Err(_) => Err(RouteError::unavailable(
                    "stream",
                    "producer dropped before resolving the final response",
                )),
            };
            let _ = relay_tx.send(result);
            drop(permit);
        });

        Ok(StreamHandle::from_parts(chunks, relay_rx))
    }

    /// Tear down. Queued waiters are released with `ProviderUnavailable`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        self.inner.close().await;
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, RouteError> {
        if self.is_closed() {
            return Err(RouteError::unavailable(self.inner.name(), "provider closed"));
        }
        self.permits
            .acquire()
            .await
            .map_err(|_| RouteError::unavailable(self.inner.name(), "provider closed"))
    }

    async fn acquire_owned(&self) -> Result<tokio::sync::OwnedSemaphorePermit, RouteError> {
        if self.is_closed() {
            return Err(RouteError::unavailable(self.inner.name(), "provider closed"));
        }
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RouteError::unavailable(self.inner.name(), "provider closed"))
    }
}
