//! Backend adapter contract and the streaming handle shared by every
//! implementation.
//!
//! Streaming is pull-based: the adapter spawns a producer task that pushes
//! text chunks onto a bounded channel and finally resolves a deferred
//! [`ChatResponse`] carrying the concatenated content. Dropping the
//! consumer makes the next `send_chunk` fail, which stops the producer and
//! releases the underlying connection — nothing leaks on early cancel.

pub mod anthropic;
pub mod gemini;
pub mod local;
pub mod openai;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::RouteError;
use crate::types::{ChatRequest, ChatResponse, TokenUsage};

/// Chunks buffered before a producer blocks waiting for the consumer.
pub const STREAM_BUFFER: usize = 32;

/// Producer stops waiting for the next wire chunk after this long.
pub const STREAM_IDLE_TIMEOUT_SECS: u64 = 60;

/// Uniform capability surface over one backend.
///
/// Implementations translate requests to their wire format, classify wire
/// errors into [`RejectKind`](crate::error::RejectKind) while status codes
/// are still in hand, and keep one `reqwest::Client` for the adapter's
/// lifetime.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable adapter name used for metrics, health maps, and logs.
    fn name(&self) -> &str;

    /// Model used when a caller's requested model is rejected as unknown,
    /// and for every non-first position in a fallback chain.
    fn default_model(&self) -> &str;

    /// Availability probe detail. Returns the failure reason instead of
    /// panicking or logging; callers that only need a boolean use
    /// [`ProviderAdapter::is_available`].
    async fn check(&self) -> Result<(), String>;

    /// Lightweight availability probe. Never fails: probe errors become
    /// `false`.
    async fn is_available(&self) -> bool {
        self.check().await.is_ok()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, RouteError>;

    /// Begin a streaming completion. Errors here mean the stream could not
    /// be established; once a handle is returned, failures surface through
    /// the deferred final response instead.
    async fn stream(&self, request: &ChatRequest) -> Result<StreamHandle, RouteError>;

    /// Pure estimate from the static price table. Free/local backends
    /// return zero.
    fn estimate_cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        crate::pricing::estimate_cost(model, usage)
    }

    /// Release client state. Idempotent; the guard layer makes closed
    /// adapters answer `ProviderUnavailable`.
    async fn close(&self) {}
}

/// Consumer side of one streaming completion.
#[derive(Debug)]
pub struct StreamHandle {
    chunks: mpsc::Receiver<String>,
    final_response: oneshot::Receiver<Result<ChatResponse, RouteError>>,
}

impl StreamHandle {
    /// Create the producer/consumer pair for one stream.
    pub fn channel() -> (StreamProducer, StreamHandle) {
        let (chunk_tx, chunk_rx) = mpsc::channel(STREAM_BUFFER);
        let (final_tx, final_rx) = oneshot::channel();
        (
            StreamProducer {
                chunks: chunk_tx,
                final_response: final_tx,
            },
            StreamHandle {
                chunks: chunk_rx,
                final_response: final_rx,
            },
        )
    }

    /// Next text chunk, or `None` once the producer has finished.
    pub async fn next_chunk(&mut self) -> Option<String> {
        self.chunks.recv().await
    }

    /// Drain any remaining chunks and resolve the deferred final response.
    pub async fn finish(mut self) -> Result<ChatResponse, RouteError> {
        while self.chunks.recv().await.is_some() {}
        match self.final_response.await {
            Ok(result) => result,
            Err(_) => Err(RouteError::unavailable(
                "stream",
                "producer dropped before resolving the final response",
            )),
        }
    }

    /// Decompose the handle so a wrapping layer can interpose on the
    /// deferred final response (permit lifetimes, metrics).
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<String>,
        oneshot::Receiver<Result<ChatResponse, RouteError>>,
    ) {
        (self.chunks, self.final_response)
    }

    pub fn from_parts(
        chunks: mpsc::Receiver<String>,
        final_response: oneshot::Receiver<Result<ChatResponse, RouteError>>,
    ) -> Self {
        Self {
            chunks,
            final_response,
        }
    }
}

/// Producer side of one streaming completion, owned by the adapter's
/// spawned wire-reading task.
pub struct StreamProducer {
    chunks: mpsc::Sender<String>,
    final_response: oneshot::Sender<Result<ChatResponse, RouteError>>,
}

impl StreamProducer {
    /// Push one chunk. Returns `false` when the consumer is gone, at which
    /// point the producer should stop reading and resolve.
    pub async fn send_chunk(&self, chunk: String) -> bool {
        self.chunks.send(chunk).await.is_ok()
    }

    /// Resolve the deferred final response and close the chunk channel.
    /// The send is allowed to fail: a consumer that dropped the whole
    /// handle no longer cares, but wrapping layers may still be listening.
    pub fn resolve(self, result: Result<ChatResponse, RouteError>) {
        let _ = self.final_response.send(result);
    }
}
