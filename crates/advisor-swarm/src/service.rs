//! One assembled entry point over both layers: direct routed chat on
//! one side, full board runs on the other, sharing a single router so
//! caching, guards, and metrics are common to both.

use std::collections::HashMap;
use std::sync::Arc;

use routing::{
    ChatRequest, ChatResponse, ProviderHealth, ProviderMetrics, ProviderRouter, RouteError,
    StreamHandle,
};
use tracing::info;

use crate::config::SwarmConfig;
use crate::personas::advisor_board;
use crate::snapshot::WorkspaceSnapshotSource;
use crate::swarm::{ProgressFn, SwarmError, SwarmOrchestrator, SwarmResult};

pub struct AdvisorService {
    router: Arc<ProviderRouter>,
    swarm: SwarmOrchestrator,
}

impl AdvisorService {
    pub fn from_config(config: &SwarmConfig) -> anyhow::Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;
        let router = Arc::new(
            ProviderRouter::from_config(&config.routing).map_err(anyhow::Error::msg)?,
        );
        let snapshot_source = Arc::new(WorkspaceSnapshotSource::new(
            config.workspace_root.clone(),
            config.integration_pairs(),
        ));
        let swarm = SwarmOrchestrator::new(
            Arc::clone(&router),
            snapshot_source,
            advisor_board(),
            config.resolved_model(),
        );
        info!(
            chain = ?router.chain_names(),
            workspace = %config.workspace_root.display(),
            "advisor service ready"
        );
        Ok(Self { router, swarm })
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    /// Single routed completion, cache and fallback chain included.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, RouteError> {
        self.router.complete(request).await
    }

    /// Routed streaming completion. Never served from cache.
    pub async fn stream(&self, request: &ChatRequest) -> Result<StreamHandle, RouteError> {
        self.router.stream(request).await
    }

    pub async fn health(&self) -> HashMap<String, ProviderHealth> {
        self.router.health().await
    }

    pub fn metrics(&self) -> Vec<ProviderMetrics> {
        self.router.metrics()
    }

    /// Put one question to the full advisor board.
    pub async fn run_swarm(
        &self,
        question: &str,
        progress: Option<ProgressFn>,
    ) -> Result<SwarmResult, SwarmError> {
        self.swarm.run(question, progress).await
    }

    pub async fn close(&self) {
        self.router.close().await;
    }
}
