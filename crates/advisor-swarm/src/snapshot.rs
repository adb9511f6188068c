//! Contextual signals shared by every persona in one swarm run.
//!
//! The snapshot is computed exactly once per run so all personas see a
//! consistent view, then rendered into each system prompt and served
//! through the built-in tools.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Numeric snapshot of the workspace and its integrations. Opaque to the
/// agents beyond the prompt block and tool answers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Files indexed under the workspace root.
    pub indexed_files: usize,
    pub integration_count: usize,
    pub healthy_integrations: usize,
    /// 0.0–1.0, healthy over total (1.0 when nothing is configured).
    pub health_score: f32,
}

impl ContextSnapshot {
    pub fn new(indexed_files: usize, integration_count: usize, healthy_integrations: usize) -> Self {
        let health_score = if integration_count == 0 {
            1.0
        } else {
            healthy_integrations as f32 / integration_count as f32
        };
        Self {
            indexed_files,
            integration_count,
            healthy_integrations,
            health_score,
        }
    }

    /// Rendering used inside every persona's system prompt.
    pub fn prompt_block(&self) -> String {
        format!(
            "## Workspace context\n\
             - Indexed files: {}\n\
             - Integrations: {} configured, {} healthy\n\
             - Integration health score: {:.2}",
            self.indexed_files,
            self.integration_count,
            self.healthy_integrations,
            self.health_score
        )
    }
}

/// Source of the per-run snapshot. The seam exists so orchestration tests
/// can script the signals.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> ContextSnapshot;
}

/// Fixed snapshot, for construction-time injection and tests.
pub struct StaticSnapshotSource(pub ContextSnapshot);

#[async_trait]
impl SnapshotSource for StaticSnapshotSource {
    async fn snapshot(&self) -> ContextSnapshot {
        self.0
    }
}

/// Counts files under a workspace root (gitignore-aware) and folds in a
/// configured integration health list.
pub struct WorkspaceSnapshotSource {
    root: PathBuf,
    /// (integration name, healthy) pairs supplied by configuration.
    integrations: Vec<(String, bool)>,
}

impl WorkspaceSnapshotSource {
    pub fn new(root: impl Into<PathBuf>, integrations: Vec<(String, bool)>) -> Self {
        Self {
            root: root.into(),
            integrations,
        }
    }

}

fn count_files(root: PathBuf) -> usize {
    ignore::WalkBuilder::new(root)
        .hidden(true)
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .count()
}

#[async_trait]
impl SnapshotSource for WorkspaceSnapshotSource {
    async fn snapshot(&self) -> ContextSnapshot {
        let root = self.root.clone();
        let indexed_files = tokio::task::spawn_blocking(move || count_files(root))
            .await
            .unwrap_or(0);
        let healthy = self.integrations.iter().filter(|(_, ok)| *ok).count();
        let snapshot = ContextSnapshot::new(indexed_files, self.integrations.len(), healthy);
        debug!(
            indexed_files,
            integrations = snapshot.integration_count,
            health = snapshot.health_score,
            "computed workspace snapshot"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_score_fraction() {
        let snapshot = ContextSnapshot::new(10, 4, 3);
        assert!((snapshot.health_score - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_health_score_with_no_integrations() {
        let snapshot = ContextSnapshot::new(10, 0, 0);
        assert_eq!(snapshot.health_score, 1.0);
    }

    #[test]
    fn test_prompt_block_carries_counts() {
        let block = ContextSnapshot::new(128, 2, 1).prompt_block();
        assert!(block.contains("Indexed files: 128"));
        assert!(block.contains("2 configured, 1 healthy"));
    }

    #[tokio::test]
    async fn test_workspace_source_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("b.md"), "# notes").unwrap();

        let source = WorkspaceSnapshotSource::new(
            dir.path(),
            vec![("tracker".into(), true), ("wiki".into(), false)],
        );
        let snapshot = source.snapshot().await;
        assert_eq!(snapshot.indexed_files, 2);
        assert_eq!(snapshot.integration_count, 2);
        assert_eq!(snapshot.healthy_integrations, 1);
    }

    #[tokio::test]
    async fn test_mock_source_scripts_signals() {
        let mut mock = MockSnapshotSource::new();
        mock.expect_snapshot()
            .returning(|| ContextSnapshot::new(1, 1, 1));
        assert_eq!(mock.snapshot().await.indexed_files, 1);
    }
}
