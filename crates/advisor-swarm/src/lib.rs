//! Advisor board over the routed LLM layer.
//!
//! Seven fixed personas each run a bounded tool-using analysis loop
//! against the same question and context snapshot; their verdicts are
//! reduced by threshold vote into one consensus with a deterministic
//! recommendation. All model traffic goes through
//! [`routing::ProviderRouter`], so fallback, caching, guards, and
//! metrics apply uniformly.

pub mod agent;
pub mod config;
pub mod personas;
pub mod service;
pub mod snapshot;
pub mod swarm;
pub mod tools;
pub mod verdict;

pub use agent::{AgentResult, AgentRunner, AgentState, StateSink};
pub use config::{IntegrationConfig, SwarmConfig};
pub use personas::{advisor_board, Persona};
pub use service::AdvisorService;
pub use snapshot::{ContextSnapshot, SnapshotSource, StaticSnapshotSource, WorkspaceSnapshotSource};
pub use swarm::{Consensus, ProgressFn, SwarmError, SwarmOrchestrator, SwarmResult, VoteTally};
pub use tools::{built_in_registry, ToolError, ToolRegistry, ToolSpec};
pub use verdict::{FinalAnswer, ToolDirective, Verdict};
