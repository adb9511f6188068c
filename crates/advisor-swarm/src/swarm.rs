//! Bounded fan-out of the advisor board and reduction of its verdicts
//! into one deterministic group decision.
//!
//! Launch order is persona-declaration order and so is the result list,
//! regardless of completion order. Individual personas can only degrade
//! (see [`crate::agent`]); the orchestrator itself fails only on empty
//! input.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use routing::ProviderRouter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentResult, AgentRunner, AgentState, StateSink};
use crate::personas::Persona;
use crate::snapshot::{ContextSnapshot, SnapshotSource};
use crate::tools::{built_in_registry, ToolRegistry};
use crate::verdict::Verdict;

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("question must not be empty")]
    InvalidInput,
}

/// The board's aggregated categorical decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consensus {
    StrongYes,
    Yes,
    StrongNo,
    No,
    Maybe,
}

impl std::fmt::Display for Consensus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongYes => write!(f, "STRONG YES"),
            Self::Yes => write!(f, "YES"),
            Self::StrongNo => write!(f, "STRONG NO"),
            Self::No => write!(f, "NO"),
            Self::Maybe => write!(f, "MAYBE"),
        }
    }
}

/// Vote counts across one run's results. Needs-data verdicts are counted
/// but sit in no threshold bucket; they reach the outcome only through
/// the MAYBE default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteTally {
    pub yes: usize,
    pub no: usize,
    pub maybe: usize,
    pub needs_data: usize,
}

impl VoteTally {
    pub fn count(results: &[AgentResult]) -> Self {
        let mut tally = Self::default();
        for result in results {
            match result.verdict {
                Verdict::Yes => tally.yes += 1,
                Verdict::No => tally.no += 1,
                Verdict::Maybe => tally.maybe += 1,
                Verdict::NeedsData => tally.needs_data += 1,
            }
        }
        tally
    }

    /// Threshold table for the fixed seven-seat board, evaluated in
    /// order; first match wins.
    pub fn consensus(&self) -> Consensus {
        if self.yes >= 6 {
            Consensus::StrongYes
        } else if self.yes >= 4 {
            Consensus::Yes
        } else if self.no >= 6 {
            Consensus::StrongNo
        } else if self.no >= 4 {
            Consensus::No
        } else {
            Consensus::Maybe
        }
    }
}

/// Outcome of one swarm invocation.
#[derive(Debug, Clone, Serialize)]
pub struct SwarmResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub question: String,
    pub consensus: Consensus,
    /// Arithmetic mean of per-persona confidences, rounded.
    pub confidence: u8,
    /// One entry per configured persona, in declaration order.
    pub agent_results: Vec<AgentResult>,
    pub recommendation: String,
    /// Sum of per-persona wall-clock durations.
    pub total_duration_ms: u64,
    pub total_cost_usd: f64,
    pub tags: Vec<String>,
}

/// Callback invoked with a full state snapshot whenever any persona's
/// state changes. Intermediate states may be coalesced under contention.
pub type ProgressFn = Arc<dyn Fn(HashMap<String, AgentState>) + Send + Sync>;

type ToolFactory = Arc<dyn Fn(ContextSnapshot) -> ToolRegistry + Send + Sync>;

pub struct SwarmOrchestrator {
    router: Arc<ProviderRouter>,
    snapshot_source: Arc<dyn SnapshotSource>,
    personas: Vec<Persona>,
    model: String,
    tool_factory: ToolFactory,
}

impl SwarmOrchestrator {
    pub fn new(
        router: Arc<ProviderRouter>,
        snapshot_source: Arc<dyn SnapshotSource>,
        personas: Vec<Persona>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            router,
            snapshot_source,
            personas,
            model: model.into(),
            tool_factory: Arc::new(built_in_registry),
        }
    }

    /// Replace the built-in board tools.
    pub fn with_tool_factory(mut self, factory: ToolFactory) -> Self {
        self.tool_factory = factory;
        self
    }

    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    /// Run the full board against one question.
    pub async fn run(
        &self,
        question: &str,
        progress: Option<ProgressFn>,
    ) -> Result<SwarmResult, SwarmError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SwarmError::InvalidInput);
        }

        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        // One shared snapshot and tool set per run: every persona sees
        // the same view.
        let snapshot = self.snapshot_source.snapshot().await;
        let tools = Arc::new((self.tool_factory)(snapshot));
        info!(
            run_id = %run_id,
            personas = self.personas.len(),
            indexed_files = snapshot.indexed_files,
            "swarm run starting"
        );

        let states: Arc<Mutex<HashMap<String, AgentState>>> = Arc::new(Mutex::new(
            self.personas
                .iter()
                .map(|p| (p.name.clone(), AgentState::Idle))
                .collect(),
        ));
        let limiter = Arc::new(Semaphore::new(self.personas.len().max(1)));

        let mut handles = Vec::with_capacity(self.personas.len());
        for persona in &self.personas {
            let persona = persona.clone();
            let router = Arc::clone(&self.router);
            let tools = Arc::clone(&tools);
            let model = self.model.clone();
            let question = question.to_string();
            let limiter = Arc::clone(&limiter);
            let states = Arc::clone(&states);
            let progress = progress.clone();

            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await;
                let sink: StateSink = {
                    let name = persona.name.clone();
                    Arc::new(move |state| {
                        let snapshot = {
                            let mut map = match states.lock() {
                                Ok(map) => map,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            map.insert(name.clone(), state);
                            map.clone()
                        };
                        if let Some(progress) = &progress {
                            progress(snapshot);
                        }
                    })
                };
                AgentRunner::new(persona, router, tools, model)
                    .with_state_sink(sink)
                    .run(&question, &snapshot)
                    .await
            }));
        }

        // Join in declaration order so the result list preserves it.
        let mut agent_results = Vec::with_capacity(handles.len());
        for (handle, persona) in handles.into_iter().zip(&self.personas) {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => {
                    warn!(persona = %persona.name, error = %err, "agent task aborted");
                    AgentResult {
                        persona: persona.name.clone(),
                        verdict: Verdict::Maybe,
                        confidence: 50,
                        summary: format!("agent task aborted: {err}"),
                        detail: Vec::new(),
                        tags: Vec::new(),
                        duration_ms: 0,
                        cost_usd: 0.0,
                        state: AgentState::Error,
                    }
                }
            };
            agent_results.push(result);
        }

        let tally = VoteTally::count(&agent_results);
        let consensus = tally.consensus();
        let confidence = aggregate_confidence(&agent_results);
        let recommendation = recommendation(consensus, confidence, &agent_results);
        let total_duration_ms = agent_results.iter().map(|r| r.duration_ms).sum();
        let total_cost_usd = agent_results.iter().map(|r| r.cost_usd).sum();
        let tags = provenance_tags(consensus, &agent_results);

        info!(
            run_id = %run_id,
            %consensus,
            confidence,
            yes = tally.yes,
            no = tally.no,
            maybe = tally.maybe,
            "swarm run complete"
        );

        Ok(SwarmResult {
            run_id,
            started_at,
            question: question.to_string(),
            consensus,
            confidence,
            agent_results,
            recommendation,
            total_duration_ms,
            total_cost_usd,
            tags,
        })
    }
}

/// Mean per-persona confidence, rounded to nearest integer.
fn aggregate_confidence(results: &[AgentResult]) -> u8 {
    if results.is_empty() {
        return 0;
    }
    let sum: u32 = results.iter().map(|r| r.confidence as u32).sum();
    ((sum as f64 / results.len() as f64).round() as u32).min(100) as u8
}

/// Deterministic template over the consensus and the three
/// highest-confidence verdicts. Stable sort: declaration order breaks
/// confidence ties. No further model calls.
fn recommendation(consensus: Consensus, confidence: u8, results: &[AgentResult]) -> String {
    let mut ranked: Vec<&AgentResult> = results.iter().collect();
    ranked.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    let leading = ranked
        .iter()
        .take(3)
        .map(|r| format!("{} voted {} at {}%", r.persona, r.verdict, r.confidence))
        .collect::<Vec<_>>()
        .join("; ");

    let guidance = match consensus {
        Consensus::StrongYes => "Proceed.",
        Consensus::Yes => "Proceed with standard safeguards.",
        Consensus::StrongNo => "Do not proceed.",
        Consensus::No => "Do not proceed as proposed.",
        Consensus::Maybe => "Gather more data before committing.",
    };

    format!(
        "Board consensus: {consensus} (aggregate confidence {confidence}%). \
         Leading voices: {leading}. {guidance}"
    )
}

/// Sorted, deduplicated union of per-agent tags plus the mechanisms used.
fn provenance_tags(consensus: Consensus, results: &[AgentResult]) -> Vec<String> {
    let mut tags: std::collections::BTreeSet<String> = results
        .iter()
        .flat_map(|r| r.tags.iter().cloned())
        .collect();
    tags.insert("swarm:bounded-fanout".into());
    tags.insert("consensus:threshold-vote".into());
    tags.insert(format!(
        "consensus:{}",
        consensus.to_string().to_lowercase().replace(' ', "-")
    ));
    tags.into_iter().collect()
}
