//! One persona's bounded tool-use loop.
//!
//! The loop is explicit: an owned history buffer, a turn counter capped
//! at [`MAX_TURNS`], and exactly one terminal state per run. Failures at
//! any step — router exhaustion, tool errors past the turn budget, parse
//! dead ends — degrade into a maybe/50 result instead of propagating, so
//! the swarm always receives one result per persona.

use std::sync::Arc;
use std::time::Instant;

use routing::{ChatRequest, Message, ProviderRouter};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::personas::Persona;
use crate::snapshot::ContextSnapshot;
use crate::tools::ToolRegistry;
use crate::verdict::{parse_directive, parse_final, Verdict};

/// Model-call-and-parse cycles allowed per run.
pub const MAX_TURNS: usize = 5;

/// Progress-reporting states. Never used for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Analyzing,
    Processing,
    Reviewing,
    Monitoring,
    Complete,
    Error,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Analyzing => write!(f, "analyzing"),
            Self::Processing => write!(f, "processing"),
            Self::Reviewing => write!(f, "reviewing"),
            Self::Monitoring => write!(f, "monitoring"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One persona's completed analysis. Immutable after creation; exactly
/// one exists per configured persona per swarm run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub persona: String,
    pub verdict: Verdict,
    pub confidence: u8,
    pub summary: String,
    pub detail: Vec<String>,
    pub tags: Vec<String>,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub state: AgentState,
}

/// Observer for state transitions.
pub type StateSink = Arc<dyn Fn(AgentState) + Send + Sync>;

pub struct AgentRunner {
    persona: Persona,
    router: Arc<ProviderRouter>,
    tools: Arc<ToolRegistry>,
    model: String,
    on_state: Option<StateSink>,
}

impl AgentRunner {
    pub fn new(
        persona: Persona,
        router: Arc<ProviderRouter>,
        tools: Arc<ToolRegistry>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            persona,
            router,
            tools,
            model: model.into(),
            on_state: None,
        }
    }

    pub fn with_state_sink(mut self, sink: StateSink) -> Self {
        self.on_state = Some(sink);
        self
    }

    /// Run the persona to a terminal state. Never fails: every error path
    /// degrades into a maybe/50 result with state `Error`.
    pub async fn run(&self, question: &str, snapshot: &ContextSnapshot) -> AgentResult {
        let started = Instant::now();
        self.set_state(AgentState::Analyzing);

        let mut history = vec![
            Message::system(self.system_prompt(snapshot)),
            Message::user(question),
        ];
        let mut cost_usd = 0.0;
        let mut tags = std::collections::BTreeSet::new();

        for turn in 0..MAX_TURNS {
            let request = ChatRequest::new(&self.model, history.clone());
            let response = match self.router.complete(&request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(persona = %self.persona.name, turn, error = %err, "router exhausted");
                    return self.degraded(
                        format!("no provider could serve this persona: {err}"),
                        tags,
                        started,
                        cost_usd,
                    );
                }
            };

            if let Some(usage) = response.usage {
                cost_usd += self
                    .router
                    .estimate_cost(&response.provider, &response.model, &usage);
            }
            tags.insert(format!("provider:{}", response.provider));
            tags.insert(format!("model:{}", response.model));

            match parse_directive(&response.content) {
                Some(directive) if self.tools.is_known(&directive.tool) => {
                    self.set_state(AgentState::Processing);
                    debug!(persona = %self.persona.name, turn, tool = %directive.tool, "tool turn");
                    tags.insert(format!("tool:{}", directive.tool));
                    history.push(Message::assistant(response.content.clone()));
                    let observation = match self.tools.invoke(&directive.tool, directive.args).await
                    {
                        Ok(value) => format!("Tool {} result: {value}", directive.tool),
                        Err(err) => format!("Tool {} error: {err}", directive.tool),
                    };
                    history.push(Message::user(observation));
                }
                // Malformed or unknown-tool payloads are a final answer.
                _ => {
                    self.set_state(AgentState::Reviewing);
                    let answer = parse_final(&response.content);
                    let detail: Vec<String> = answer
                        .reasoning
                        .lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(str::to_string)
                        .collect();
                    let summary = detail
                        .first()
                        .cloned()
                        .unwrap_or_else(|| format!("{} verdict: {}", self.persona.name, answer.verdict));
                    self.set_state(AgentState::Complete);
                    return AgentResult {
                        persona: self.persona.name.clone(),
                        verdict: answer.verdict,
                        confidence: answer.confidence,
                        summary,
                        detail,
                        tags: tags.into_iter().collect(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        cost_usd,
                        state: AgentState::Complete,
                    };
                }
            }
        }

        self.degraded(
            format!("no final answer within {MAX_TURNS} turns"),
            tags,
            started,
            cost_usd,
        )
    }

    fn system_prompt(&self, snapshot: &ContextSnapshot) -> String {
        let mut prompt = format!("{}\n\n{}\n", self.persona.role, snapshot.prompt_block());
        if !self.tools.is_empty() {
            prompt.push_str(&format!(
                "\n{}\n\
                 To call a tool, reply with exactly one JSON object of the form \
                 {{\"tool\": \"<name>\", \"args\": {{...}}}} and nothing else.\n",
                self.tools.catalog()
            ));
        }
        prompt.push_str(
            "\nWhen you have your answer, end your reply with two lines:\n\
             VERDICT: yes | no | maybe | needs-data\n\
             CONFIDENCE: <0-100>",
        );
        prompt
    }

    fn degraded(
        &self,
        summary: String,
        tags: std::collections::BTreeSet<String>,
        started: Instant,
        cost_usd: f64,
    ) -> AgentResult {
        self.set_state(AgentState::Error);
        AgentResult {
            persona: self.persona.name.clone(),
            verdict: Verdict::Maybe,
            confidence: 50,
            summary,
            detail: Vec::new(),
            tags: tags.into_iter().collect(),
            duration_ms: started.elapsed().as_millis() as u64,
            cost_usd,
            state: AgentState::Error,
        }
    }

    fn set_state(&self, state: AgentState) {
        debug!(persona = %self.persona.name, %state, "agent state");
        if let Some(sink) = &self.on_state {
            sink(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{built_in_registry, ToolError, ToolRegistry, ToolSpec};
    use async_trait::async_trait;
    use routing::providers::{ProviderAdapter, StreamHandle};
    use routing::{ChatResponse, GuardedProvider, RouteError, RouterOptions, TokenUsage};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Adapter that replays canned replies and records requests.
    struct CannedAdapter {
        replies: Mutex<VecDeque<String>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl CannedAdapter {
        fn new(replies: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().map(String::from).collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ProviderAdapter for CannedAdapter {
        fn name(&self) -> &str {
            "canned"
        }

        fn default_model(&self) -> &str {
            "m-test"
        }

        async fn check(&self) -> Result<(), String> {
            Ok(())
        }

        async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, RouteError> {
            self.requests.lock().unwrap().push(request.clone());
            let content = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "VERDICT: maybe\nCONFIDENCE: 50".into());
            Ok(ChatResponse {
                content,
                model: request.model.clone(),
                provider: "canned".into(),
                usage: Some(TokenUsage::new(50, 20)),
                latency_ms: 5,
            })
        }

        async fn stream(&self, _request: &ChatRequest) -> Result<StreamHandle, RouteError> {
            Err(RouteError::unavailable("canned", "no streaming in tests"))
        }
    }

    fn router_over(adapter: Arc<CannedAdapter>) -> Arc<ProviderRouter> {
        Arc::new(ProviderRouter::new(
            vec![GuardedProvider::new(adapter, 4, Duration::from_secs(5))],
            RouterOptions {
                cache_enabled: false,
                ..Default::default()
            },
        ))
    }

    fn runner(adapter: Arc<CannedAdapter>, tools: ToolRegistry) -> AgentRunner {
        AgentRunner::new(
            Persona::new("skeptic", "You doubt things."),
            router_over(adapter),
            Arc::new(tools),
            "m-test",
        )
    }

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot::new(10, 1, 1)
    }

    #[tokio::test]
    async fn test_immediate_final_answer() {
        let adapter = CannedAdapter::new(vec!["Risk is low.\nVERDICT: yes\nCONFIDENCE: 80"]);
        let result = runner(adapter.clone(), built_in_registry(snapshot()))
            .run("ship it?", &snapshot())
            .await;

        assert_eq!(result.verdict, Verdict::Yes);
        assert_eq!(result.confidence, 80);
        assert_eq!(result.state, AgentState::Complete);
        assert_eq!(result.summary, "Risk is low.");
        assert!(result.tags.iter().any(|t| t == "provider:canned"));

        // Exactly one leading system message in runner-built requests.
        let requests = adapter.requests.lock().unwrap();
        let messages = &requests[0].messages;
        assert_eq!(messages[0].role, routing::Role::System);
        assert_eq!(
            messages.iter().filter(|m| m.role == routing::Role::System).count(),
            1
        );
        assert_eq!(messages[1].content, "ship it?");
    }

    #[tokio::test]
    async fn test_tool_turn_then_final() {
        let adapter = CannedAdapter::new(vec![
            r#"{"tool": "context_stats", "args": {}}"#,
            "Context looks healthy.\nVERDICT: yes\nCONFIDENCE: 75",
        ]);
        let result = runner(adapter.clone(), built_in_registry(snapshot()))
            .run("ship it?", &snapshot())
            .await;

        assert_eq!(result.verdict, Verdict::Yes);
        assert!(result.tags.iter().any(|t| t == "tool:context_stats"));

        // The tool observation came back as a user turn.
        let requests = adapter.requests.lock().unwrap();
        let second = &requests[1].messages;
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].role, routing::Role::Assistant);
        assert_eq!(second[3].role, routing::Role::User);
        assert!(second[3].content.contains("Tool context_stats result"));
    }

    #[tokio::test]
    async fn test_unknown_tool_payload_is_a_final_answer() {
        let adapter = CannedAdapter::new(vec![r#"{"tool": "fabricated", "args": {}}"#]);
        let result = runner(adapter.clone(), built_in_registry(snapshot()))
            .run("ship it?", &snapshot())
            .await;

        // Fell through to verdict parsing; the JSON text has no markers.
        assert_eq!(result.verdict, Verdict::Maybe);
        assert_eq!(result.confidence, 50);
        assert_eq!(result.state, AgentState::Complete);
        assert_eq!(adapter.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_turn_limit_degrades() {
        let directive = r#"{"tool": "context_stats", "args": {}}"#;
        let adapter = CannedAdapter::new(vec![directive; MAX_TURNS]);
        let result = runner(adapter.clone(), built_in_registry(snapshot()))
            .run("ship it?", &snapshot())
            .await;

        assert_eq!(result.verdict, Verdict::Maybe);
        assert_eq!(result.confidence, 50);
        assert_eq!(result.state, AgentState::Error);
        assert!(result.summary.contains("5 turns"));
        assert_eq!(adapter.requests.lock().unwrap().len(), MAX_TURNS);
    }

    #[tokio::test]
    async fn test_tool_error_becomes_observation_not_failure() {
        let mut tools = ToolRegistry::new();
        #[derive(serde::Deserialize, schemars::JsonSchema)]
        struct NoArgs {}
        tools.register(ToolSpec::new::<NoArgs>("broken", "always fails"), |_| {
            Box::pin(async { Err(ToolError::Failed("boom".into())) })
        });

        let adapter = CannedAdapter::new(vec![
            r#"{"tool": "broken", "args": {}}"#,
            "Fine without it.\nVERDICT: no\nCONFIDENCE: 60",
        ]);
        let result = runner(adapter.clone(), tools).run("ship it?", &snapshot()).await;

        assert_eq!(result.verdict, Verdict::No);
        assert_eq!(result.state, AgentState::Complete);
        let requests = adapter.requests.lock().unwrap();
        assert!(requests[1].messages[3].content.contains("Tool broken error"));
    }

    #[tokio::test]
    async fn test_router_exhaustion_degrades() {
        let router = Arc::new(ProviderRouter::new(vec![], RouterOptions::default()));
        let runner = AgentRunner::new(
            Persona::new("skeptic", "You doubt things."),
            router,
            Arc::new(built_in_registry(snapshot())),
            "m-test",
        );
        let result = runner.run("ship it?", &snapshot()).await;

        assert_eq!(result.verdict, Verdict::Maybe);
        assert_eq!(result.confidence, 50);
        assert_eq!(result.state, AgentState::Error);
        assert!(result.summary.contains("no provider"));
    }

    #[tokio::test]
    async fn test_state_sink_sees_terminal_state() {
        let seen: Arc<Mutex<Vec<AgentState>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            Arc::new(move |state| seen.lock().unwrap().push(state)) as StateSink
        };

        let adapter = CannedAdapter::new(vec!["VERDICT: yes\nCONFIDENCE: 90"]);
        let result = runner(adapter, built_in_registry(snapshot()))
            .with_state_sink(sink)
            .run("ship it?", &snapshot())
            .await;

        assert_eq!(result.state, AgentState::Complete);
        let states = seen.lock().unwrap();
        assert_eq!(states.first(), Some(&AgentState::Analyzing));
        assert_eq!(states.last(), Some(&AgentState::Complete));
    }
}
