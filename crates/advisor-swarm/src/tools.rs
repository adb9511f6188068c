//! Tool registry for the agent loop: named handlers with schema-described
//! arguments, enumerable as a catalog for system prompts and invocable by
//! name with a JSON argument object.

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::Deserialize;
use thiserror::Error;

use crate::snapshot::ContextSnapshot;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("tool failed: {0}")]
    Failed(String),
}

/// Declaration of one tool as shown to the model.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the argument object.
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    pub fn new<P: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::to_value(schemars::schema_for!(P))
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

type ToolHandler =
    Box<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, ToolError>> + Send + Sync>;

pub struct Tool {
    pub spec: ToolSpec,
    handler: ToolHandler,
}

/// The set of tools one swarm run exposes to its agents.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, spec: ToolSpec, handler: F)
    where
        F: Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, ToolError>>
            + Send
            + Sync
            + 'static,
    {
        self.tools.push(Tool {
            spec,
            handler: Box::new(handler),
        });
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.spec.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Catalog text injected into system prompts.
    pub fn catalog(&self) -> String {
        let mut out = String::from("## Available tools\n");
        for tool in &self.tools {
            out.push_str(&format!(
                "- {}: {} (args schema: {})\n",
                tool.spec.name, tool.spec.description, tool.spec.parameters
            ));
        }
        out
    }

    pub async fn invoke(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.spec.name == name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        (tool.handler)(args).await
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct NoArgs {}

/// The built-in board tools, answering from the run's shared snapshot.
pub fn built_in_registry(snapshot: ContextSnapshot) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(
        ToolSpec::new::<NoArgs>(
            "context_stats",
            "Counts of indexed workspace files and integrations",
        ),
        move |_args| {
            Box::pin(async move {
                serde_json::to_value(snapshot).map_err(|e| ToolError::Failed(e.to_string()))
            })
        },
    );

    registry.register(
        ToolSpec::new::<NoArgs>(
            "integration_status",
            "Integration health summary for the workspace",
        ),
        move |_args| {
            Box::pin(async move {
                Ok(serde_json::json!({
                    "configured": snapshot.integration_count,
                    "healthy": snapshot.healthy_integrations,
                    "health_score": snapshot.health_score,
                }))
            })
        },
    );

    registry
}
