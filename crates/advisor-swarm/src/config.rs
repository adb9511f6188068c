//! Swarm-level configuration: the routing layer plus what the board
//! needs on top of it (model choice, workspace root, integration list).
//!
//! Defaults come from the environment; an optional TOML file overrides
//! them wholesale.

use std::path::{Path, PathBuf};

use anyhow::Context;
use routing::RoutingConfig;
use serde::{Deserialize, Serialize};

pub const ENV_MODEL: &str = "ADVISOR_MODEL";
pub const ENV_WORKSPACE_ROOT: &str = "ADVISOR_WORKSPACE_ROOT";

/// One external integration whose health feeds the context snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub name: String,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

fn default_healthy() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub routing: RoutingConfig,
    /// Model requested from the chain head. Later chain positions
    /// substitute their own default regardless. Empty string means
    /// "use the default backend's default model".
    pub model: String,
    /// Root scanned for the indexed-file count.
    pub workspace_root: PathBuf,
    pub integrations: Vec<IntegrationConfig>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            routing: RoutingConfig::default(),
            model: std::env::var(ENV_MODEL).unwrap_or_default(),
            workspace_root: std::env::var(ENV_WORKSPACE_ROOT)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            integrations: Vec::new(),
        }
    }
}

impl SwarmConfig {
    /// Environment defaults, overridden by `path` when given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.routing.validate()?;
        for integration in &self.integrations {
            if integration.name.trim().is_empty() {
                return Err("integration name must not be empty".into());
            }
        }
        Ok(())
    }

    /// The model to request, falling back to the default backend's
    /// default model when none is configured.
    pub fn resolved_model(&self) -> String {
        if !self.model.trim().is_empty() {
            return self.model.clone();
        }
        self.routing
            .backends
            .iter()
            .find(|b| b.name == self.routing.default_backend)
            .map(|b| b.default_model.clone())
            .unwrap_or_default()
    }

    /// (name, healthy) pairs in the shape the snapshot source takes.
    pub fn integration_pairs(&self) -> Vec<(String, bool)> {
        self.integrations
            .iter()
            .map(|i| (i.name.clone(), i.healthy))
            .collect()
    }
}
