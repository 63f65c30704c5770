//! Configuration file support for the agent manager
//!
//! Loads and validates agent configuration from TOML files.
//! Default location: /etc/neutron/services/f5/lbaas-agentd.toml

use std::fs;
use std::path::Path;
use std::time::Duration;

use lbaas_agent_common::{AgentError, AgentIdentity, AgentResult};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/neutron/services/f5/lbaas-agentd.toml";

/// Identity of this agent within its environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Agent host string, as registered with the control plane
    #[serde(default)]
    pub host: String,

    /// Environment prefix shared by the agents of one environment
    #[serde(default = "default_environment_prefix")]
    pub environment_prefix: String,

    /// Environment group number
    #[serde(default = "default_environment_group_number")]
    pub environment_group_number: u32,
}

/// Periodic orphan reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSection {
    /// Run the periodic clean-orphans cycle
    #[serde(default = "default_reconcile_enabled")]
    pub enabled: bool,

    /// Seconds between two reconciliation passes
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
}

/// Complete agent manager configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub reconcile: ReconcileSection,
}

fn default_environment_prefix() -> String {
    "Project".to_string()
}

fn default_environment_group_number() -> u32 {
    1
}

fn default_reconcile_enabled() -> bool {
    true
}

fn default_reconcile_interval() -> u64 {
    300
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            environment_prefix: default_environment_prefix(),
            environment_group_number: default_environment_group_number(),
        }
    }
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            enabled: default_reconcile_enabled(),
            interval_secs: default_reconcile_interval(),
        }
    }
}

impl AgentConfig {
    /// Builds a config for `host` with every other setting defaulted.
    pub fn for_host(host: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.agent.host = host.into();
        config
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> AgentResult<Self> {
        toml::from_str(content)
            .map_err(|e| AgentError::invalid_config("toml", e.to_string()))
    }

    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> AgentResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content).map_err(|e| {
                AgentError::invalid_config(path.display().to_string(), e.to_string())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(AgentError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> AgentResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Identity used for the authoritative-agent check
    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity::new(
            self.agent.environment_prefix.clone(),
            self.agent.environment_group_number,
            self.agent.host.clone(),
        )
    }

    /// Get reconciliation interval as Duration
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile.interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> AgentResult<()> {
        if self.agent.host.trim().is_empty() {
            return Err(AgentError::invalid_config("agent.host", "must not be empty"));
        }

        if self.agent.environment_prefix.trim().is_empty() {
            return Err(AgentError::invalid_config(
                "agent.environment_prefix",
                "must not be empty",
            ));
        }

        if self.reconcile.interval_secs == 0 {
            return Err(AgentError::invalid_config(
                "reconcile.interval_secs",
                "must be > 0",
            ));
        }

        Ok(())
    }
}
