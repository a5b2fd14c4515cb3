//! Switchyard configuration
//!
//! Loaded from the first of: `$SWITCHYARD_CONFIG`, `./switchyard.toml`,
//! `~/.switchyard/config.toml`; built-in defaults otherwise. Environment
//! overrides are applied on top, then the agent topology is validated.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentConfig};
use crate::ai::client::CompletionClient;
use crate::constants::{limits, DEFAULT_API_VERSION};
use crate::tools::implementations::{local_tool, AgentProxyTool, LOCAL_TOOLS};
use crate::tools::registry::CapabilityRegistry;

pub const CONFIG_ENV: &str = "SWITCHYARD_CONFIG";
pub const CONFIG_FILE_NAME: &str = "switchyard.toml";
pub const CONFIG_DIR_NAME: &str = ".switchyard";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwitchyardConfig {
    pub server: ServerSettings,
    pub upstream: UpstreamSettings,
    pub orchestrator: OrchestratorSettings,
    pub agents: Vec<AgentSpec>,
    pub peers: Vec<PeerSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Base URL of the deployments endpoint.
    pub endpoint: String,
    pub api_version: String,
    /// Deployment each agent's own model calls go to.
    pub model_deployment: String,
    /// Used when the caller supplies no key.
    pub api_key: Option<String>,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            model_deployment: "gpt-4o".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub max_rounds: usize,
    pub max_delegation_depth: usize,
    pub capability_timeout_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_rounds: limits::MAX_ROUNDS,
            max_delegation_depth: limits::MAX_DELEGATION_DEPTH,
            capability_timeout_secs: limits::CAPABILITY_TIMEOUT.as_secs(),
        }
    }
}

/// An agent served under `deployment`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    pub deployment: String,
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub peers: Vec<String>,
}

/// A sub-agent proxy capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerSpec {
    /// Capability name shown to the model.
    pub name: String,
    /// Deployment of the target agent.
    pub deployment: String,
    pub description: String,
}

impl Default for SwitchyardConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            upstream: UpstreamSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            agents: default_agents(),
            peers: default_peers(),
        }
    }
}

fn default_peers() -> Vec<PeerSpec> {
    vec![
        PeerSpec {
            name: "calculations_agent".into(),
            deployment: "calculations-agent".into(),
            description: "Calculations Agent. Primary goal is to work with calculations. \
                Equipped with: Simple calculator."
                .into(),
        },
        PeerSpec {
            name: "web_search_agent".into(),
            deployment: "web-search-agent".into(),
            description: "WEB Search Agent. Performs research in WEB based on the user request."
                .into(),
        },
        PeerSpec {
            name: "content_management_agent".into(),
            deployment: "content-management-agent".into(),
            description: "Content Management Agent. Extracts and searches content of user \
                documents (PDF, TXT, CSV)."
                .into(),
        },
    ]
}

fn default_agents() -> Vec<AgentSpec> {
    vec![
        AgentSpec {
            deployment: "calculations-agent".into(),
            system_prompt: "You are a Calculations Agent specialized in mathematical operations \
                and data analysis. Use simple_calculator for arithmetic. Delegate to \
                web_search_agent when you need data from the internet and to \
                content_management_agent when you need content from documents."
                .into(),
            tools: vec!["simple_calculator".into()],
            peers: vec!["web_search_agent".into(), "content_management_agent".into()],
        },
        AgentSpec {
            deployment: "web-search-agent".into(),
            system_prompt: "You are a Web Research Agent specialized in finding, verifying and \
                synthesizing information from the internet. Always include source links. \
                Delegate to calculations_agent for calculations and to \
                content_management_agent for document content."
                .into(),
            tools: Vec::new(),
            peers: vec!["calculations_agent".into(), "content_management_agent".into()],
        },
        AgentSpec {
            deployment: "content-management-agent".into(),
            system_prompt: "You are a Content Management Agent specialized in extracting, \
                analyzing and answering questions from user documents. Delegate to \
                calculations_agent for calculations and to web_search_agent for additional \
                information from the web."
                .into(),
            tools: Vec::new(),
            peers: vec!["calculations_agent".into(), "web_search_agent".into()],
        },
    ]
}

/// Global config directory (~/.switchyard)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

impl SwitchyardConfig {
    /// Locate, parse, override from the environment and validate.
    pub fn load() -> Result<Self> {
        let mut config = match Self::locate() {
            Some(path) => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                tracing::info!("No configuration file found; using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        [PathBuf::from(CONFIG_FILE_NAME), config_dir().join("config.toml")]
            .into_iter()
            .find(|path| path.is_file())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `SWITCHYARD_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(endpoint) = lookup("SWITCHYARD_ENDPOINT") {
            self.upstream.endpoint = endpoint;
        }
        if let Some(port) = lookup("SWITCHYARD_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("SWITCHYARD_PORT is not a valid port: {}", port))?;
        }
        if let Some(key) = lookup("SWITCHYARD_API_KEY") {
            self.upstream.api_key = Some(key);
        }
        if let Some(deployment) = lookup("SWITCHYARD_MODEL_DEPLOYMENT") {
            self.upstream.model_deployment = deployment;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_rounds == 0 {
            bail!("orchestrator.max_rounds must be at least 1");
        }
        if self.agents.is_empty() {
            bail!("no agents configured");
        }

        let mut peer_names = HashSet::new();
        for peer in &self.peers {
            if !peer_names.insert(peer.name.as_str()) {
                bail!("peer '{}' is defined more than once", peer.name);
            }
            if LOCAL_TOOLS.contains(&peer.name.as_str()) {
                bail!("peer '{}' clashes with a local tool name", peer.name);
            }
        }

        let mut deployments = HashSet::new();
        for agent in &self.agents {
            if !deployments.insert(agent.deployment.as_str()) {
                bail!("agent deployment '{}' is defined more than once", agent.deployment);
            }
            if agent.tools.is_empty() && agent.peers.is_empty() {
                bail!("agent '{}' has no tools or peers", agent.deployment);
            }
            if let Some(tool) = agent.tools.iter().find(|t| !LOCAL_TOOLS.contains(&t.as_str())) {
                bail!(
                    "agent '{}' references unknown tool '{}' (available: {})",
                    agent.deployment,
                    tool,
                    LOCAL_TOOLS.join(", ")
                );
            }
            if let Some(peer) = agent.peers.iter().find(|p| !peer_names.contains(p.as_str())) {
                bail!("agent '{}' references unknown peer '{}'", agent.deployment, peer);
            }
        }
        Ok(())
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.orchestrator.capability_timeout_secs)
    }

    /// Build every configured agent, keyed by deployment.
    pub fn build_agents(
        &self,
        client: Arc<dyn CompletionClient>,
    ) -> Result<BTreeMap<String, Arc<Agent>>> {
        let mut agents = BTreeMap::new();

        for spec in &self.agents {
            let mut builder = CapabilityRegistry::builder().with_timeout(self.capability_timeout());
            for tool in &spec.tools {
                builder = builder.register_optional(local_tool(tool));
            }
            for peer_name in &spec.peers {
                let peer = self
                    .peers
                    .iter()
                    .find(|p| &p.name == peer_name)
                    .with_context(|| format!("unknown peer '{}'", peer_name))?;
                builder = builder.register(Arc::new(
                    AgentProxyTool::new(
                        peer.name.clone(),
                        peer.deployment.clone(),
                        peer.description.clone(),
                        Arc::clone(&client),
                    )
                    .with_max_delegation_depth(self.orchestrator.max_delegation_depth),
                ));
            }
            let registry = builder
                .build()
                .with_context(|| format!("invalid capabilities for agent '{}'", spec.deployment))?;

            let agent = Agent::new(
                spec.deployment.clone(),
                spec.system_prompt.clone(),
                Arc::new(registry),
                Arc::clone(&client),
                AgentConfig {
                    model_deployment: self.upstream.model_deployment.clone(),
                    max_rounds: self.orchestrator.max_rounds,
                    max_delegation_depth: self.orchestrator.max_delegation_depth,
                },
            );
            tracing::info!(
                agent = %spec.deployment,
                capabilities = ?agent.registry().names(),
                "Agent ready"
            );
            agents.insert(spec.deployment.clone(), Arc::new(agent));
        }

        Ok(agents)
    }
}
