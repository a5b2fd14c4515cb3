//! Error types for the agent loop and its collaborators
//!
//! Fatal errors (`AgentError`) abort a resolution round. Capability errors
//! are recovered by the fan-out and rendered into tool-result turns.

use std::time::Duration;

use thiserror::Error;

use crate::agent::state::ConversationState;

/// Errors that abort a resolution round.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A tool-call continuation arrived for an index no delta ever opened.
    #[error("malformed stream: tool call continuation at index {index} has no opening delta")]
    MalformedStream { index: usize },

    /// The model asked for a capability the registry does not hold.
    #[error("model requested unknown capability '{name}'")]
    UnknownCapability { name: String },

    #[error("delegation depth {depth} exceeds maximum of {max}")]
    DelegationDepthExceeded { depth: usize, max: usize },

    #[error("no final answer after {rounds} resolution rounds")]
    RoundLimitExceeded { rounds: usize },

    #[error("completion call failed: {0}")]
    Completion(#[from] ClientError),
}

impl AgentError {
    /// Stable machine-readable code for transport layers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedStream { .. } => "malformed_stream",
            Self::UnknownCapability { .. } => "unknown_capability",
            Self::DelegationDepthExceeded { .. } => "delegation_depth_exceeded",
            Self::RoundLimitExceeded { .. } => "round_limit_exceeded",
            Self::Completion(_) => "completion_failed",
        }
    }
}

/// A fatal loop error together with the state accumulated before it.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ResolutionError {
    pub source: AgentError,
    pub partial_state: ConversationState,
}

/// Errors raised by a single capability invocation.
///
/// These never abort the round; the fan-out turns them into tool-result
/// content via [`CapabilityError::render`].
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),

    #[error("upstream call failed: {0}")]
    Upstream(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("delegation depth {depth} exceeds maximum of {max}")]
    DelegationDepthExceeded { depth: usize, max: usize },

    #[error("panicked: {0}")]
    Panicked(String),
}

impl CapabilityError {
    pub fn invalid_arguments(msg: impl std::fmt::Display) -> Self {
        Self::InvalidArguments(msg.to_string())
    }

    pub fn execution(msg: impl std::fmt::Display) -> Self {
        Self::Execution(msg.to_string())
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::Execution(_) => "execution_failed",
            Self::Upstream(_) => "upstream_failed",
            Self::Timeout(_) => "timeout",
            Self::DelegationDepthExceeded { .. } => "delegation_depth_exceeded",
            Self::Panicked(_) => "panicked",
        }
    }

    /// Tool-result content describing this failure.
    pub fn render(&self, capability: &str) -> String {
        format!("Error: capability '{}' failed: {}", capability, self)
    }
}

/// Registry construction errors. These never reach the loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no capabilities available for the agent")]
    Empty,

    #[error("all capabilities are missing or invalid")]
    AllMissing,

    #[error("capability '{name}' is registered more than once")]
    Duplicate { name: String },

    #[error("capability '{name}' has an invalid parameter schema: {reason}")]
    InvalidSchema { name: String, reason: String },
}

/// Errors from the model-completion client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("event stream error: {0}")]
    EventStream(String),

    #[error("invalid completion chunk: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("upstream error: {0}")]
    Api(String),
}

/// State blob validation failures.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state must be a JSON object")]
    NotAnObject,

    #[error("'{key}' is not a valid turn list: {source}")]
    InvalidHistory {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("sub-state '{name}' is invalid: {source}")]
    InvalidSubState {
        name: String,
        #[source]
        source: Box<StateError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_error_render_names_capability() {
        let err = CapabilityError::Upstream("connection refused".into());
        assert_eq!(
            err.render("web_search_agent"),
            "Error: capability 'web_search_agent' failed: upstream call failed: connection refused"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = CapabilityError::Timeout(Duration::from_secs(300));
        assert_eq!(err.to_string(), "timed out after 300s");
        assert_eq!(err.error_code(), "timeout");
    }

    #[test]
    fn test_resolution_error_displays_source() {
        let err = ResolutionError {
            source: AgentError::UnknownCapability {
                name: "ghost".into(),
            },
            partial_state: ConversationState::default(),
        };
        assert_eq!(err.to_string(), "model requested unknown capability 'ghost'");
    }
}
