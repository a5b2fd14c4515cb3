//! Switchyard Core
//!
//! Multi-agent tool-calling orchestration: the agentic "respond or call
//! tools" loop, the capability registry, streamed tool-call reconstruction,
//! concurrent tool fan-out and the sub-agent state propagation protocol.

pub mod agent;
pub mod ai;
pub mod config;
pub mod constants;
pub mod error;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent::{Agent, AgentConfig, AgentOutcome, AgentRequest, Choice, ConversationState};
pub use config::SwitchyardConfig;
pub use error::{AgentError, CapabilityError, ClientError, RegistryError, ResolutionError};
