//! Capability implementations
//!
//! - simple_calculator: Evaluate arithmetic expressions
//! - agent proxies: Delegate a prompt to another agent deployment

pub mod agent_proxy;
pub mod calculator;

use std::sync::Arc;

pub use agent_proxy::{AgentProxyTool, StageMirror};
pub use calculator::CalculatorTool;

use super::registry::Capability;

/// Names of the local tools an agent can be configured with.
pub const LOCAL_TOOLS: &[&str] = &["simple_calculator"];

/// Instantiate a local tool by name.
pub fn local_tool(name: &str) -> Option<Arc<dyn Capability>> {
    match name {
        "simple_calculator" => Some(Arc::new(CalculatorTool)),
        _ => None,
    }
}
