//! Capabilities for Switchyard agents
//!
//! Provides the capability registry and the built-in implementations.

pub mod implementations;
pub mod registry;

pub use implementations::{local_tool, AgentProxyTool, CalculatorTool, LOCAL_TOOLS};
pub use registry::{
    parse_params, Capability, CapabilityRegistry, ProgressPolicy, RegistryBuilder, ToolContext,
    ToolOutput,
};
