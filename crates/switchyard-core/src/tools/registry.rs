//! Capability registry
//!
//! A capability is anything the model may call by name: a local tool or a
//! proxy to another agent. Registration is validated once, at build time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::choice::Choice;
use crate::agent::stage::Stage;
use crate::agent::state::ConversationState;
use crate::ai::client::RequestContext;
use crate::ai::types::{Attachment, ToolCallRequest, ToolSchema, Turn};
use crate::constants::limits::CAPABILITY_TIMEOUT;
use crate::error::{CapabilityError, RegistryError};

/// How a capability's activity is surfaced while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressPolicy {
    pub create_stage: bool,
    pub show_request: bool,
    pub show_response: bool,
    /// Stage title; the capability name when unset.
    pub stage_name: Option<String>,
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        Self {
            create_stage: true,
            show_request: true,
            show_response: true,
            stage_name: None,
        }
    }
}

impl ProgressPolicy {
    /// No stage at all.
    pub fn silent() -> Self {
        Self {
            create_stage: false,
            show_request: false,
            show_response: false,
            stage_name: None,
        }
    }

    pub fn with_stage_name(mut self, name: impl Into<String>) -> Self {
        self.stage_name = Some(name.into());
        self
    }
}

/// Successful capability output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// State returned by a delegated agent, folded into the caller's
    /// namespaced sub-state map.
    pub state: Option<ConversationState>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_state(mut self, state: ConversationState) -> Self {
        self.state = Some(state);
        self
    }
}

/// Everything a capability sees about the call it is serving.
pub struct ToolContext {
    pub call: ToolCallRequest,
    pub choice: Choice,
    /// Open when the capability's policy asked for a stage.
    pub stage: Option<Stage>,
    pub request: RequestContext,
    /// Full visible history of the outer conversation.
    pub history: Arc<Vec<Turn>>,
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments; must declare `required`.
    fn parameters_schema(&self) -> Value;

    fn progress_policy(&self) -> ProgressPolicy {
        ProgressPolicy::default()
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &mut ToolContext,
    ) -> Result<ToolOutput, CapabilityError>;
}

/// Parse capability parameters, mapping failures to `InvalidArguments`
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, CapabilityError> {
    serde_json::from_value(params)
        .map_err(|e| CapabilityError::invalid_arguments(format!("Invalid parameters: {}", e)))
}

/// Collects capabilities and validates them into a [`CapabilityRegistry`].
pub struct RegistryBuilder {
    entries: Vec<Option<Arc<dyn Capability>>>,
    timeout: Duration,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            timeout: CAPABILITY_TIMEOUT,
        }
    }
}

impl RegistryBuilder {
    pub fn register(mut self, capability: Arc<dyn Capability>) -> Self {
        self.entries.push(Some(capability));
        self
    }

    /// Register a capability that may have failed to initialize.
    pub fn register_optional(mut self, capability: Option<Arc<dyn Capability>>) -> Self {
        self.entries.push(capability);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<CapabilityRegistry, RegistryError> {
        if self.entries.is_empty() {
            return Err(RegistryError::Empty);
        }

        let total = self.entries.len();
        let capabilities: Vec<Arc<dyn Capability>> = self.entries.into_iter().flatten().collect();
        if capabilities.is_empty() {
            return Err(RegistryError::AllMissing);
        }
        if capabilities.len() < total {
            tracing::warn!(
                missing = total - capabilities.len(),
                "Skipping missing capabilities"
            );
        }

        let mut index = HashMap::with_capacity(capabilities.len());
        for (position, capability) in capabilities.iter().enumerate() {
            let name = capability.name().to_string();
            validate_schema(&name, &capability.parameters_schema())?;
            if index.insert(name.clone(), position).is_some() {
                return Err(RegistryError::Duplicate { name });
            }
        }

        Ok(CapabilityRegistry {
            capabilities,
            index,
            timeout: self.timeout,
        })
    }
}

fn validate_schema(name: &str, schema: &Value) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidSchema {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("top-level type must be \"object\""));
    }
    if !schema.get("required").is_some_and(Value::is_array) {
        return Err(invalid("missing \"required\" array"));
    }
    Ok(())
}

/// Validated, immutable set of capabilities for one agent.
pub struct CapabilityRegistry {
    capabilities: Vec<Arc<dyn Capability>>,
    index: HashMap<String, usize>,
    timeout: Duration,
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.index
            .get(name)
            .map(|&position| Arc::clone(&self.capabilities[position]))
    }

    /// Schemas in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.capabilities
            .iter()
            .map(|c| ToolSchema {
                name: c.name().to_string(),
                description: c.description().to_string(),
                parameters: c.parameters_schema(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name()).collect()
    }

    /// Per-call execution timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
