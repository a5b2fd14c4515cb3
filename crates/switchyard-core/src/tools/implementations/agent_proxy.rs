//! Agent proxy tool - calls another agent deployment as a capability
//!
//! The outbound message list is rebuilt from the outer history (see
//! [`delegated_messages`]). While the target streams, its content goes live
//! into this call's stage, its attachments go to the caller's response and
//! its stages are mirrored into the caller's stage tree.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::choice::Choice;
use crate::agent::history::delegated_messages;
use crate::agent::stage::Stage;
use crate::agent::state::ConversationState;
use crate::agent::stream::process_stream;
use crate::ai::client::{CompletionClient, CompletionRequest};
use crate::ai::streaming::StageSnapshot;
use crate::ai::types::Attachment;
use crate::constants::STAGES_KEY;
use crate::error::CapabilityError;
use crate::tools::registry::{parse_params, Capability, ProgressPolicy, ToolContext, ToolOutput};

pub struct AgentProxyTool {
    name: String,
    deployment: String,
    description: String,
    display_name: String,
    client: Arc<dyn CompletionClient>,
    max_delegation_depth: usize,
}

#[derive(Deserialize)]
struct Params {
    prompt: String,
    #[serde(default)]
    propagate_history: bool,
}

impl AgentProxyTool {
    pub fn new(
        name: impl Into<String>,
        deployment: impl Into<String>,
        description: impl Into<String>,
        client: Arc<dyn CompletionClient>,
    ) -> Self {
        let name = name.into();
        Self {
            display_name: display_name(&name),
            name,
            deployment: deployment.into(),
            description: description.into(),
            client,
            max_delegation_depth: crate::constants::limits::MAX_DELEGATION_DEPTH,
        }
    }

    pub fn with_max_delegation_depth(mut self, max: usize) -> Self {
        self.max_delegation_depth = max;
        self
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }
}

/// "web_search_agent" -> "Web Search Agent"
fn display_name(name: &str) -> String {
    name.split(['_', '-'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Capability for AgentProxyTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": format!("The request to the {}", self.display_name)
                },
                "propagate_history": {
                    "type": "boolean",
                    "description": format!(
                        "Whether to propagate the history of communication with the {}",
                        self.display_name
                    )
                }
            },
            "required": ["prompt"]
        })
    }

    fn progress_policy(&self) -> ProgressPolicy {
        ProgressPolicy {
            create_stage: true,
            show_request: true,
            show_response: false,
            stage_name: Some(self.display_name.clone()),
        }
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &mut ToolContext,
    ) -> Result<ToolOutput, CapabilityError> {
        let params: Params = parse_params(params)?;

        let nested = ctx.request.nested();
        if nested.delegation_depth > self.max_delegation_depth {
            return Err(CapabilityError::DelegationDepthExceeded {
                depth: nested.delegation_depth,
                max: self.max_delegation_depth,
            });
        }

        let messages = delegated_messages(
            &self.name,
            &ctx.history,
            &params.prompt,
            params.propagate_history,
        );
        tracing::info!(
            capability = %self.name,
            deployment = %self.deployment,
            messages = messages.len(),
            depth = nested.delegation_depth,
            "Delegating to agent"
        );

        let stream = self
            .client
            .stream_completion(CompletionRequest {
                deployment: self.deployment.clone(),
                messages,
                tools: Vec::new(),
                context: nested,
            })
            .await
            .map_err(|e| CapabilityError::Upstream(e.to_string()))?;

        let mut mirror = StageMirror::new(ctx.choice.clone());
        let mut attachments = Vec::new();
        let mut returned_state: Option<Value> = None;
        let stage = &mut ctx.stage;
        let choice = &ctx.choice;

        let result = process_stream(stream, |chunk| {
            if let (Some(text), Some(stage)) = (&chunk.content, stage.as_mut()) {
                stage.append(text);
            }
            for attachment in &chunk.attachments {
                choice.add_attachment(attachment.clone());
                attachments.push(attachment.clone());
            }
            mirror.apply(&chunk.stages);
            if let Some(state) = &chunk.state {
                returned_state = Some(state.clone());
            }
        })
        .await;
        mirror.close_all();

        let output = result.map_err(|e| CapabilityError::Upstream(e.to_string()))?;

        let state = returned_state
            .as_ref()
            .and_then(ConversationState::from_turn_state)
            .map(|mut state| {
                state.remove_extra(STAGES_KEY);
                state
            });

        let mut tool_output = ToolOutput::text(output.content).with_attachments(attachments);
        if let Some(state) = state {
            tool_output = tool_output.with_state(state);
        }
        Ok(tool_output)
    }
}

/// Mirrors stages reported by a callee into the caller's stage tree.
///
/// Keyed by the callee's stage index. Streamed snapshots carry content
/// fragments and are appended as-is; cumulative snapshots (read from the
/// callee's state) append only the part not yet received.
pub struct StageMirror {
    choice: Choice,
    stages: BTreeMap<usize, MirroredStage>,
}

struct MirroredStage {
    stage: Stage,
    received: String,
    attachments: HashSet<String>,
}

impl StageMirror {
    pub fn new(choice: Choice) -> Self {
        Self {
            choice,
            stages: BTreeMap::new(),
        }
    }

    pub fn apply(&mut self, snapshots: &[StageSnapshot]) {
        for snapshot in snapshots {
            self.apply_one(snapshot);
        }
    }

    fn apply_one(&mut self, snapshot: &StageSnapshot) {
        let choice = &self.choice;
        let mirrored = self.stages.entry(snapshot.index).or_insert_with(|| {
            let mut stage = choice.create_stage();
            stage.open(
                snapshot
                    .name
                    .clone()
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| format!("Stage {}", snapshot.index)),
            );
            MirroredStage {
                stage,
                received: String::new(),
                attachments: HashSet::new(),
            }
        });

        if let Some(content) = snapshot.content.as_deref().filter(|c| !c.is_empty()) {
            let received = &mut mirrored.received;
            if !snapshot.cumulative {
                received.push_str(content);
                mirrored.stage.append(content);
            } else if let Some(suffix) = content.strip_prefix(received.as_str()) {
                if !suffix.is_empty() {
                    mirrored.stage.append(suffix);
                    *received = content.to_string();
                }
            } else {
                tracing::warn!(
                    index = snapshot.index,
                    "Cumulative stage content diverged from what was mirrored; skipping"
                );
            }
        }

        for attachment in &snapshot.attachments {
            if mirrored.attachments.insert(attachment_key(attachment)) {
                mirrored.stage.add_attachment(attachment.clone());
            }
        }

        if snapshot.is_completed() {
            mirrored.stage.close();
        } else if snapshot.status.as_deref() == Some("failed") {
            mirrored.stage.fail();
        }
    }

    /// Close whatever the callee left open.
    pub fn close_all(&mut self) {
        for mirrored in self.stages.values_mut() {
            mirrored.stage.close();
        }
    }
}

fn attachment_key(attachment: &Attachment) -> String {
    serde_json::to_string(attachment).unwrap_or_default()
}
