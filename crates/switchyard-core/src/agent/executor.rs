//! Tool execution fan-out for one resolution round.
//!
//! Handles:
//! - Up-front resolution of every requested capability (unknown names abort)
//! - Concurrent dispatch, one task per call, joined before returning
//! - Per-call failure isolation: errors, timeouts and panics become error
//!   tool turns
//! - Stage lifecycle per capability progress policy
//! - Results returned in request order, not completion order

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinSet;

use crate::ai::client::RequestContext;
use crate::ai::types::{ToolCallRequest, Turn};
use crate::error::{AgentError, CapabilityError};
use crate::tools::registry::{Capability, CapabilityRegistry, ToolContext, ToolOutput};

use super::choice::Choice;
use super::state::ConversationState;

/// Result of one call: the tool turn for history plus any sub-state the
/// capability returned.
#[derive(Debug)]
pub(crate) struct CallOutcome {
    pub turn: Turn,
    pub sub_state: Option<ConversationState>,
}

/// Execute all `calls` concurrently and return their outcomes in request
/// order.
pub(crate) async fn execute_tools(
    registry: &CapabilityRegistry,
    calls: &[ToolCallRequest],
    choice: &Choice,
    request: &RequestContext,
    history: &Arc<Vec<Turn>>,
) -> Result<Vec<CallOutcome>, AgentError> {
    // ── Resolve ────────────────────────────────────────────────
    let capabilities = calls
        .iter()
        .map(|call| {
            registry
                .get(call.name())
                .ok_or_else(|| AgentError::UnknownCapability {
                    name: call.name().to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    // ── Dispatch ───────────────────────────────────────────────
    let timeout = registry.timeout();
    let mut tasks = JoinSet::new();
    for (position, (call, capability)) in calls.iter().zip(capabilities).enumerate() {
        let ctx = ToolContext {
            call: call.clone(),
            choice: choice.clone(),
            stage: None,
            request: request.clone(),
            history: Arc::clone(history),
        };
        tasks.spawn(async move { (position, run_call(capability, ctx, timeout).await) });
    }

    // ── Join ───────────────────────────────────────────────────
    let mut slots: Vec<Option<CallOutcome>> = calls.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((position, outcome)) => slots[position] = Some(outcome),
            Err(e) => tracing::error!("Tool task failed to complete: {}", e),
        }
    }

    Ok(calls
        .iter()
        .zip(slots)
        .map(|(call, slot)| {
            slot.unwrap_or_else(|| {
                let error = CapabilityError::Panicked("task aborted".to_string());
                CallOutcome {
                    turn: Turn::tool_result(call, error.render(call.name())),
                    sub_state: None,
                }
            })
        })
        .collect())
}

async fn run_call(
    capability: Arc<dyn Capability>,
    mut ctx: ToolContext,
    timeout: Duration,
) -> CallOutcome {
    let name = capability.name().to_string();
    let policy = capability.progress_policy();
    let call = ctx.call.clone();

    if policy.create_stage {
        let mut stage = ctx.choice.create_stage();
        stage.open(policy.stage_name.clone().unwrap_or_else(|| name.clone()));
        ctx.stage = Some(stage);
    }

    let params = parse_arguments(&call.function.arguments);

    if policy.show_request {
        if let Some(stage) = ctx.stage.as_mut() {
            stage.append("## Request arguments: \n");
            stage.append(&format_request(&call.function.arguments, params.as_ref().ok()));
        }
    }

    tracing::info!(capability = %name, tool_call_id = %call.id, "Executing capability");

    let result = match params {
        Ok(params) => {
            let execution = AssertUnwindSafe(capability.execute(params, &mut ctx)).catch_unwind();
            match tokio::time::timeout(timeout, execution).await {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => Err(CapabilityError::Panicked(panic_message(panic))),
                Err(_) => Err(CapabilityError::Timeout(timeout)),
            }
        }
        Err(e) => Err(e),
    };

    let (content, attachments, sub_state, failed) = match result {
        Ok(ToolOutput {
            content,
            attachments,
            state,
        }) => (content, attachments, state, false),
        Err(e) => {
            tracing::error!(
                capability = %name,
                tool_call_id = %call.id,
                code = e.error_code(),
                "Capability failed: {}",
                e
            );
            (e.render(&name), Vec::new(), None, true)
        }
    };

    if let Some(mut stage) = ctx.stage.take() {
        if policy.show_response {
            stage.append("## Response: \n");
            stage.append(&content);
        }
        if failed {
            stage.fail();
        } else {
            stage.close();
        }
    }

    CallOutcome {
        turn: Turn::tool_result(&call, content).with_attachments(attachments),
        sub_state,
    }
}

/// Empty argument text is treated as an empty object.
fn parse_arguments(arguments: &str) -> Result<Value, CapabilityError> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(arguments)
        .map_err(|e| CapabilityError::invalid_arguments(format!("arguments are not valid JSON: {}", e)))
}

fn format_request(raw: &str, parsed: Option<&Value>) -> String {
    let body = parsed
        .and_then(|value| serde_json::to_string_pretty(value).ok())
        .unwrap_or_else(|| raw.to_string());
    format!("```json\n{}\n```\n", body)
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
