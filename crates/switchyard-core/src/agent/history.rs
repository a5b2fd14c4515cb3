//! Message list reconstruction
//!
//! Two directions:
//! - `prepare_messages` builds what an agent sends to its own model: the
//!   system prompt, the visible conversation with each assistant turn's
//!   prior tool-call history replayed in front of it, and the rounds of the
//!   current resolution.
//! - `delegated_messages` builds what a sub-agent proxy sends to its target
//!   agent, replaying only the history namespaced to that capability.

use std::collections::HashSet;

use crate::ai::types::{attachments_for_api, CustomContent, Role, Turn};

use super::state::ConversationState;

/// Messages for one resolution round.
pub(crate) fn prepare_messages(
    system_prompt: &str,
    incoming: &[Turn],
    state: &ConversationState,
) -> Vec<Turn> {
    let mut messages = Vec::with_capacity(incoming.len() + state.tool_call_history().len() + 1);
    messages.push(Turn::system(system_prompt));

    for turn in incoming {
        match turn.role {
            Role::System => {
                tracing::debug!("Dropping caller-supplied system turn");
            }
            Role::Assistant => {
                if let Some(prior) = turn.state().and_then(ConversationState::from_turn_state) {
                    messages.extend(prior.tool_call_history().iter().cloned());
                }
                messages.push(turn.without_state());
            }
            _ => messages.push(turn.clone()),
        }
    }

    messages.extend(state.tool_call_history().iter().cloned());
    retain_answered_tool_turns(messages)
}

/// Messages sent to the agent behind `capability`.
///
/// With `propagate_history`, every outer assistant turn whose state holds a
/// sub-state for `capability` contributes, in order: the user turn right
/// before it (attachments reduced to url/type/title), the tool turns of the
/// namespaced history, and the assistant turn itself with its state
/// replaced by that sub-state. The prompt always comes last, carrying the
/// attachments of the outer conversation's final user turn.
pub fn delegated_messages(
    capability: &str,
    history: &[Turn],
    prompt: &str,
    propagate_history: bool,
) -> Vec<Turn> {
    let mut messages = Vec::new();

    if propagate_history {
        for (position, turn) in history.iter().enumerate() {
            if turn.role != Role::Assistant {
                continue;
            }
            let Some(sub_state) = turn
                .state()
                .and_then(|state| state.get(capability))
                .filter(|sub| sub.get(crate::constants::TOOL_CALL_HISTORY_KEY).is_some())
            else {
                continue;
            };
            let Some(namespaced) = ConversationState::from_turn_state(sub_state) else {
                continue;
            };

            if let Some(user) = position
                .checked_sub(1)
                .and_then(|prev| history.get(prev))
                .filter(|prev| prev.role == Role::User)
            {
                messages.push(api_user_turn(&user.content, user.attachments()));
            }

            messages.extend(
                namespaced
                    .tool_call_history()
                    .iter()
                    .filter(|t| t.role == Role::Tool)
                    .cloned(),
            );

            let mut assistant = turn.without_state();
            assistant.custom_content = Some(CustomContent {
                attachments: attachments_for_api(turn.attachments()),
                state: Some(sub_state.clone()),
            });
            messages.push(assistant);
        }
    }

    let carried = history
        .last()
        .filter(|last| last.role == Role::User)
        .map(|last| last.attachments())
        .unwrap_or_default();
    messages.push(api_user_turn(prompt, carried));

    messages
}

fn api_user_turn(content: &str, attachments: &[crate::ai::types::Attachment]) -> Turn {
    Turn::user(content).with_attachments(attachments_for_api(attachments))
}

/// Keep a tool turn only when it answers a call of the assistant turn
/// directly before it, once.
fn retain_answered_tool_turns(messages: Vec<Turn>) -> Vec<Turn> {
    let mut pending: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(messages.len());

    for turn in messages {
        match turn.role {
            Role::Tool => {
                let answered = turn
                    .tool_call_id
                    .as_ref()
                    .is_some_and(|id| pending.remove(id));
                if !answered {
                    tracing::warn!(tool_call_id = ?turn.tool_call_id, "Dropping tool turn with no matching call");
                    continue;
                }
            }
            Role::Assistant => {
                pending = turn.tool_calls.iter().map(|call| call.id.clone()).collect();
            }
            _ => pending.clear(),
        }
        kept.push(turn);
    }

    kept
}
