//! Conversation state carried on the final assistant turn
//!
//! Wire shape:
//!
//! ```text
//! {
//!   "tool_call_history": [Turn, ...],
//!   "<capability>": { "tool_call_history": [Turn, ...], ... },
//!   ...
//! }
//! ```
//!
//! Every object that holds a `tool_call_history` key is a namespaced
//! sub-state. Other top-level entries are kept verbatim so a blob survives
//! a decode/encode cycle unchanged.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::ai::types::Turn;
use crate::constants::TOOL_CALL_HISTORY_KEY;
use crate::error::StateError;

/// Tool-call history of one resolution chain plus the states returned by
/// delegated agents, keyed by capability name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    tool_call_history: Vec<Turn>,
    sub_states: BTreeMap<String, ConversationState>,
    extra: Map<String, Value>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and validate a state blob.
    pub fn from_value(value: &Value) -> Result<Self, StateError> {
        let object = value.as_object().ok_or(StateError::NotAnObject)?;
        let mut state = Self::default();

        for (key, entry) in object {
            if key == TOOL_CALL_HISTORY_KEY {
                state.tool_call_history = serde_json::from_value(entry.clone()).map_err(|source| {
                    StateError::InvalidHistory {
                        key: key.clone(),
                        source,
                    }
                })?;
            } else if is_sub_state(entry) {
                let sub = Self::from_value(entry).map_err(|source| StateError::InvalidSubState {
                    name: key.clone(),
                    source: Box::new(source),
                })?;
                state.sub_states.insert(key.clone(), sub);
            } else {
                state.extra.insert(key.clone(), entry.clone());
            }
        }

        Ok(state)
    }

    /// Decode a blob found on an incoming turn, logging and discarding it
    /// when it does not validate.
    pub fn from_turn_state(value: &Value) -> Option<Self> {
        match Self::from_value(value) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Ignoring invalid conversation state: {}", e);
                None
            }
        }
    }

    pub fn to_value(&self) -> Value {
        let mut object = self.extra.clone();
        object.insert(
            TOOL_CALL_HISTORY_KEY.to_string(),
            serde_json::to_value(&self.tool_call_history).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        for (name, sub) in &self.sub_states {
            object.insert(name.clone(), sub.to_value());
        }
        Value::Object(object)
    }

    pub fn tool_call_history(&self) -> &[Turn] {
        &self.tool_call_history
    }

    pub fn sub_state(&self, capability: &str) -> Option<&ConversationState> {
        self.sub_states.get(capability)
    }

    pub fn sub_states(&self) -> impl Iterator<Item = (&str, &ConversationState)> {
        self.sub_states.iter().map(|(name, sub)| (name.as_str(), sub))
    }

    pub fn is_empty(&self) -> bool {
        self.tool_call_history.is_empty() && self.sub_states.is_empty() && self.extra.is_empty()
    }

    /// Append one completed round: the assistant turn that issued the calls
    /// followed by its results, in request order.
    pub fn record_round(&mut self, assistant: Turn, results: Vec<Turn>) {
        self.tool_call_history.push(assistant.without_state());
        self.tool_call_history
            .extend(results.into_iter().map(|turn| turn.without_state()));
    }

    /// Fold a delegated agent's returned state under `capability`.
    ///
    /// Repeat calls to the same capability extend the existing history and
    /// merge nested sub-states recursively. A state with no tool-call
    /// history is not recorded.
    pub fn merge_sub_state(&mut self, capability: &str, incoming: ConversationState) {
        if incoming.tool_call_history.is_empty() {
            tracing::debug!(capability, "Skipping sub-state with empty tool-call history");
            return;
        }
        match self.sub_states.get_mut(capability) {
            Some(existing) => existing.merge(incoming),
            None => {
                self.sub_states.insert(capability.to_string(), incoming);
            }
        }
    }

    fn merge(&mut self, other: ConversationState) {
        self.tool_call_history.extend(other.tool_call_history);
        for (name, sub) in other.sub_states {
            self.merge_sub_state(&name, sub);
        }
        self.extra.extend(other.extra);
    }

    /// Drop a non-history top-level entry such as published stages.
    pub fn remove_extra(&mut self, key: &str) -> Option<Value> {
        self.extra.remove(key)
    }
}

fn is_sub_state(entry: &Value) -> bool {
    entry
        .as_object()
        .is_some_and(|object| object.contains_key(TOOL_CALL_HISTORY_KEY))
}
