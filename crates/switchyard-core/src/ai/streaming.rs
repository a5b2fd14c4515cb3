//! Streaming chunk model and `chat.completion.chunk` decoding

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ai::types::Attachment;
use crate::constants::STAGES_KEY;
use crate::error::ClientError;

/// Fragment of a tool call as streamed by the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    /// Delta that opens a call at `index`.
    pub fn open(index: usize, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: None,
        }
    }

    /// Argument continuation for the call at `index`.
    pub fn arguments(index: usize, fragment: impl Into<String>) -> Self {
        Self {
            index,
            arguments: Some(fragment.into()),
            ..Default::default()
        }
    }
}

/// A stage as reported by another deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageSnapshot {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Content is the full text so far (from `state.stages`) rather than a
    /// streamed fragment (from `custom_content.stages`).
    #[serde(skip)]
    pub cumulative: bool,
}

impl StageSnapshot {
    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some("completed")
    }
}

/// One decoded streaming event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionChunk {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub attachments: Vec<Attachment>,
    pub state: Option<Value>,
    pub stages: Vec<StageSnapshot>,
    pub finish_reason: Option<String>,
}

impl CompletionChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn tool_calls(deltas: Vec<ToolCallDelta>) -> Self {
        Self {
            tool_calls: deltas,
            ..Default::default()
        }
    }

    /// Decode an OpenAI/DIAL `chat.completion.chunk` (or a non-streaming
    /// `chat.completion`, whose `message` is read like a delta).
    pub fn from_json(value: &Value) -> Result<Self, ClientError> {
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ClientError::Api(message));
        }

        let mut chunk = Self::default();
        let Some(choice) = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
        else {
            return Ok(chunk);
        };

        let delta = choice.get("delta").or_else(|| choice.get("message"));

        chunk.finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(delta) = delta {
            chunk.content = delta
                .get("content")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                chunk.tool_calls = calls
                    .iter()
                    .enumerate()
                    .map(|(position, call)| parse_tool_call_delta(position, call))
                    .collect();
            }

            if let Some(custom) = delta.get("custom_content") {
                chunk.absorb_custom_content(custom);
            }
        }

        if let Some(custom) = choice.get("custom_content") {
            chunk.absorb_custom_content(custom);
        }

        Ok(chunk)
    }

    fn absorb_custom_content(&mut self, custom: &Value) {
        if let Some(attachments) = custom.get("attachments").and_then(Value::as_array) {
            self.attachments.extend(attachments.iter().filter_map(|att| {
                serde_json::from_value::<Attachment>(att.clone())
                    .map_err(|e| tracing::warn!("Skipping malformed attachment: {}", e))
                    .ok()
            }));
        }

        if let Some(stages) = custom.get(STAGES_KEY) {
            self.stages.extend(parse_stages(stages, false));
        }

        if let Some(state) = custom.get("state").filter(|s| !s.is_null()) {
            if let Some(stages) = state.get(STAGES_KEY) {
                self.stages.extend(parse_stages(stages, true));
            }
            self.state = Some(state.clone());
        }
    }
}

fn parse_tool_call_delta(position: usize, call: &Value) -> ToolCallDelta {
    let function = call.get("function");
    ToolCallDelta {
        index: call
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(position),
        id: call
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        name: function
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        arguments: function
            .and_then(|f| f.get("arguments"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn parse_stages(stages: &Value, cumulative: bool) -> Vec<StageSnapshot> {
    let Some(entries) = stages.as_array() else {
        tracing::warn!("Ignoring non-array stages payload");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            serde_json::from_value::<StageSnapshot>(entry.clone())
                .map(|stage| StageSnapshot { cumulative, ..stage })
                .map_err(|e| tracing::warn!("Skipping malformed stage entry: {}", e))
                .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decodes_content_delta() {
        let chunk = CompletionChunk::from_json(&json!({
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": "Hel"}}]
        }))
        .unwrap();
        assert_eq!(chunk.content.as_deref(), Some("Hel"));
        assert!(chunk.tool_calls.is_empty());
    }

    #[test]
    fn test_decodes_tool_call_deltas() {
        let chunk = CompletionChunk::from_json(&json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "type": "function",
                 "function": {"name": "simple_calculator", "arguments": ""}},
                {"index": 1, "function": {"arguments": "{\"pro"}}
            ]}}]
        }))
        .unwrap();

        assert_eq!(chunk.tool_calls.len(), 2);
        assert_eq!(chunk.tool_calls[0], {
            let mut d = ToolCallDelta::open(0, "call_a", "simple_calculator");
            d.arguments = Some(String::new());
            d
        });
        assert_eq!(chunk.tool_calls[1], ToolCallDelta::arguments(1, "{\"pro"));
    }

    #[test]
    fn test_decodes_custom_content_from_choice_and_state() {
        let chunk = CompletionChunk::from_json(&json!({
            "choices": [{
                "delta": {},
                "custom_content": {
                    "attachments": [{"type": "image/png", "url": "files/x.png"}],
                    "stages": [{"index": 0, "name": "Search", "status": null}],
                    "state": {
                        "tool_call_history": [],
                        "stages": [{"index": 1, "content": "done", "status": "completed"}]
                    }
                }
            }]
        }))
        .unwrap();

        assert_eq!(chunk.attachments.len(), 1);
        assert_eq!(chunk.stages.len(), 2);
        assert_eq!(chunk.stages[0].name.as_deref(), Some("Search"));
        assert!(chunk.stages[1].is_completed());
        assert!(!chunk.stages[0].cumulative);
        assert!(chunk.stages[1].cumulative);
        assert!(chunk.state.is_some());
    }

    #[test]
    fn test_error_payload_is_api_error() {
        let err = CompletionChunk::from_json(&json!({
            "error": {"message": "deployment not found", "code": "404"}
        }))
        .unwrap_err();
        assert!(matches!(err, ClientError::Api(msg) if msg == "deployment not found"));
    }

    #[test]
    fn test_empty_choices_yields_empty_chunk() {
        let chunk = CompletionChunk::from_json(&json!({"choices": [], "usage": {}})).unwrap();
        assert_eq!(chunk, CompletionChunk::default());
    }
}
