//! Request and response types for the chat-completions API

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use switchyard_core::agent::ResponseEvent;
use switchyard_core::ai::types::{Attachment, Turn};
use switchyard_core::ResolutionError;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<Turn>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

// ============================================================================
// Streaming frames
// ============================================================================

/// Shared envelope fields of every chunk in one response.
#[derive(Debug, Clone)]
pub struct ChunkFrame {
    pub id: String,
    pub created: i64,
    pub model: String,
}

impl ChunkFrame {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
        }
    }

    /// A `chat.completion.chunk` carrying `delta`.
    pub fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }

    pub fn event(&self, event: &ResponseEvent) -> Value {
        self.chunk(event_delta(event), None)
    }

    pub fn stop(&self) -> Value {
        self.chunk(json!({}), Some("stop"))
    }

    /// Final non-streaming `chat.completion` body.
    pub fn completion(&self, message: Value) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": "stop",
            }],
        })
    }
}

/// `{ "error": { message, type } }` frame for a failed resolution.
pub fn error_frame(err: &ResolutionError) -> Value {
    json!({
        "error": {
            "message": err.to_string(),
            "type": err.source.error_code(),
        }
    })
}

/// Chunk delta for one response event.
pub fn event_delta(event: &ResponseEvent) -> Value {
    match event {
        ResponseEvent::Content { text } => json!({ "content": text }),
        ResponseEvent::Attachment { attachment } => {
            json!({ "custom_content": { "attachments": [attachment] } })
        }
        ResponseEvent::StageOpened { index, name } => stage_delta(json!({
            "index": index,
            "name": name,
        })),
        ResponseEvent::StageContent { index, text } => stage_delta(json!({
            "index": index,
            "content": text,
        })),
        ResponseEvent::StageAttachment { index, attachment } => stage_delta(json!({
            "index": index,
            "attachments": [attachment],
        })),
        ResponseEvent::StageClosed { index, status } => stage_delta(json!({
            "index": index,
            "status": status.as_str(),
        })),
        ResponseEvent::State { state } => json!({ "custom_content": { "state": state } }),
    }
}

fn stage_delta(stage: Value) -> Value {
    json!({ "custom_content": { "stages": [stage] } })
}

// ============================================================================
// Non-streaming aggregation
// ============================================================================

#[derive(Debug, Default)]
struct StageSummary {
    name: Option<String>,
    content: String,
    attachments: Vec<Attachment>,
    status: Option<&'static str>,
}

/// Folds response events into a single assistant message.
#[derive(Debug, Default)]
pub struct ResponseAggregate {
    content: String,
    attachments: Vec<Attachment>,
    stages: BTreeMap<usize, StageSummary>,
    state: Option<Value>,
}

impl ResponseAggregate {
    pub fn apply(&mut self, event: ResponseEvent) {
        match event {
            ResponseEvent::Content { text } => self.content.push_str(&text),
            ResponseEvent::Attachment { attachment } => self.attachments.push(attachment),
            ResponseEvent::StageOpened { index, name } => {
                self.stages.entry(index).or_default().name = Some(name);
            }
            ResponseEvent::StageContent { index, text } => {
                self.stages.entry(index).or_default().content.push_str(&text);
            }
            ResponseEvent::StageAttachment { index, attachment } => {
                self.stages.entry(index).or_default().attachments.push(attachment);
            }
            ResponseEvent::StageClosed { index, status } => {
                self.stages.entry(index).or_default().status = Some(status.as_str());
            }
            ResponseEvent::State { state } => self.state = Some(state),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn into_message(self) -> Value {
        let mut custom = Map::new();
        if !self.attachments.is_empty() {
            custom.insert("attachments".into(), json!(self.attachments));
        }
        if !self.stages.is_empty() {
            let stages: Vec<Value> = self
                .stages
                .into_iter()
                .map(|(index, stage)| {
                    json!({
                        "index": index,
                        "name": stage.name,
                        "content": stage.content,
                        "attachments": stage.attachments,
                        "status": stage.status,
                    })
                })
                .collect();
            custom.insert("stages".into(), Value::Array(stages));
        }
        if let Some(state) = self.state {
            custom.insert("state".into(), state);
        }

        let mut message = json!({
            "role": "assistant",
            "content": self.content,
        });
        if !custom.is_empty() {
            message["custom_content"] = Value::Object(custom);
        }
        message
    }
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub deployments: Vec<String>,
}
