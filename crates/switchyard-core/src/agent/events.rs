//! Events emitted on a [`Choice`](super::Choice) while a request resolves.

use serde::Serialize;
use serde_json::Value;

use crate::ai::types::Attachment;

use super::stage::StageStatus;

/// Caller-visible output of one request, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseEvent {
    // ── Content ──
    /// Assistant text fragment.
    Content { text: String },

    /// Attachment added to the response.
    Attachment { attachment: Attachment },

    // ── Stages ──
    /// A stage became visible.
    StageOpened { index: usize, name: String },

    /// Text appended to an open stage.
    StageContent { index: usize, text: String },

    StageAttachment { index: usize, attachment: Attachment },

    /// Stage finished; emitted once per stage.
    StageClosed { index: usize, status: StageStatus },

    // ── Completion ──
    /// Conversation state for the final assistant turn.
    State { state: Value },
}
