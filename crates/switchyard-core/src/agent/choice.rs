//! Response output channel shared by the loop and its tool executions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::ai::types::Attachment;

use super::events::ResponseEvent;
use super::stage::Stage;
use super::state::ConversationState;

/// Caller-visible output of one request.
///
/// Cheap to clone; every clone feeds the same receiver and draws stage
/// indices from the same counter.
#[derive(Clone)]
pub struct Choice {
    tx: mpsc::UnboundedSender<ResponseEvent>,
    next_stage: Arc<AtomicUsize>,
    state_set: Arc<AtomicBool>,
}

impl Choice {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ResponseEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                next_stage: Arc::new(AtomicUsize::new(0)),
                state_set: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn append_content(&self, text: &str) {
        if !text.is_empty() {
            self.emit(ResponseEvent::Content {
                text: text.to_string(),
            });
        }
    }

    pub fn add_attachment(&self, attachment: Attachment) {
        self.emit(ResponseEvent::Attachment { attachment });
    }

    /// Allocate the next stage. It stays invisible until opened.
    pub fn create_stage(&self) -> Stage {
        let index = self.next_stage.fetch_add(1, Ordering::SeqCst);
        Stage::new(index, self.clone())
    }

    /// Publish the final state. Only the first call per request takes
    /// effect; returns whether this one did.
    pub fn set_state(&self, state: &ConversationState) -> bool {
        if self.state_set.swap(true, Ordering::SeqCst) {
            tracing::warn!("Conversation state already set for this response; ignoring");
            return false;
        }
        self.emit(ResponseEvent::State {
            state: state.to_value(),
        });
        true
    }

    pub(crate) fn emit(&self, event: ResponseEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Response receiver dropped; discarding event");
        }
    }
}
