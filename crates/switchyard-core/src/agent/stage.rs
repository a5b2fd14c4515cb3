//! Stage: an orderable, append-only progress channel
//!
//! A stage is allocated from a [`Choice`], becomes visible on `open`, and
//! is closed exactly once. Closing twice, or closing a stage that was never
//! opened, does nothing.

use serde::{Deserialize, Serialize};

use crate::ai::types::Attachment;

use super::choice::Choice;
use super::events::ResponseEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Open,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

pub struct Stage {
    index: usize,
    name: String,
    content: String,
    attachments: Vec<Attachment>,
    status: StageStatus,
    opened: bool,
    sink: Choice,
}

impl Stage {
    pub(crate) fn new(index: usize, sink: Choice) -> Self {
        Self {
            index,
            name: String::new(),
            content: String::new(),
            attachments: Vec::new(),
            status: StageStatus::Open,
            opened: false,
            sink,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    /// Opened and not yet closed.
    pub fn is_open(&self) -> bool {
        self.opened && self.status == StageStatus::Open
    }

    pub fn open(&mut self, name: impl Into<String>) {
        if self.opened {
            return;
        }
        self.name = name.into();
        self.opened = true;
        self.sink.emit(ResponseEvent::StageOpened {
            index: self.index,
            name: self.name.clone(),
        });
    }

    pub fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.is_open() {
            tracing::debug!(stage = self.index, "Dropping content for inactive stage");
            return;
        }
        self.content.push_str(text);
        self.sink.emit(ResponseEvent::StageContent {
            index: self.index,
            text: text.to_string(),
        });
    }

    pub fn add_attachment(&mut self, attachment: Attachment) {
        if !self.is_open() {
            tracing::debug!(stage = self.index, "Dropping attachment for inactive stage");
            return;
        }
        self.attachments.push(attachment.clone());
        self.sink.emit(ResponseEvent::StageAttachment {
            index: self.index,
            attachment,
        });
    }

    pub fn close(&mut self) {
        self.finish(StageStatus::Completed);
    }

    pub fn fail(&mut self) {
        self.finish(StageStatus::Failed);
    }

    fn finish(&mut self, status: StageStatus) {
        if !self.is_open() {
            return;
        }
        self.status = status;
        self.sink.emit(ResponseEvent::StageClosed {
            index: self.index,
            status,
        });
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        if self.is_open() {
            tracing::warn!(stage = self.index, name = %self.name, "Stage dropped while open");
            self.fail();
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("opened", &self.opened)
            .finish()
    }
}
