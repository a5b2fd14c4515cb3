//! Agent module - the resolution loop and the pieces it drives
//!
//! - `orchestrator`: round loop, termination, state publication
//! - `stream`: tool-call reconstruction from streamed deltas
//! - `executor`: concurrent, failure-isolated tool fan-out
//! - `history`: message list construction, including sub-agent replay
//! - `state`: the conversation state blob
//! - `choice` / `stage` / `events`: caller-visible output

pub mod choice;
pub mod events;
pub(crate) mod executor;
pub mod history;
pub mod orchestrator;
pub mod stage;
pub mod state;
pub mod stream;

pub use choice::Choice;
pub use events::ResponseEvent;
pub use orchestrator::{Agent, AgentConfig, AgentOutcome, AgentRequest};
pub use stage::{Stage, StageStatus};
pub use state::ConversationState;
pub use stream::{StreamReconstructor, StreamResult};
