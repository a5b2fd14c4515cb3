//! Shared constants

/// Key of the tool-call history inside a state blob.
pub const TOOL_CALL_HISTORY_KEY: &str = "tool_call_history";

/// Key under which an agent publishes its stages inside a state blob.
pub const STAGES_KEY: &str = "stages";

/// DIAL API version used for completion calls.
pub const DEFAULT_API_VERSION: &str = "2025-01-01-preview";

/// Server-sent events stream terminator.
pub const SSE_DONE: &str = "[DONE]";

pub mod headers {
    pub const API_KEY: &str = "api-key";
    pub const CONVERSATION_ID: &str = "x-conversation-id";
    pub const DELEGATION_DEPTH: &str = "x-delegation-depth";
}

pub mod limits {
    use std::time::Duration;

    /// Default cap on resolution rounds per request.
    pub const MAX_ROUNDS: usize = 25;

    /// Default cap on nested agent-to-agent calls.
    pub const MAX_DELEGATION_DEPTH: usize = 4;

    /// Default per-capability execution timeout (5 minutes).
    pub const CAPABILITY_TIMEOUT: Duration = Duration::from_secs(300);
}
