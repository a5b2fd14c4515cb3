//! Test doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::agent::choice::Choice;
use crate::agent::events::ResponseEvent;
use crate::agent::state::ConversationState;
use crate::ai::client::{ChunkStream, CompletionClient, CompletionRequest, RequestContext};
use crate::ai::streaming::CompletionChunk;
use crate::ai::types::ToolCallRequest;
use crate::error::{CapabilityError, ClientError};
use crate::tools::registry::{
    parse_params, Capability, ProgressPolicy, ToolContext, ToolOutput,
};

pub(crate) fn chunk_stream(chunks: Vec<CompletionChunk>) -> ChunkStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

/// Everything emitted so far.
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<ResponseEvent>) -> Vec<ResponseEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub(crate) fn tool_context(
    name: &str,
    arguments: &str,
) -> (ToolContext, mpsc::UnboundedReceiver<ResponseEvent>) {
    let (choice, rx) = Choice::channel();
    (
        ToolContext {
            call: ToolCallRequest::new("call_test", name, arguments),
            choice,
            stage: None,
            request: RequestContext::default(),
            history: Arc::new(Vec::new()),
        },
        rx,
    )
}

enum Script {
    Chunks(Vec<Result<CompletionChunk, ClientError>>),
    Fail(ClientError),
}

/// Completion client that replays queued scripts, one per call, and
/// records every request.
pub(crate) struct ScriptedClient {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    pub fn new(scripts: Vec<Vec<Result<CompletionChunk, ClientError>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().map(Script::Chunks).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Rounds that succeed with the given chunks.
    pub fn rounds(rounds: Vec<Vec<CompletionChunk>>) -> Self {
        Self::new(
            rounds
                .into_iter()
                .map(|chunks| chunks.into_iter().map(Ok).collect())
                .collect(),
        )
    }

    pub fn failing(error: ClientError) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::from([Script::Fail(error)])),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkStream, ClientError> {
        self.requests.lock().unwrap().push(request);
        match self.scripts.lock().unwrap().pop_front() {
            Some(Script::Chunks(chunks)) => Ok(Box::pin(futures::stream::iter(chunks))),
            Some(Script::Fail(error)) => Err(error),
            None => Err(ClientError::Api("no scripted response left".into())),
        }
    }
}

/// Capability that echoes its `text` argument, with knobs for delays,
/// failures and returned state.
pub(crate) struct EchoTool {
    name: String,
    delay: Option<Duration>,
    fail: bool,
    panic: bool,
    policy: ProgressPolicy,
    state: Option<ConversationState>,
    schema: Value,
}

#[derive(Deserialize)]
struct EchoParams {
    #[serde(default)]
    text: String,
}

impl EchoTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: None,
            fail: false,
            panic: false,
            policy: ProgressPolicy::default(),
            state: None,
            schema: json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": []
            }),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }

    pub fn with_policy(mut self, policy: ProgressPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_state(mut self, state: ConversationState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }
}

#[async_trait]
impl Capability for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Echoes its input"
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    fn progress_policy(&self) -> ProgressPolicy {
        self.policy.clone()
    }

    async fn execute(
        &self,
        params: Value,
        _ctx: &mut ToolContext,
    ) -> Result<ToolOutput, CapabilityError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic {
            panic!("echo panic");
        }
        if self.fail {
            return Err(CapabilityError::execution("echo failure"));
        }
        let params: EchoParams = parse_params(params)?;
        let mut output = ToolOutput::text(params.text);
        if let Some(state) = &self.state {
            output = output.with_state(state.clone());
        }
        Ok(output)
    }
}
