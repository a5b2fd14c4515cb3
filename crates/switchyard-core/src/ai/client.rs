//! Model-completion client
//!
//! `CompletionClient` is the seam between the agent loop and the network.
//! `DialClient` talks to a DIAL/OpenAI-compatible deployments endpoint and
//! decodes its SSE stream into [`CompletionChunk`]s.

use std::pin::Pin;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{future, Stream, StreamExt};
use serde_json::{json, Value};

use crate::ai::streaming::CompletionChunk;
use crate::ai::types::{ToolSchema, Turn};
use crate::constants::{headers, DEFAULT_API_VERSION, SSE_DONE};
use crate::error::ClientError;

/// Ordered stream of decoded completion chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk, ClientError>> + Send>>;

/// Caller-scoped values threaded through every call made for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub api_key: Option<String>,
    pub conversation_id: Option<String>,
    /// Number of agent-to-agent hops that led to this request.
    pub delegation_depth: usize,
}

impl RequestContext {
    /// Context for a call one delegation level deeper.
    pub fn nested(&self) -> Self {
        Self {
            delegation_depth: self.delegation_depth + 1,
            ..self.clone()
        }
    }
}

/// One streamed completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub deployment: String,
    pub messages: Vec<Turn>,
    pub tools: Vec<ToolSchema>,
    pub context: RequestContext,
}

impl CompletionRequest {
    /// JSON request body.
    pub fn body(&self) -> Value {
        let mut body = json!({
            "messages": self.messages,
            "stream": true,
        });
        if !self.tools.is_empty() {
            body["tools"] = Value::Array(self.tools.iter().map(ToolSchema::to_openai).collect());
        }
        body
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn stream_completion(&self, request: CompletionRequest)
        -> Result<ChunkStream, ClientError>;
}

/// Client for DIAL-style `/openai/deployments/{name}/chat/completions`.
pub struct DialClient {
    http: reqwest::Client,
    endpoint: String,
    api_version: String,
    default_api_key: Option<String>,
}

impl DialClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            default_api_key: None,
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Key used when the request context carries none.
    pub fn with_default_api_key(mut self, api_key: Option<String>) -> Self {
        self.default_api_key = api_key;
        self
    }

    pub fn completions_url(&self, deployment: &str) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, deployment, self.api_version
        )
    }
}

#[async_trait]
impl CompletionClient for DialClient {
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkStream, ClientError> {
        let url = self.completions_url(&request.deployment);
        tracing::debug!(
            deployment = %request.deployment,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let ctx = &request.context;
        let mut builder = self
            .http
            .post(&url)
            .header(headers::DELEGATION_DEPTH, ctx.delegation_depth.to_string())
            .json(&request.body());

        if let Some(key) = ctx.api_key.as_ref().or(self.default_api_key.as_ref()) {
            builder = builder.header(headers::API_KEY, key);
        }
        if let Some(conversation_id) = &ctx.conversation_id {
            builder = builder.header(headers::CONVERSATION_ID, conversation_id);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, deployment = %request.deployment, "Completion request failed");
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chunks = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(e) if e.data.trim() == SSE_DONE))
            })
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) if event.data.trim().is_empty() => None,
                    Ok(event) => Some(decode_event(&event.data)),
                    Err(e) => Some(Err(ClientError::EventStream(e.to_string()))),
                })
            });

        Ok(Box::pin(chunks))
    }
}

fn decode_event(data: &str) -> Result<CompletionChunk, ClientError> {
    let value: Value = serde_json::from_str(data)?;
    CompletionChunk::from_json(&value)
}
