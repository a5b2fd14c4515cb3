//! Chat-completions endpoint: one deployment per configured agent.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::post,
    Json, Router,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use switchyard_core::ai::client::RequestContext;
use switchyard_core::constants::{headers, SSE_DONE};
use switchyard_core::{Agent, AgentRequest, Choice};

use crate::error::AppError;
use crate::types::{error_frame, ChatCompletionRequest, ChunkFrame, ResponseAggregate};
use crate::AppState;

const SSE_CHANNEL_BUFFER: usize = 256;

pub fn router() -> Router<AppState> {
    Router::new().route("/:deployment/chat/completions", post(chat_completions))
}

pub(crate) async fn chat_completions(
    State(state): State<AppState>,
    Path(deployment): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequest>,
) -> Result<Response, AppError> {
    let agent = state
        .agents
        .get(&deployment)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("Deployment '{}' not found", deployment)))?;

    let request = AgentRequest {
        messages: body.messages,
        context: request_context(&headers)?,
    };
    tracing::info!(
        deployment = %deployment,
        depth = request.context.delegation_depth,
        stream = body.stream,
        "Chat completion request"
    );

    let frame = ChunkFrame::new(deployment);
    if body.stream {
        Ok(stream_response(agent, request, frame).into_response())
    } else {
        Ok(Json(complete_response(agent, request, frame).await?).into_response())
    }
}

/// Caller-scoped values from request headers.
pub(crate) fn request_context(headers: &HeaderMap) -> Result<RequestContext, AppError> {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let api_key = header_str(headers::API_KEY)
        .or_else(|| {
            header_str(header::AUTHORIZATION.as_str()).and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(|v| v.trim().to_string());

    let delegation_depth = match header_str(headers::DELEGATION_DEPTH) {
        Some(raw) => raw.parse().map_err(|_| {
            AppError::BadRequest(format!(
                "Invalid {} header: {}",
                headers::DELEGATION_DEPTH,
                raw
            ))
        })?,
        None => 0,
    };

    Ok(RequestContext {
        api_key,
        conversation_id: header_str(headers::CONVERSATION_ID).map(str::to_string),
        delegation_depth,
    })
}

/// Stream response events as SSE chunks while the agent resolves.
fn stream_response(
    agent: Arc<Agent>,
    request: AgentRequest,
    frame: ChunkFrame,
) -> Sse<ReceiverStream<Result<Event, Infallible>>> {
    let (sse_tx, sse_rx) = mpsc::channel::<Result<Event, Infallible>>(SSE_CHANNEL_BUFFER);
    let (choice, mut events) = Choice::channel();

    tokio::spawn(async move {
        let resolution =
            tokio::spawn(async move { agent.handle_request(&request, &choice).await });

        // Ends once the resolution task drops its last Choice handle.
        while let Some(event) = events.recv().await {
            if !send_json(&sse_tx, &frame.event(&event)).await {
                tracing::info!("Client disconnected; cancelling resolution");
                resolution.abort();
                return;
            }
        }

        match resolution.await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                send_json(&sse_tx, &error_frame(&err)).await;
            }
            Err(e) => {
                tracing::error!("Resolution task failed: {}", e);
                send_json(
                    &sse_tx,
                    &serde_json::json!({
                        "error": { "message": "internal error", "type": "internal_error" }
                    }),
                )
                .await;
            }
        }

        send_json(&sse_tx, &frame.stop()).await;
        let _ = sse_tx.send(Ok(Event::default().data(SSE_DONE))).await;
    });

    Sse::new(ReceiverStream::new(sse_rx)).keep_alive(KeepAlive::default())
}

/// Resolve fully and fold the events into one `chat.completion`.
async fn complete_response(
    agent: Arc<Agent>,
    request: AgentRequest,
    frame: ChunkFrame,
) -> Result<Value, AppError> {
    let (choice, mut events) = Choice::channel();
    // Owning the Choice here closes the channel once resolution returns.
    let resolution = async move { agent.handle_request(&request, &choice).await };

    let collect = async {
        let mut aggregate = ResponseAggregate::default();
        while let Some(event) = events.recv().await {
            aggregate.apply(event);
        }
        aggregate
    };

    let (result, aggregate) = tokio::join!(resolution, collect);
    result?;
    Ok(frame.completion(aggregate.into_message()))
}

async fn send_json(sse_tx: &mpsc::Sender<Result<Event, Infallible>>, payload: &Value) -> bool {
    sse_tx
        .send(Ok(Event::default().data(payload.to_string())))
        .await
        .is_ok()
}
