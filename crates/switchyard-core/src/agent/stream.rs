//! Streaming response reconstruction
//!
//! Single forward pass over completion chunks. Content is accumulated and
//! handed to the caller as it arrives; tool calls are rebuilt from deltas
//! keyed by index. A delta carrying an `id` opens a call, anything else at
//! that index appends to its arguments.

use std::collections::BTreeMap;

use futures::StreamExt;

use crate::ai::client::ChunkStream;
use crate::ai::streaming::{CompletionChunk, ToolCallDelta};
use crate::ai::types::ToolCallRequest;
use crate::error::AgentError;

/// Result of consuming one model stream.
#[derive(Debug, Default, PartialEq)]
pub struct StreamResult {
    pub content: String,
    /// Reconstructed calls in index order.
    pub tool_calls: Vec<ToolCallRequest>,
}

#[derive(Debug)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
pub struct StreamReconstructor {
    content: String,
    calls: BTreeMap<usize, PendingCall>,
}

impl StreamReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &CompletionChunk) -> Result<(), AgentError> {
        if let Some(text) = &chunk.content {
            self.content.push_str(text);
        }
        for delta in &chunk.tool_calls {
            self.apply_delta(delta)?;
        }
        Ok(())
    }

    fn apply_delta(&mut self, delta: &ToolCallDelta) -> Result<(), AgentError> {
        let fragment = delta.arguments.as_deref().unwrap_or_default();

        if let Some(id) = &delta.id {
            if let Some(open) = self.calls.get_mut(&delta.index) {
                // Some providers repeat the id on every fragment.
                if open.id == *id {
                    open.arguments.push_str(fragment);
                    return Ok(());
                }
                tracing::warn!(index = delta.index, id = %id, "Tool call index reopened with a new id");
            }
            tracing::debug!(index = delta.index, id = %id, name = ?delta.name, "Tool call opened");
            self.calls.insert(
                delta.index,
                PendingCall {
                    id: id.clone(),
                    name: delta.name.clone().unwrap_or_default(),
                    arguments: fragment.to_string(),
                },
            );
            return Ok(());
        }

        match self.calls.get_mut(&delta.index) {
            Some(open) => {
                open.arguments.push_str(fragment);
                Ok(())
            }
            None => Err(AgentError::MalformedStream { index: delta.index }),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn finish(self) -> StreamResult {
        StreamResult {
            content: self.content,
            tool_calls: self
                .calls
                .into_values()
                .map(|call| ToolCallRequest::new(call.id, call.name, call.arguments))
                .collect(),
        }
    }
}

/// Drain `stream`, reconstructing content and tool calls.
///
/// `on_chunk` sees every chunk as soon as it is accepted; this is the
/// live path for content and any `custom_content` riding along.
pub(crate) async fn process_stream<F>(
    mut stream: ChunkStream,
    mut on_chunk: F,
) -> Result<StreamResult, AgentError>
where
    F: FnMut(&CompletionChunk),
{
    let mut reconstructor = StreamReconstructor::new();
    let mut chunks = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        reconstructor.push(&chunk)?;
        on_chunk(&chunk);
        chunks += 1;
    }

    let result = reconstructor.finish();
    tracing::debug!(
        chunks,
        content_len = result.content.len(),
        tool_calls = result.tool_calls.len(),
        "Stream complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::chunk_stream;

    fn feed(chunks: &[CompletionChunk]) -> Result<StreamResult, AgentError> {
        let mut r = StreamReconstructor::new();
        for chunk in chunks {
            r.push(chunk)?;
        }
        Ok(r.finish())
    }

    #[test]
    fn test_fragments_concatenate_in_stream_order() {
        let result = feed(&[
            CompletionChunk::tool_calls(vec![ToolCallDelta::open(0, "call_a", "simple_calculator")]),
            CompletionChunk::tool_calls(vec![ToolCallDelta::arguments(0, "{\"expres")]),
            CompletionChunk::tool_calls(vec![ToolCallDelta::arguments(0, "sion\": \"2+3\"}")]),
        ])
        .unwrap();

        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].id, "call_a");
        assert_eq!(result.tool_calls[0].name(), "simple_calculator");
        assert_eq!(result.tool_calls[0].function.arguments, "{\"expression\": \"2+3\"}");
    }

    #[test]
    fn test_interleaved_indices_return_in_index_order() {
        let result = feed(&[
            CompletionChunk::tool_calls(vec![
                ToolCallDelta::open(1, "call_b", "web_search_agent"),
                ToolCallDelta::open(0, "call_a", "simple_calculator"),
            ]),
            CompletionChunk::tool_calls(vec![ToolCallDelta::arguments(1, "{\"prompt\":")]),
            CompletionChunk::tool_calls(vec![ToolCallDelta::arguments(0, "{}")]),
            CompletionChunk::tool_calls(vec![ToolCallDelta::arguments(1, "\"date\"}")]),
        ])
        .unwrap();

        let ids: Vec<_> = result.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["call_a", "call_b"]);
        assert_eq!(result.tool_calls[1].function.arguments, "{\"prompt\":\"date\"}");
    }

    #[test]
    fn test_continuation_without_opener_is_malformed() {
        let err = feed(&[
            CompletionChunk::tool_calls(vec![ToolCallDelta::open(0, "call_a", "simple_calculator")]),
            CompletionChunk::tool_calls(vec![ToolCallDelta::arguments(3, "{}")]),
        ])
        .unwrap_err();
        assert!(matches!(err, AgentError::MalformedStream { index: 3 }));
    }

    #[test]
    fn test_repeated_id_is_a_continuation() {
        let mut opener = ToolCallDelta::open(0, "call_a", "simple_calculator");
        opener.arguments = Some("{\"expression\":".into());
        let mut repeat = ToolCallDelta::arguments(0, "\"1\"}");
        repeat.id = Some("call_a".into());

        let result = feed(&[CompletionChunk::tool_calls(vec![opener, repeat])]).unwrap();
        assert_eq!(result.tool_calls[0].function.arguments, "{\"expression\":\"1\"}");
    }

    #[test]
    fn test_content_only_stream() {
        let result = feed(&[CompletionChunk::text("Hello, "), CompletionChunk::text("world")]).unwrap();
        assert_eq!(result.content, "Hello, world");
        assert!(result.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_process_stream_forwards_chunks_live() {
        let stream = chunk_stream(vec![CompletionChunk::text("a"), CompletionChunk::text("b")]);
        let mut seen = Vec::new();
        let result = process_stream(stream, |chunk| {
            seen.extend(chunk.content.clone());
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(result.content, "ab");
    }

    #[tokio::test]
    async fn test_process_stream_surfaces_client_errors() {
        let stream: ChunkStream = Box::pin(futures::stream::iter(vec![
            Ok(CompletionChunk::text("partial")),
            Err(crate::error::ClientError::Api("overloaded".into())),
        ]));
        let err = process_stream(stream, |_| {}).await.unwrap_err();
        assert!(matches!(err, AgentError::Completion(_)));
    }
}
