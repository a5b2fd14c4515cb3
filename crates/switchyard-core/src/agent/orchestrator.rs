//! Agent control loop: the "respond or call tools" resolution algorithm.
//!
//! Each round builds the message list, streams one model completion,
//! reconstructs its tool calls and fans them out. A round with no tool
//! calls is the final answer; the accumulated [`ConversationState`] is
//! attached to it and published on the [`Choice`].
//!
//! ```text
//!  ┌──────────┐  messages   ┌────────┐  chunks   ┌───────────────┐
//!  │  Agent   │ ──────────► │ model  │ ────────► │ reconstructor │
//!  │  loop    │             └────────┘           └───────┬───────┘
//!  │          │ ◄── tool turns ── executor ◄── tool calls ┘
//!  └──────────┘
//! ```
//!
//! State is owned by one `handle_request` call and threaded through the
//! rounds; nothing is shared between concurrent requests.

use std::sync::Arc;

use crate::ai::client::{CompletionClient, CompletionRequest, RequestContext};
use crate::ai::types::Turn;
use crate::constants::limits::{MAX_DELEGATION_DEPTH, MAX_ROUNDS};
use crate::error::{AgentError, ResolutionError};
use crate::tools::registry::CapabilityRegistry;

use super::choice::Choice;
use super::executor;
use super::history;
use super::state::ConversationState;
use super::stream;

/// Limits and model binding for one agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Deployment the agent's own completions are sent to.
    pub model_deployment: String,
    pub max_rounds: usize,
    pub max_delegation_depth: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model_deployment: "gpt-4o".to_string(),
            max_rounds: MAX_ROUNDS,
            max_delegation_depth: MAX_DELEGATION_DEPTH,
        }
    }
}

/// One incoming request.
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub messages: Vec<Turn>,
    pub context: RequestContext,
}

/// Final answer of a resolved request.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Assistant turn with the conversation state attached.
    pub message: Turn,
    pub state: ConversationState,
    pub rounds: usize,
}

pub struct Agent {
    name: String,
    system_prompt: String,
    registry: Arc<CapabilityRegistry>,
    client: Arc<dyn CompletionClient>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        registry: Arc<CapabilityRegistry>,
        client: Arc<dyn CompletionClient>,
        config: AgentConfig,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            registry,
            client,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Resolve one request, streaming output to `choice`.
    ///
    /// The state is published on `choice` in both outcomes; on failure the
    /// partial state also travels inside the error.
    pub async fn handle_request(
        &self,
        request: &AgentRequest,
        choice: &Choice,
    ) -> Result<AgentOutcome, ResolutionError> {
        let mut state = ConversationState::new();

        match self.resolve(request, choice, &mut state).await {
            Ok((message, rounds)) => {
                tracing::info!(agent = %self.name, rounds, "Request resolved");
                choice.set_state(&state);
                Ok(AgentOutcome {
                    message,
                    state,
                    rounds,
                })
            }
            Err(source) => {
                tracing::error!(agent = %self.name, code = source.error_code(), "Resolution failed: {}", source);
                choice.set_state(&state);
                Err(ResolutionError {
                    source,
                    partial_state: state,
                })
            }
        }
    }

    async fn resolve(
        &self,
        request: &AgentRequest,
        choice: &Choice,
        state: &mut ConversationState,
    ) -> Result<(Turn, usize), AgentError> {
        let depth = request.context.delegation_depth;
        if depth > self.config.max_delegation_depth {
            return Err(AgentError::DelegationDepthExceeded {
                depth,
                max: self.config.max_delegation_depth,
            });
        }

        let schemas = self.registry.schemas();
        let history = Arc::new(request.messages.clone());

        for round in 1..=self.config.max_rounds {
            let messages = history::prepare_messages(&self.system_prompt, &request.messages, state);
            tracing::info!(
                agent = %self.name,
                round,
                messages = messages.len(),
                "Starting resolution round"
            );

            let chunks = self
                .client
                .stream_completion(CompletionRequest {
                    deployment: self.config.model_deployment.clone(),
                    messages,
                    tools: schemas.clone(),
                    context: request.context.clone(),
                })
                .await?;

            let output = stream::process_stream(chunks, |chunk| {
                if let Some(text) = &chunk.content {
                    choice.append_content(text);
                }
            })
            .await?;

            // ── Done ──
            if output.tool_calls.is_empty() {
                let message = Turn::assistant(output.content).with_state(state.to_value());
                return Ok((message, round));
            }

            // ── Fan out ──
            tracing::info!(
                agent = %self.name,
                round,
                tool_calls = output.tool_calls.len(),
                "Dispatching tool calls"
            );
            let assistant = Turn::assistant_with_calls(output.content, output.tool_calls);
            let outcomes = executor::execute_tools(
                &self.registry,
                &assistant.tool_calls,
                choice,
                &request.context,
                &history,
            )
            .await?;

            // All mutation happens after the join, in request order.
            let mut results = Vec::with_capacity(outcomes.len());
            for (call, outcome) in assistant.tool_calls.iter().zip(outcomes) {
                if let Some(sub_state) = outcome.sub_state {
                    state.merge_sub_state(call.name(), sub_state);
                }
                results.push(outcome.turn);
            }
            state.record_round(assistant, results);
        }

        tracing::warn!(agent = %self.name, max_rounds = self.config.max_rounds, "Round limit reached");
        Err(AgentError::RoundLimitExceeded {
            rounds: self.config.max_rounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::ResponseEvent;
    use crate::ai::streaming::{CompletionChunk, ToolCallDelta};
    use crate::ai::types::Role;
    use crate::error::ClientError;
    use crate::test_support::{drain, EchoTool, ScriptedClient};
    use crate::tools::implementations::{AgentProxyTool, CalculatorTool};
    use serde_json::json;

    fn call_chunk(index: usize, id: &str, name: &str, arguments: &str) -> CompletionChunk {
        let mut delta = ToolCallDelta::open(index, id, name);
        delta.arguments = Some(arguments.to_string());
        CompletionChunk::tool_calls(vec![delta])
    }

    fn agent(client: Arc<ScriptedClient>, registry: CapabilityRegistry) -> Agent {
        Agent::new(
            "calculations-agent",
            "You are a Calculations Agent",
            Arc::new(registry),
            client,
            AgentConfig::default(),
        )
    }

    fn request(text: &str) -> AgentRequest {
        AgentRequest {
            messages: vec![Turn::user(text)],
            context: RequestContext::default(),
        }
    }

    #[tokio::test]
    async fn test_direct_answer() {
        let client = Arc::new(ScriptedClient::rounds(vec![vec![
            CompletionChunk::text("Hello"),
            CompletionChunk::text("!"),
        ]]));
        let registry = CapabilityRegistry::builder()
            .register(Arc::new(CalculatorTool))
            .build()
            .unwrap();
        let agent = agent(client.clone(), registry);
        let (choice, mut rx) = Choice::channel();

        let outcome = agent.handle_request(&request("hi"), &choice).await.unwrap();

        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.message.content, "Hello!");
        assert_eq!(outcome.message.state(), Some(&json!({"tool_call_history": []})));

        let requests = client.requests();
        assert_eq!(requests[0].messages[0].role, Role::System);
        assert_eq!(requests[0].tools[0].name, "simple_calculator");

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ResponseEvent::Content { text: "Hello".into() },
                ResponseEvent::Content { text: "!".into() },
                ResponseEvent::State { state: json!({"tool_call_history": []}) },
            ]
        );
    }

    #[tokio::test]
    async fn test_two_tools_then_answer() {
        // "what is 2+3, then search the web for today's date"
        let search_client = Arc::new(ScriptedClient::rounds(vec![vec![CompletionChunk::text(
            "2026-10-18",
        )]]));
        let registry = CapabilityRegistry::builder()
            .register(Arc::new(CalculatorTool))
            .register(Arc::new(AgentProxyTool::new(
                "web_search_agent",
                "web-search-agent",
                "WEB Search Agent",
                search_client.clone(),
            )))
            .build()
            .unwrap();

        let model = Arc::new(ScriptedClient::rounds(vec![
            vec![
                call_chunk(0, "call_calc", "simple_calculator", "{\"expression\":"),
                CompletionChunk::tool_calls(vec![ToolCallDelta::arguments(0, "\"2+3\"}")]),
                call_chunk(1, "call_web", "web_search_agent", "{\"prompt\":\"today's date\"}"),
            ],
            vec![CompletionChunk::text("2+3=5 and today is 2026-10-18")],
        ]));
        let agent = agent(model.clone(), registry);
        let (choice, _rx) = Choice::channel();

        let outcome = agent
            .handle_request(&request("what is 2+3, then search the web for today's date"), &choice)
            .await
            .unwrap();

        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.message.content, "2+3=5 and today is 2026-10-18");

        let history = outcome.state.tool_call_history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].tool_calls.len(), 2);
        assert_eq!(history[1].tool_call_id.as_deref(), Some("call_calc"));
        assert_eq!(history[1].content, "5");
        assert_eq!(history[2].tool_call_id.as_deref(), Some("call_web"));
        assert_eq!(history[2].content, "2026-10-18");

        // Second round sees both results after the assistant turn.
        let second = &model.requests()[1].messages;
        let tail: Vec<Role> = second.iter().rev().take(3).map(|t| t.role).collect();
        assert_eq!(tail, vec![Role::Tool, Role::Tool, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_failed_sub_agent_does_not_abort() {
        let registry = CapabilityRegistry::builder()
            .register(Arc::new(AgentProxyTool::new(
                "web_search_agent",
                "web-search-agent",
                "WEB Search Agent",
                Arc::new(ScriptedClient::failing(ClientError::Status {
                    status: 504,
                    body: "gateway timeout".into(),
                })),
            )))
            .build()
            .unwrap();
        let model = Arc::new(ScriptedClient::rounds(vec![
            vec![call_chunk(0, "c1", "web_search_agent", "{\"prompt\":\"news\"}")],
            vec![CompletionChunk::text("Search is unavailable right now.")],
        ]));
        let agent = agent(model, registry);
        let (choice, _rx) = Choice::channel();

        let outcome = agent.handle_request(&request("news?"), &choice).await.unwrap();

        assert_eq!(outcome.rounds, 2);
        let result = &outcome.state.tool_call_history()[1];
        assert!(result
            .content
            .starts_with("Error: capability 'web_search_agent' failed:"));
    }

    #[tokio::test]
    async fn test_unknown_capability_keeps_partial_state() {
        let registry = CapabilityRegistry::builder()
            .register(Arc::new(EchoTool::new("echo")))
            .build()
            .unwrap();
        let model = Arc::new(ScriptedClient::rounds(vec![
            vec![call_chunk(0, "c1", "echo", "{\"text\":\"one\"}")],
            vec![call_chunk(0, "c2", "nonexistent", "{}")],
        ]));
        let agent = agent(model, registry);
        let (choice, mut rx) = Choice::channel();

        let err = agent.handle_request(&request("go"), &choice).await.unwrap_err();

        assert!(matches!(err.source, AgentError::UnknownCapability { ref name } if name == "nonexistent"));
        assert_eq!(err.partial_state.tool_call_history().len(), 2);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ResponseEvent::State { .. })));
    }

    #[tokio::test]
    async fn test_malformed_stream_is_fatal() {
        let registry = CapabilityRegistry::builder()
            .register(Arc::new(EchoTool::new("echo")))
            .build()
            .unwrap();
        let model = Arc::new(ScriptedClient::rounds(vec![vec![CompletionChunk::tool_calls(
            vec![ToolCallDelta::arguments(0, "{}")],
        )]]));
        let agent = agent(model, registry);
        let (choice, _rx) = Choice::channel();

        let err = agent.handle_request(&request("go"), &choice).await.unwrap_err();
        assert!(matches!(err.source, AgentError::MalformedStream { index: 0 }));
    }

    #[tokio::test]
    async fn test_round_limit() {
        let registry = CapabilityRegistry::builder()
            .register(Arc::new(EchoTool::new("echo")))
            .build()
            .unwrap();
        let model = Arc::new(ScriptedClient::rounds(vec![
            vec![call_chunk(0, "c1", "echo", "{}")],
            vec![call_chunk(0, "c2", "echo", "{}")],
        ]));
        let agent = Agent::new(
            "looping",
            "sys",
            Arc::new(registry),
            model,
            AgentConfig {
                max_rounds: 2,
                ..Default::default()
            },
        );
        let (choice, _rx) = Choice::channel();

        let err = agent.handle_request(&request("go"), &choice).await.unwrap_err();
        assert!(matches!(err.source, AgentError::RoundLimitExceeded { rounds: 2 }));
        assert_eq!(err.partial_state.tool_call_history().len(), 4);
    }

    #[tokio::test]
    async fn test_delegation_depth_guard() {
        let registry = CapabilityRegistry::builder()
            .register(Arc::new(EchoTool::new("echo")))
            .build()
            .unwrap();
        let model = Arc::new(ScriptedClient::rounds(Vec::new()));
        let agent = agent(model.clone(), registry);
        let (choice, _rx) = Choice::channel();
        let mut req = request("hi");
        req.context.delegation_depth = MAX_DELEGATION_DEPTH + 1;

        let err = agent.handle_request(&req, &choice).await.unwrap_err();
        assert!(matches!(err.source, AgentError::DelegationDepthExceeded { .. }));
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_sub_state_round_trip_across_turns() {
        // Callee returns its own state; the caller namespaces it and a later
        // turn with propagate_history replays it to the callee.
        let callee_state = json!({
            "tool_call_history": [
                {"role": "assistant", "content": "", "tool_calls": [
                    {"id": "n1", "type": "function",
                     "function": {"name": "simple_calculator", "arguments": "{\"expression\":\"6*7\"}"}}
                ]},
                {"role": "tool", "content": "42", "name": "simple_calculator", "tool_call_id": "n1"}
            ]
        });
        let callee = Arc::new(ScriptedClient::rounds(vec![
            vec![
                CompletionChunk::text("42"),
                CompletionChunk {
                    state: Some(callee_state.clone()),
                    ..Default::default()
                },
            ],
            vec![CompletionChunk::text("84")],
        ]));
        let registry = Arc::new(
            CapabilityRegistry::builder()
                .register(Arc::new(AgentProxyTool::new(
                    "calculations_agent",
                    "calculations-agent",
                    "Calculations Agent",
                    callee.clone(),
                )))
                .build()
                .unwrap(),
        );
        let model = Arc::new(ScriptedClient::rounds(vec![
            vec![call_chunk(0, "o1", "calculations_agent", "{\"prompt\":\"6*7\"}")],
            vec![CompletionChunk::text("It is 42")],
            vec![call_chunk(
                0,
                "o2",
                "calculations_agent",
                "{\"prompt\":\"double it\",\"propagate_history\":true}",
            )],
            vec![CompletionChunk::text("It is 84")],
        ]));
        let agent = Agent::new(
            "web-search-agent",
            "sys",
            registry,
            model,
            AgentConfig::default(),
        );

        let (choice, _rx) = Choice::channel();
        let first = agent.handle_request(&request("6*7?"), &choice).await.unwrap();
        assert_eq!(
            first.message.state().and_then(|s| s.get("calculations_agent")),
            Some(&callee_state)
        );

        let second_request = AgentRequest {
            messages: vec![Turn::user("6*7?"), first.message.clone(), Turn::user("double it")],
            context: RequestContext::default(),
        };
        let (choice, _rx) = Choice::channel();
        agent.handle_request(&second_request, &choice).await.unwrap();

        let replayed = &callee.requests()[1].messages;
        assert_eq!(replayed.len(), 4);
        assert_eq!(replayed[0].content, "6*7?");
        assert_eq!(replayed[1].tool_call_id.as_deref(), Some("n1"));
        assert_eq!(replayed[2].role, Role::Assistant);
        assert_eq!(replayed[2].state(), Some(&callee_state));
        assert_eq!(replayed[3].content, "double it");
    }
}
