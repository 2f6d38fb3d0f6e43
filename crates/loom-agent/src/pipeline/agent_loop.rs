//! The tool-using agent loop (one user turn → request/stream/tool-dispatch
//! cycles until the model stops calling tools).
//!
//! One call to [`run_turn`] is one turn: it appends the user message,
//! streams provider responses, dispatches any tool calls the model asks
//! for, and repeats until the model replies with no further tool calls or
//! the iteration bound is hit. The session is always left with every
//! `tool_use` paired to a `tool_result` — see the cancellation handling
//! below for how that invariant survives a cancelled turn.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use loom_core::error::{GatewayError, Result};
use loom_core::types::{ContentBlock, Message, MessageContent, Role};
use loom_sessions::manager::SessionManager;
use loom_sessions::types::SessionKey;

use crate::pipeline::compact::maybe_compact;
use crate::prompt::SystemPrompt;
use crate::provider::{ChatRequest, LlmProvider, ToolCall, Usage};
use crate::stream::StreamEvent;
use crate::thinking::ThinkingLevel;
use crate::tools::ToolRegistry;

/// The result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Flattened visible text of the final assistant reply.
    pub text: String,
    /// Token usage accrued across every provider round trip in this turn.
    pub usage: Usage,
    /// Number of outer iterations the turn took (1 = no tool calls needed).
    pub iterations: u32,
}

/// Configuration for [`run_turn`] that doesn't change per call — bundled so
/// the call site doesn't thread eight positional arguments.
pub struct TurnConfig<'a> {
    pub default_model: &'a str,
    pub max_iterations: u32,
    pub thinking: Option<ThinkingLevel>,
    pub compact_model: &'a str,
    pub compact_threshold: usize,
    pub compact_keep: usize,
}

/// Drive one user turn to completion.
///
/// `on_delta` is called with each visible text fragment as it streams in;
/// `on_thinking` is called with extended-reasoning fragments, which are
/// never persisted into the session's message log.
#[instrument(skip_all, fields(session = %key))]
pub async fn run_turn(
    provider: &dyn LlmProvider,
    tools: &ToolRegistry,
    sessions: &SessionManager,
    key: &SessionKey,
    system_prompt: &SystemPrompt,
    config: &TurnConfig<'_>,
    user_message: Message,
    on_delta: &(dyn Fn(&str) + Send + Sync),
    on_thinking: &(dyn Fn(&str) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<TurnOutcome> {
    sessions.append(key, user_message)?;

    if let Err(e) = maybe_compact(
        provider,
        sessions,
        key,
        config.compact_model,
        config.compact_threshold,
        config.compact_keep,
    )
    .await
    {
        warn!(error = %e, "compaction attempt failed, continuing with full history");
    }

    let mut total_usage = Usage::default();

    for iteration in 1..=config.max_iterations {
        let (effective_model, compacted_summary) = session_snapshot(sessions, key, config.default_model)?;
        let messages = effective_messages(sessions.snapshot_messages(key)?, compacted_summary);
        let max_tokens = max_tokens_for(provider, &effective_model);

        let req = ChatRequest {
            model: effective_model,
            system: system_prompt.to_plain_text(),
            system_prompt: Some(system_prompt.clone()),
            messages,
            max_tokens,
            temperature: None,
            stop_sequences: Vec::new(),
            thinking: config.thinking,
            tools: tools.definitions(),
        };

        let outcome = stream_one_iteration(provider, &req, on_delta, on_thinking, cancel).await?;

        sessions.update_usage(key, outcome.usage.input_tokens, outcome.usage.output_tokens)?;
        total_usage.input_tokens += outcome.usage.input_tokens;
        total_usage.output_tokens += outcome.usage.output_tokens;

        let mut blocks = Vec::new();
        if !outcome.text.is_empty() {
            blocks.push(ContentBlock::text(outcome.text.clone()));
        }
        for call in &outcome.tool_calls {
            blocks.push(ContentBlock::tool_use(call.id.clone(), call.name.clone(), call.arguments.clone()));
        }
        sessions.append(key, Message::assistant(blocks))?;

        if outcome.tool_calls.is_empty() {
            return Ok(TurnOutcome { text: outcome.text, usage: total_usage, iterations: iteration });
        }

        let hit_cancel = dispatch_tool_calls(sessions, key, tools, &outcome.tool_calls, cancel).await?;
        if hit_cancel {
            return Err(GatewayError::Cancelled);
        }
    }

    Err(GatewayError::BoundExceeded(config.max_iterations))
}

fn session_snapshot(
    sessions: &SessionManager,
    key: &SessionKey,
    default_model: &str,
) -> Result<(String, Option<String>)> {
    let handle = sessions
        .get(key)
        .ok_or_else(|| GatewayError::Session(format!("unknown session: {key}")))?;
    let session = handle.lock().unwrap();
    let effective_model = session.effective_model(default_model).to_string();
    let compacted_summary = session.compacted_summary.clone();
    Ok((effective_model, compacted_summary))
}

/// Prepend the compacted-history summary (if any) as a synthetic user
/// message demarcated per the session store's wire contract.
fn effective_messages(messages: Vec<Message>, compacted_summary: Option<String>) -> Vec<Message> {
    match compacted_summary {
        Some(summary) if !summary.is_empty() => {
            let mut full = Vec::with_capacity(messages.len() + 1);
            full.push(Message::user(format!(
                "[Previous conversation summary]\n{summary}\n[End of summary]"
            )));
            full.extend(messages);
            full
        }
        _ => messages,
    }
}

fn max_tokens_for(provider: &dyn LlmProvider, model: &str) -> u32 {
    provider
        .list_models()
        .iter()
        .find(|m| m.id == model)
        .map(|m| m.max_output)
        .unwrap_or(4096)
}

struct IterationOutcome {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Usage,
}

/// Run one `chat_stream` call to completion, consuming events concurrently
/// with the provider's own production of them (both futures are driven by
/// the same task via `tokio::join!`, so no `'static`/spawn is required).
async fn stream_one_iteration(
    provider: &dyn LlmProvider,
    req: &ChatRequest,
    on_delta: &(dyn Fn(&str) + Send + Sync),
    on_thinking: &(dyn Fn(&str) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<IterationOutcome> {
    let (tx, mut rx) = mpsc::channel::<StreamEvent>(100);

    let consume = async {
        let mut text_buf = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut usage = Usage::default();
        let mut cancelled = false;
        let mut stream_error: Option<String> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                event = rx.recv() => {
                    match event {
                        None => break,
                        Some(StreamEvent::Start { model }) => {
                            debug!(model, "stream started");
                        }
                        Some(StreamEvent::Delta { text }) => {
                            text_buf.push_str(&text);
                            on_delta(&text);
                        }
                        Some(StreamEvent::Thinking { text }) => {
                            on_thinking(&text);
                        }
                        Some(StreamEvent::ToolCall { id, name, arguments }) => {
                            tool_calls.push(ToolCall { id, name, arguments });
                        }
                        Some(StreamEvent::Usage { input_tokens, output_tokens }) => {
                            usage.input_tokens += input_tokens;
                            usage.output_tokens += output_tokens;
                        }
                        Some(StreamEvent::Error { message }) => {
                            stream_error = Some(message);
                            break;
                        }
                        Some(StreamEvent::Done { .. }) => break,
                    }
                }
            }
        }

        (text_buf, tool_calls, usage, cancelled, stream_error)
    };

    let (stream_result, (text, tool_calls, usage, cancelled, stream_error)) =
        tokio::join!(provider.chat_stream(req, tx), consume);

    stream_result.map_err(GatewayError::from)?;

    if cancelled {
        return Err(GatewayError::Cancelled);
    }
    if let Some(message) = stream_error {
        return Err(GatewayError::Transport(message));
    }

    Ok(IterationOutcome { text, tool_calls, usage })
}

/// Execute every collected tool call in emitted order, pairing each with a
/// `tool_result` block in a single appended user message. Returns `true` if
/// cancellation was observed partway through — in that case every
/// not-yet-executed call is still paired with an `is_error` "cancelled"
/// result so the pairing invariant holds even though the turn is aborting.
async fn dispatch_tool_calls(
    sessions: &SessionManager,
    key: &SessionKey,
    tools: &ToolRegistry,
    calls: &[ToolCall],
    cancel: &CancellationToken,
) -> Result<bool> {
    let mut result_blocks = Vec::with_capacity(calls.len());
    let mut hit_cancel = false;

    for call in calls {
        if hit_cancel || cancel.is_cancelled() {
            hit_cancel = true;
            result_blocks.push(ContentBlock::tool_result(call.id.clone(), "cancelled", true));
            continue;
        }
        let result = tools.execute(&call.name, call.arguments.clone()).await;
        result_blocks.push(ContentBlock::tool_result(call.id.clone(), result.content, result.is_error));
    }

    // Role::Tool carries tool_result blocks addressed to the model; every
    // wire adapter maps it back to whatever role the vendor expects (see
    // `wire_role` in the Anthropic adapter).
    sessions.append(
        key,
        Message { role: Role::Tool, content: MessageContent::Blocks(result_blocks), tool_call_id: None },
    )?;
    sessions.increment_tool_calls(key, calls.len() as u64)?;

    Ok(hit_cancel)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::provider::{ChatResponse, ModelInfo, ProviderError};
    use crate::tools::{Tool, ToolRegistry, ToolResult};

    use super::*;

    struct MockProvider {
        iterations: Mutex<VecDeque<Vec<StreamEvent>>>,
    }

    impl MockProvider {
        fn new(iterations: Vec<Vec<StreamEvent>>) -> Self {
            Self { iterations: Mutex::new(iterations.into()) }
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn id(&self) -> &str {
            "mock"
        }

        fn list_models(&self) -> Vec<ModelInfo> {
            vec![ModelInfo {
                id: "mock-model".to_string(),
                context_window: 100_000,
                max_output: 4096,
                supports_tools: true,
                supports_vision: false,
            }]
        }

        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            unimplemented!("tests only exercise chat_stream")
        }

        async fn chat_stream(
            &self,
            _req: &ChatRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> Result<(), ProviderError> {
            let events = self.iterations.lock().unwrap().pop_front().unwrap_or_default();
            for event in events {
                let _ = tx.send(event).await;
            }
            Ok(())
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes back a fixed string"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object" })
        }
        async fn execute(&self, _input: serde_json::Value) -> ToolResult {
            ToolResult::success("echoed")
        }
    }

    fn temp_sessions() -> SessionManager {
        let dir = std::env::temp_dir().join(format!("loom-agent-loop-test-{}", uuid::Uuid::new_v4()));
        SessionManager::load(dir).unwrap()
    }

    fn test_prompt() -> SystemPrompt {
        SystemPrompt { static_text: "be helpful".to_string(), volatile_text: String::new() }
    }

    fn test_config() -> TurnConfig<'static> {
        TurnConfig {
            default_model: "mock-model",
            max_iterations: 5,
            thinking: None,
            compact_model: "mock-model",
            compact_threshold: 1_000,
            compact_keep: 10,
        }
    }

    #[tokio::test]
    async fn simple_reply_with_no_tool_calls() {
        let provider = MockProvider::new(vec![vec![
            StreamEvent::Start { model: "mock-model".to_string() },
            StreamEvent::Delta { text: "hello".to_string() },
            StreamEvent::Done { stop_reason: "end_turn".to_string() },
        ]]);
        let tools = ToolRegistry::new();
        let sessions = temp_sessions();
        let key = SessionKey::main();
        let cancel = CancellationToken::new();

        let outcome = run_turn(
            &provider,
            &tools,
            &sessions,
            &key,
            &test_prompt(),
            &test_config(),
            Message::user("hi"),
            &|_| {},
            &|_| {},
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(outcome.text, "hello");
        assert_eq!(outcome.iterations, 1);

        let messages = sessions.snapshot_messages(&key).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content.flat_text(), "hello");
    }

    #[tokio::test]
    async fn single_tool_call_is_paired_and_loop_continues() {
        let provider = MockProvider::new(vec![
            vec![
                StreamEvent::ToolCall {
                    id: "t1".to_string(),
                    name: "echo".to_string(),
                    arguments: serde_json::json!({"x": 1}),
                },
                StreamEvent::Done { stop_reason: "tool_use".to_string() },
            ],
            vec![
                StreamEvent::Delta { text: "done".to_string() },
                StreamEvent::Done { stop_reason: "end_turn".to_string() },
            ],
        ]);
        let mut tools = ToolRegistry::new();
        tools.register(std::sync::Arc::new(EchoTool));
        let sessions = temp_sessions();
        let key = SessionKey::main();
        let cancel = CancellationToken::new();

        let outcome = run_turn(
            &provider,
            &tools,
            &sessions,
            &key,
            &test_prompt(),
            &test_config(),
            Message::user("show a.txt"),
            &|_| {},
            &|_| {},
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(outcome.text, "done");
        assert_eq!(outcome.iterations, 2);

        let messages = sessions.snapshot_messages(&key).unwrap();
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[1].content.blocks()[0], ContentBlock::ToolUse { .. }));
        assert!(matches!(messages[2].content.blocks()[0], ContentBlock::ToolResult { .. }));
    }

    #[tokio::test]
    async fn exceeding_iteration_bound_returns_bound_exceeded() {
        let never_ending = || {
            vec![
                StreamEvent::ToolCall {
                    id: "t1".to_string(),
                    name: "echo".to_string(),
                    arguments: serde_json::json!({}),
                },
                StreamEvent::Done { stop_reason: "tool_use".to_string() },
            ]
        };
        let provider = MockProvider::new(vec![never_ending(), never_ending()]);
        let mut tools = ToolRegistry::new();
        tools.register(std::sync::Arc::new(EchoTool));
        let sessions = temp_sessions();
        let key = SessionKey::main();
        let cancel = CancellationToken::new();
        let mut config = test_config();
        config.max_iterations = 2;

        let result = run_turn(
            &provider,
            &tools,
            &sessions,
            &key,
            &test_prompt(),
            &config,
            Message::user("loop forever"),
            &|_| {},
            &|_| {},
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(GatewayError::BoundExceeded(2))));
    }

    #[tokio::test]
    async fn cancellation_before_streaming_leaves_no_new_assistant_message() {
        let provider = MockProvider::new(vec![vec![
            StreamEvent::Delta { text: "partial".to_string() },
            StreamEvent::Done { stop_reason: "end_turn".to_string() },
        ]]);
        let tools = ToolRegistry::new();
        let sessions = temp_sessions();
        let key = SessionKey::main();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_turn(
            &provider,
            &tools,
            &sessions,
            &key,
            &test_prompt(),
            &test_config(),
            Message::user("hi"),
            &|_| {},
            &|_| {},
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(GatewayError::Cancelled)));
        let messages = sessions.snapshot_messages(&key).unwrap();
        assert_eq!(messages.len(), 1);
    }
}
