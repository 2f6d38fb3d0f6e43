use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use loom_core::types::{ContentBlock, Message, Role};

use crate::provider::{
    ChatRequest, ChatResponse, LlmProvider, ModelInfo, ProviderError, ToolCall, Usage,
};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent, ToolCallBuffer};

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
    /// Path appended to base_url for chat completions.
    /// Default: "/v1/chat/completions"
    chat_path: String,
}

impl OpenAiProvider {
    /// Create a standard OpenAI provider.
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self::with_path(
            "openai",
            api_key,
            base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            "/v1/chat/completions".to_string(),
        )
    }

    /// Create a named OpenAI-compatible provider with a custom endpoint path.
    /// `base_url` should NOT include a trailing slash.
    /// `chat_path` should start with "/" (e.g. "/v1/chat/completions").
    pub fn with_path(
        name: impl Into<String>,
        api_key: String,
        base_url: String,
        chat_path: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider_name: name.into(),
            api_key,
            base_url,
            chat_path,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.provider_name
    }

    fn list_models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "gpt-4o".to_string(),
                context_window: 128_000,
                max_output: 16_384,
                supports_tools: true,
                supports_vision: true,
            },
            ModelInfo {
                id: "gpt-4o-mini".to_string(),
                context_window: 128_000,
                max_output: 16_384,
                supports_tools: true,
                supports_vision: true,
            },
        ]
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req, false);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %req.model, "sending request to OpenAI");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000) // convert seconds to ms
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OpenAI API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let body = build_request_body(req, true);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %req.model, "sending streaming request to OpenAI");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OpenAI streaming API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        process_openai_stream(resp, req.model.clone(), tx).await;
        Ok(())
    }
}

/// OpenAI only ever sees "system"/"user"/"assistant"/"tool" roles — a
/// `tool_result` block (regardless of the owning message's `Role`) always
/// becomes its own `tool`-role message, since that's the only shape OpenAI
/// accepts for tool output.
fn message_to_openai(msg: &Message) -> Vec<serde_json::Value> {
    let blocks = msg.content.blocks();

    let tool_results: Vec<(&str, &str)> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, content, .. } => {
                Some((tool_use_id.as_str(), content.as_str()))
            }
            _ => None,
        })
        .collect();
    if !tool_results.is_empty() {
        return tool_results
            .into_iter()
            .map(|(id, content)| {
                serde_json::json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": content,
                })
            })
            .collect();
    }

    if msg.role == Role::Assistant {
        let text: String = blocks
            .iter()
            .filter_map(|b| b.as_text())
            .collect::<Vec<_>>()
            .join("");
        let tool_calls: Vec<serde_json::Value> = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, arguments } => Some(serde_json::json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": arguments.to_string(),
                    }
                })),
                _ => None,
            })
            .collect();

        return if tool_calls.is_empty() {
            vec![serde_json::json!({ "role": "assistant", "content": text })]
        } else {
            let content = if text.is_empty() { serde_json::Value::Null } else { serde_json::json!(text) };
            vec![serde_json::json!({
                "role": "assistant",
                "content": content,
                "tool_calls": tool_calls,
            })]
        };
    }

    let role = match msg.role {
        Role::System => "system",
        Role::Tool => "tool",
        _ => "user",
    };
    vec![serde_json::json!({ "role": role, "content": msg.content.flat_text() })]
}

pub(crate) fn build_request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": req.system,
    })];
    for m in &req.messages {
        messages.extend(message_to_openai(m));
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "stream": stream,
    });

    if let Some(temp) = req.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if !req.stop_sequences.is_empty() {
        body["stop"] = serde_json::json!(req.stop_sequences);
    }
    if stream {
        // Ask for a final chunk carrying usage, matching Anthropic's
        // message_delta usage report.
        body["stream_options"] = serde_json::json!({ "include_usage": true });
    }

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

pub(crate) fn parse_response(resp: ApiResponse) -> ChatResponse {
    let choice = resp.choices.into_iter().next();
    let content = choice
        .as_ref()
        .and_then(|c| c.message.content.as_deref())
        .unwrap_or("")
        .to_string();

    let tool_calls: Vec<ToolCall> = choice
        .as_ref()
        .and_then(|c| c.message.tool_calls.as_ref())
        .map(|calls| {
            calls
                .iter()
                .map(|tc| {
                    let id = tc.id.clone();
                    let name = tc.function.name.clone();
                    let arguments: serde_json::Value =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                    ToolCall { id, name, arguments }
                })
                .collect()
        })
        .unwrap_or_default();

    // OpenAI's "tool_calls" finish reason is its equivalent of Anthropic's
    // "tool_use" — pass the raw vendor string through either way (see the
    // stop_reason Open Question in the design notes).
    let stop_reason = choice.and_then(|c| c.finish_reason).unwrap_or_default();

    ChatResponse {
        id: resp.id,
        content,
        model: resp.model,
        thinking: None,
        usage: Usage {
            input_tokens: resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0) as u64,
            output_tokens: resp.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0) as u64,
            cache_read: 0,
            cache_write: 0,
        },
        stop_reason,
        tool_calls,
    }
}

/// Parse OpenAI streaming SSE response and emit StreamEvents.
/// OpenAI SSE format is identical to standard SSE (event/data lines).
/// Each data line contains a JSON delta object; `data: [DONE]` signals end.
pub(crate) async fn process_openai_stream(
    resp: reqwest::Response,
    model: String,
    tx: mpsc::Sender<StreamEvent>,
) {
    use futures_util::StreamExt;

    let mut started = false;
    let mut input_tokens: u64 = 0;
    let mut output_tokens: u64 = 0;
    let mut stop_reason = String::new();
    // OpenAI streams tool-call argument fragments tagged by array index, not
    // by a block-open/close pair — each index accumulates independently.
    let mut tool_bufs: Vec<Option<ToolCallBuffer>> = Vec::new();
    let mut line_buf = String::new();

    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(SseParsed::Data(data)) = parse_sse_line(line) {
                if data.trim() == "[DONE]" {
                    break;
                }

                if let Ok(chunk_resp) = serde_json::from_str::<StreamChunk>(&data) {
                    if !started {
                        started = true;
                        if tx.send(StreamEvent::Start { model: model.clone() }).await.is_err() {
                            return;
                        }
                    }

                    if let Some(usage) = &chunk_resp.usage {
                        input_tokens = usage.prompt_tokens as u64;
                        output_tokens = usage.completion_tokens as u64;
                    }

                    for choice in &chunk_resp.choices {
                        if let Some(reason) = &choice.finish_reason {
                            if !reason.is_empty() {
                                stop_reason = reason.clone();
                            }
                        }
                        if let Some(content) = &choice.delta.content {
                            if !content.is_empty() {
                                debug!(len = content.len(), "openai stream text delta");
                                if tx.send(StreamEvent::Delta { text: content.clone() }).await.is_err() {
                                    return;
                                }
                            }
                        }
                        if let Some(calls) = &choice.delta.tool_calls {
                            for call in calls {
                                let idx = call.index as usize;
                                if tool_bufs.len() <= idx {
                                    tool_bufs.resize(idx + 1, None);
                                }
                                let buf = tool_bufs[idx].get_or_insert_with(ToolCallBuffer::default);
                                if let Some(id) = &call.id {
                                    buf.id = id.clone();
                                }
                                if let Some(function) = &call.function {
                                    if let Some(name) = &function.name {
                                        buf.name = name.clone();
                                    }
                                    if let Some(args) = &function.arguments {
                                        buf.arguments_json.push_str(args);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    for buf in tool_bufs.into_iter().flatten() {
        if tx.send(buf.into_event()).await.is_err() {
            return;
        }
    }

    let _ = tx.send(StreamEvent::Usage { input_tokens, output_tokens }).await;
    let _ = tx.send(StreamEvent::Done { stop_reason }).await;
}

// OpenAI API response types — pub(crate) so DeepSeek/OpenRouter-style
// OpenAI-compatible providers can reuse these shapes.

#[derive(Deserialize)]
pub(crate) struct ApiResponse {
    pub(crate) id: String,
    pub(crate) model: String,
    pub(crate) choices: Vec<Choice>,
    pub(crate) usage: Option<Usage>,
}

#[derive(Deserialize)]
pub(crate) struct Choice {
    pub(crate) message: ChatMessage,
    pub(crate) finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ChatMessage {
    pub(crate) content: Option<String>,
    pub(crate) tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
pub(crate) struct ApiToolCall {
    pub(crate) id: String,
    pub(crate) function: ApiFunction,
}

#[derive(Deserialize)]
pub(crate) struct ApiFunction {
    pub(crate) name: String,
    pub(crate) arguments: String,
}

#[derive(Deserialize)]
pub(crate) struct Usage {
    pub(crate) prompt_tokens: u32,
    pub(crate) completion_tokens: u32,
}

// OpenAI streaming chunk types

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    usage: Option<StreamUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::types::{ContentBlock, Message, MessageContent, Role};

    fn base_request(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: "gpt-4o".to_string(),
            system: "be helpful".to_string(),
            system_prompt: None,
            messages,
            max_tokens: 1024,
            temperature: None,
            stop_sequences: Vec::new(),
            thinking: None,
            tools: Vec::new(),
        }
    }

    #[test]
    fn request_body_carries_system_as_first_message() {
        let req = base_request(vec![Message::user("hi")]);
        let body = build_request_body(&req, false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be helpful");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn tool_result_block_becomes_its_own_tool_role_message() {
        let msg = Message {
            role: Role::Tool,
            content: MessageContent::Blocks(vec![ContentBlock::tool_result("t1", "42", false)]),
            tool_call_id: None,
        };
        let req = base_request(vec![msg]);
        let body = build_request_body(&req, false);
        let messages = body["messages"].as_array().unwrap();
        let tool_msg = messages.last().unwrap();
        assert_eq!(tool_msg["role"], "tool");
        assert_eq!(tool_msg["tool_call_id"], "t1");
        assert_eq!(tool_msg["content"], "42");
    }

    #[test]
    fn assistant_tool_use_becomes_tool_calls_array() {
        let msg = Message::assistant(vec![
            ContentBlock::text("checking"),
            ContentBlock::tool_use("t1", "read_file", serde_json::json!({"path": "a.txt"})),
        ]);
        let req = base_request(vec![msg]);
        let body = build_request_body(&req, false);
        let assistant_msg = body["messages"].last().unwrap();
        assert_eq!(assistant_msg["role"], "assistant");
        assert_eq!(assistant_msg["content"], "checking");
        let calls = assistant_msg["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["id"], "t1");
        assert_eq!(calls[0]["function"]["name"], "read_file");
    }

    #[test]
    fn streaming_request_asks_for_usage_in_final_chunk() {
        let req = base_request(vec![Message::user("hi")]);
        let body = build_request_body(&req, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn parse_response_extracts_content_tool_calls_and_usage() {
        let resp = ApiResponse {
            id: "resp-1".to_string(),
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                message: ChatMessage {
                    content: Some("here you go".to_string()),
                    tool_calls: Some(vec![ApiToolCall {
                        id: "t1".to_string(),
                        function: ApiFunction {
                            name: "read_file".to_string(),
                            arguments: r#"{"path":"a.txt"}"#.to_string(),
                        },
                    }]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }],
            usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5 }),
        };

        let parsed = parse_response(resp);
        assert_eq!(parsed.content, "here you go");
        assert_eq!(parsed.stop_reason, "tool_calls");
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "read_file");
        assert_eq!(parsed.tool_calls[0].arguments, serde_json::json!({"path": "a.txt"}));
        assert_eq!(parsed.usage.input_tokens, 10);
        assert_eq!(parsed.usage.output_tokens, 5);
    }

    #[test]
    fn parse_response_falls_back_to_raw_string_on_unparsable_arguments() {
        let resp = ApiResponse {
            id: "resp-2".to_string(),
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                message: ChatMessage {
                    content: None,
                    tool_calls: Some(vec![ApiToolCall {
                        id: "t1".to_string(),
                        function: ApiFunction { name: "weird".to_string(), arguments: "not json".to_string() },
                    }]),
                },
                finish_reason: None,
            }],
            usage: None,
        };

        let parsed = parse_response(resp);
        assert_eq!(parsed.tool_calls[0].arguments, serde_json::Value::Null);
    }
}
