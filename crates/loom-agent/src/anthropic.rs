use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use loom_core::types::{ContentBlock, ImageSource, Message, Role};

use crate::provider::{
    ChatRequest, ChatResponse, LlmProvider, ModelInfo, ProviderError, ToolCall, Usage,
};
use crate::stream::StreamEvent;
use crate::thinking::ThinkingLevel;

const API_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";
const OAUTH_TOKEN_PREFIX: &str = "sk-ant-oat01-";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    is_oauth: bool,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let is_oauth = api_key.starts_with(OAUTH_TOKEN_PREFIX);
        Self {
            client: reqwest::Client::new(),
            is_oauth,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }

    /// Apply auth headers — OAuth tokens use Bearer + beta header,
    /// regular API keys use x-api-key.
    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.is_oauth {
            builder
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("anthropic-beta", OAUTH_BETA)
        } else {
            builder.header("x-api-key", &self.api_key)
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn list_models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "claude-sonnet-4-6".to_string(),
                context_window: 200_000,
                max_output: 64_000,
                supports_tools: true,
                supports_vision: true,
            },
            ModelInfo {
                id: "claude-opus-4-6".to_string(),
                context_window: 200_000,
                max_output: 32_000,
                supports_tools: true,
                supports_vision: true,
            },
            ModelInfo {
                id: "claude-haiku-4-6".to_string(),
                context_window: 200_000,
                max_output: 64_000,
                supports_tools: true,
                supports_vision: true,
            },
        ]
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req, false);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending request to Anthropic");

        let builder = self
            .client
            .post(&url)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let resp = self.apply_auth(builder).send().await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
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
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending streaming request to Anthropic");

        let builder = self
            .client
            .post(&url)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let resp = self.apply_auth(builder).send().await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic streaming API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        crate::anthropic_stream::process_stream(resp, tx).await;
        Ok(())
    }
}

/// Anthropic rejects `thinking` blocks replayed from a prior assistant turn,
/// so every outgoing message's content is filtered before the request body
/// is built.
fn message_content_blocks(message: &Message) -> Vec<serde_json::Value> {
    message
        .content
        .blocks()
        .iter()
        .filter(|b| !matches!(b, ContentBlock::Thinking { .. }))
        .map(content_block_to_anthropic)
        .collect()
}

fn content_block_to_anthropic(block: &ContentBlock) -> serde_json::Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({ "type": "text", "text": text }),
        ContentBlock::Image { mediatype, source } => {
            let source = match source {
                ImageSource::Url { url } => serde_json::json!({ "type": "url", "url": url }),
                ImageSource::Bytes { base64 } => serde_json::json!({
                    "type": "base64",
                    "media_type": mediatype,
                    "data": base64,
                }),
            };
            serde_json::json!({ "type": "image", "source": source })
        }
        ContentBlock::ToolUse { id, name, arguments } => serde_json::json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": arguments,
        }),
        ContentBlock::ToolResult { tool_use_id, content, is_error } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
        ContentBlock::Thinking { text } => serde_json::json!({ "type": "thinking", "thinking": text }),
    }
}

/// Anthropic only knows "user" and "assistant" roles on the wire — a
/// `Role::Tool` message (carrying `tool_result` blocks) is addressed to the
/// model, so it travels as "user"; `Role::System` never belongs in the
/// message array (it's sent via the top-level `system` field instead).
fn wire_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "assistant",
        Role::User | Role::Tool | Role::System => "user",
    }
}

fn build_request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": wire_role(m.role),
                "content": message_content_blocks(m),
            })
        })
        .collect();

    // Use structured cache blocks when available, plain string otherwise
    let system: serde_json::Value = if let Some(ref prompt) = req.system_prompt {
        serde_json::Value::Array(prompt.to_anthropic_blocks())
    } else {
        serde_json::Value::String(req.system.clone())
    };

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "system": system,
        "messages": messages,
        "stream": stream,
    });

    if let Some(temp) = req.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if !req.stop_sequences.is_empty() {
        body["stop_sequences"] = serde_json::json!(req.stop_sequences);
    }

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    if let Some(level) = req.thinking {
        if level != ThinkingLevel::Off {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": level.budget_tokens(),
            });
        }
    }

    body
}

fn parse_response(resp: ApiResponse) -> ChatResponse {
    let mut text_parts: Vec<String> = Vec::new();
    let mut thinking_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in resp.content {
        match block {
            ApiContentBlock::Text { text } => text_parts.push(text),
            ApiContentBlock::Thinking { thinking } => thinking_parts.push(thinking),
            ApiContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall { id, name, arguments: input });
            }
            ApiContentBlock::Unknown => {}
        }
    }

    ChatResponse {
        id: resp.id,
        content: text_parts.join(""),
        model: resp.model,
        thinking: if thinking_parts.is_empty() { None } else { Some(thinking_parts.join("")) },
        usage: Usage {
            input_tokens: resp.usage.input_tokens as u64,
            output_tokens: resp.usage.output_tokens as u64,
            cache_read: resp.usage.cache_read_input_tokens.unwrap_or(0) as u64,
            cache_write: resp.usage.cache_creation_input_tokens.unwrap_or(0) as u64,
        },
        stop_reason: resp.stop_reason.unwrap_or_default(),
        tool_calls,
    }
}

// Anthropic API response types (private — only used for deserialization)

#[derive(Deserialize)]
struct ApiResponse {
    id: String,
    model: String,
    content: Vec<ApiContentBlock>,
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ApiContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    /// Internal reasoning block produced by extended thinking.
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    /// Tool call block — the LLM wants to invoke a tool.
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
    cache_read_input_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: "claude-sonnet-4-6".to_string(),
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
    fn system_prompt_travels_as_top_level_field_not_a_message() {
        let req = base_request(vec![Message::user("hi")]);
        let body = build_request_body(&req, false);
        assert_eq!(body["system"], "be helpful");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn tool_role_message_travels_as_user_on_the_wire() {
        let msg = Message {
            role: Role::Tool,
            content: loom_core::types::MessageContent::Blocks(vec![ContentBlock::tool_result(
                "t1", "42", false,
            )]),
            tool_call_id: None,
        };
        let req = base_request(vec![msg]);
        let body = build_request_body(&req, false);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "tool_result");
    }

    #[test]
    fn thinking_blocks_are_stripped_from_replayed_messages() {
        let msg = Message::assistant(vec![
            ContentBlock::Thinking { text: "reasoning...".to_string() },
            ContentBlock::text("answer"),
        ]);
        let req = base_request(vec![msg]);
        let body = build_request_body(&req, false);
        let blocks = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["type"], "text");
    }

    #[test]
    fn thinking_level_adds_budget_when_enabled() {
        let mut req = base_request(vec![Message::user("hi")]);
        req.thinking = Some(ThinkingLevel::Medium);
        let body = build_request_body(&req, false);
        assert_eq!(body["thinking"]["type"], "enabled");
        assert!(body["thinking"]["budget_tokens"].as_u64().unwrap() > 0);
    }

    #[test]
    fn thinking_off_omits_the_field() {
        let mut req = base_request(vec![Message::user("hi")]);
        req.thinking = Some(ThinkingLevel::Off);
        let body = build_request_body(&req, false);
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn parse_response_separates_text_thinking_and_tool_use_blocks() {
        let resp = ApiResponse {
            id: "msg_1".to_string(),
            model: "claude-sonnet-4-6".to_string(),
            content: vec![
                ApiContentBlock::Thinking { thinking: "let me check".to_string() },
                ApiContentBlock::Text { text: "here you go".to_string() },
                ApiContentBlock::ToolUse {
                    id: "t1".to_string(),
                    name: "read_file".to_string(),
                    input: serde_json::json!({"path": "a.txt"}),
                },
            ],
            stop_reason: Some("tool_use".to_string()),
            usage: ApiUsage {
                input_tokens: 20,
                output_tokens: 8,
                cache_read_input_tokens: Some(4),
                cache_creation_input_tokens: Some(2),
            },
        };

        let parsed = parse_response(resp);
        assert_eq!(parsed.content, "here you go");
        assert_eq!(parsed.thinking.as_deref(), Some("let me check"));
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.stop_reason, "tool_use");
        assert_eq!(parsed.usage.cache_read, 4);
        assert_eq!(parsed.usage.cache_write, 2);
    }
}
