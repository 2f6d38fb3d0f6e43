use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use loom_core::types::Message;

use crate::prompt::SystemPrompt;
use crate::stream::StreamEvent;
use crate::thinking::ThinkingLevel;

/// One model a provider can serve, as advertised by `list_models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub context_window: u32,
    pub max_output: u32,
    pub supports_tools: bool,
    pub supports_vision: bool,
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Request to an LLM provider, built by the agent loop from a session's
/// effective message list (compacted summary preamble + tail, see
/// `pipeline::compact`), the configured system prompt, and the registered
/// tools' declared schemas.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// Plain-text system prompt, used as-is by providers without a caching
    /// tier concept.
    pub system: String,
    /// Optional tiered prompt with cache breakpoints (Anthropic only).
    pub system_prompt: Option<SystemPrompt>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub stop_sequences: Vec<String>,
    /// Optional thinking level for extended reasoning (Anthropic only).
    /// `None` and `Some(ThinkingLevel::Off)` both disable the thinking block.
    pub thinking: Option<ThinkingLevel>,
    /// Tools to expose to the LLM. Empty when the caller registered none.
    pub tools: Vec<ToolDefinition>,
}

/// Response from an LLM provider (non-streaming).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    /// Flattened visible text (concatenation of text blocks).
    pub content: String,
    pub thinking: Option<String>,
    /// Tool calls requested by the LLM. Empty when no tools are called.
    pub tool_calls: Vec<ToolCall>,
    /// Passed through from the vendor unnormalized — see the Open Question
    /// on `stop_reason` in the design notes.
    pub stop_reason: String,
    pub usage: Usage,
}

/// Token accounting for a single provider round trip.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

/// Common interface for all LLM providers (Anthropic, OpenAI-compatible,
/// Ollama, ...). No inheritance — every adapter is an independent concrete
/// implementation of this one trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable identifier for logging, error messages, and config lookup.
    fn id(&self) -> &str;

    /// Models this provider can serve. A small static table is acceptable
    /// when the vendor has no stable discovery endpoint.
    fn list_models(&self) -> Vec<ModelInfo>;

    /// Send a non-streaming chat request, wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Stream response events through a channel. The default implementation
    /// falls back to the unary call and replays it as `Start`, `Delta`,
    /// `Usage`, `Done` — correct for providers with no native streaming,
    /// but every adapter here overrides it with a real SSE/NDJSON decoder.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let _ = tx.send(StreamEvent::Start { model: req.model.clone() }).await;
        let resp = self.chat(req).await?;
        if !resp.content.is_empty() {
            let _ = tx.send(StreamEvent::Delta { text: resp.content }).await;
        }
        for call in resp.tool_calls {
            let _ = tx
                .send(StreamEvent::ToolCall { id: call.id, name: call.name, arguments: call.arguments })
                .await;
        }
        let _ = tx
            .send(StreamEvent::Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            })
            .await;
        let _ = tx.send(StreamEvent::Done { stop_reason: resp.stop_reason }).await;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<ProviderError> for loom_core::error::GatewayError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Cancelled => loom_core::error::GatewayError::Cancelled,
            ProviderError::Http(e) => loom_core::error::GatewayError::Transport(e.to_string()),
            ProviderError::Api { status, message } => {
                loom_core::error::GatewayError::Transport(format!("{status}: {message}"))
            }
            ProviderError::Parse(m) => loom_core::error::GatewayError::Protocol(m),
            ProviderError::RateLimited { retry_after_ms } => {
                loom_core::error::GatewayError::Transport(format!("rate limited, retry after {retry_after_ms}ms"))
            }
            ProviderError::Unavailable(m) => loom_core::error::GatewayError::Transport(m),
        }
    }
}
