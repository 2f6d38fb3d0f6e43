//! The LLM-facing half of the gateway: provider adapters, the normalized
//! streaming event model, the tool registry, and the agent loop that ties
//! them together with a session.

pub mod anthropic;
pub mod anthropic_stream;
pub mod ollama;
pub mod openai;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod stream;
pub mod thinking;
pub mod tools;
pub mod truncate;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use pipeline::{run_turn, TurnConfig, TurnOutcome};
pub use provider::{ChatRequest, ChatResponse, LlmProvider, ModelInfo, ProviderError, ToolCall, ToolDefinition, Usage};
pub use stream::StreamEvent;
pub use tools::{Tool, ToolRegistry, ToolResult};
