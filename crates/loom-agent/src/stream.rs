//! The normalized event stream every provider adapter must produce.
//!
//! A `chat_stream` call emits exactly one [`StreamEvent::Start`], zero or
//! more `Delta`/`Thinking`/`ToolCall`, zero or one `Usage`, and exactly one
//! terminal event (`Done` or `Error`).

use serde_json::Value;

/// One event in a provider's normalized streaming response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Emitted once, before any content, once the vendor has acknowledged
    /// the request and named the model actually serving it.
    Start { model: String },

    /// Incremental visible text.
    Delta { text: String },

    /// Incremental internal reasoning (extended thinking). Never persisted
    /// into the session message log — forwarded to a separate callback, or
    /// discarded, at the caller's discretion.
    Thinking { text: String },

    /// A fully-buffered tool call. Vendors stream tool arguments as partial
    /// text fragments; the adapter accumulates them per tool-call index
    /// until the vendor signals the containing block is complete, then
    /// parses the accumulated text to JSON (falling back to the raw string
    /// if it doesn't parse) and emits exactly one `ToolCall`.
    ToolCall { id: String, name: String, arguments: Value },

    /// Token usage, when the vendor reports it mid-stream or at the end.
    Usage { input_tokens: u64, output_tokens: u64 },

    /// Terminal: the stream failed. No further events follow.
    Error { message: String },

    /// Terminal: the stream completed successfully, carrying the vendor's
    /// final stop reason. Passed through unnormalized — see the Open
    /// Question on `stop_reason` in the design notes: callers must use the
    /// presence of tool_use blocks, not this string, as the canonical
    /// "should I keep looping" signal.
    Done { stop_reason: String },
}

/// Parse a single SSE line (`event: ...` or `data: ...`). Shared by every
/// SSE-framed vendor (Anthropic, OpenAI-compatible).
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ").map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

/// Accumulates a single tool call's argument fragments until the vendor
/// signals the containing content block is complete.
#[derive(Debug, Default, Clone)]
pub struct ToolCallBuffer {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

impl ToolCallBuffer {
    /// Parse the accumulated JSON fragment, falling back to the raw string
    /// if it doesn't parse — the executor may still understand it.
    pub fn into_event(self) -> StreamEvent {
        let arguments = serde_json::from_str::<Value>(&self.arguments_json)
            .unwrap_or_else(|_| Value::String(self.arguments_json.clone()));
        StreamEvent::ToolCall { id: self.id, name: self.name, arguments }
    }
}
