use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::stream::{parse_sse_line, SseParsed, StreamEvent, ToolCallBuffer};

/// Parse Anthropic streaming SSE response and emit StreamEvents.
/// Reads from a reqwest byte stream, parses SSE lines, emits events.
pub async fn process_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    use futures_util::StreamExt;

    let mut current_event = String::new();
    // Tracks the content block type reported by `content_block_start`
    // ("text", "thinking", or "tool_use") so deltas know what to emit.
    let mut current_block_type = String::new();
    let mut tool_buf = ToolCallBuffer::default();
    let mut stop_reason = String::new();
    let mut started = false;
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

        // Anthropic sends SSE: multiple lines per chunk, split by newlines
        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();

        // keep incomplete last line in buffer
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(parsed) = parse_sse_line(line) {
                match parsed {
                    SseParsed::Event(ev) => current_event = ev,
                    SseParsed::Data(data) => {
                        let events = parse_data_block(
                            &current_event,
                            &data,
                            &mut current_block_type,
                            &mut tool_buf,
                            &mut stop_reason,
                            &mut started,
                        );
                        for event in events {
                            let is_error = matches!(event, StreamEvent::Error { .. });
                            if tx.send(event).await.is_err() {
                                return; // receiver dropped
                            }
                            if is_error {
                                // Error is terminal — no further events, including Done, may follow.
                                return;
                            }
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    let _ = tx.send(StreamEvent::Done { stop_reason }).await;
}

/// Parse a single SSE data block based on the current event type. Returns
/// zero or more events — `message_start` may emit both `Start` and a partial
/// `Usage`, for instance.
fn parse_data_block(
    event_type: &str,
    data: &str,
    current_block_type: &mut String,
    tool_buf: &mut ToolCallBuffer,
    stop_reason: &mut String,
    started: &mut bool,
) -> Vec<StreamEvent> {
    match event_type {
        "message_start" => {
            let mut events = Vec::new();
            if let Ok(msg) = serde_json::from_str::<MessageStart>(data) {
                events.push(StreamEvent::Start { model: msg.message.model });
                *started = true;
                events.push(StreamEvent::Usage {
                    input_tokens: msg.message.usage.input_tokens as u64,
                    output_tokens: 0,
                });
            }
            events
        }

        "content_block_start" => {
            if let Ok(block_start) = serde_json::from_str::<ContentBlockStart>(data) {
                *current_block_type = block_start.content_block.block_type.clone();
                if block_start.content_block.block_type == "tool_use" {
                    tool_buf.id = block_start.content_block.id.unwrap_or_default();
                    tool_buf.name = block_start.content_block.name.unwrap_or_default();
                    tool_buf.arguments_json.clear();
                }
            }
            Vec::new()
        }

        "content_block_delta" => {
            if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(data) {
                match delta.delta.delta_type.as_str() {
                    "text_delta" => {
                        if let Some(text) = delta.delta.text {
                            debug!(len = text.len(), "stream text delta");
                            return vec![StreamEvent::Delta { text }];
                        }
                    }
                    "thinking_delta" => {
                        if let Some(text) = delta.delta.thinking {
                            debug!(len = text.len(), "stream thinking delta");
                            return vec![StreamEvent::Thinking { text }];
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.delta.partial_json {
                            tool_buf.arguments_json.push_str(&partial);
                        }
                    }
                    other => {
                        debug!(delta_type = other, "unhandled delta type");
                    }
                }
            }
            Vec::new()
        }

        "content_block_stop" => {
            if current_block_type == "tool_use" {
                let finished = std::mem::take(tool_buf);
                current_block_type.clear();
                return vec![finished.into_event()];
            }
            current_block_type.clear();
            Vec::new()
        }

        "message_delta" => {
            if let Ok(delta) = serde_json::from_str::<MessageDelta>(data) {
                if let Some(reason) = delta.delta.stop_reason {
                    *stop_reason = reason;
                }
                return vec![StreamEvent::Usage {
                    input_tokens: 0,
                    output_tokens: delta.usage.output_tokens as u64,
                }];
            }
            Vec::new()
        }

        "error" => {
            warn!(data, "anthropic stream error");
            vec![StreamEvent::Error { message: data.to_string() }]
        }

        // message_stop and unknown events — no action needed
        _ => Vec::new(),
    }
}

// Anthropic SSE data types (private — deserialization only)

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Deserialize)]
struct MessageStartInner {
    model: String,
    usage: InputUsage,
}

#[derive(Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

/// Carries the opening metadata for a content block.
/// Used to identify whether the upcoming deltas are "text", "thinking", or "tool_use".
#[derive(Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlockMeta,
}

#[derive(Deserialize)]
struct ContentBlockMeta {
    #[serde(rename = "type")]
    block_type: String,
    /// Populated for `tool_use` blocks: the tool call id.
    id: Option<String>,
    /// Populated for `tool_use` blocks: the tool name.
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    /// Populated for `text_delta` events.
    text: Option<String>,
    /// Populated for `thinking_delta` events.
    thinking: Option<String>,
    /// Populated for `input_json_delta` events (tool input streaming).
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaInner,
    usage: OutputUsage,
}

#[derive(Deserialize)]
struct MessageDeltaInner {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> (String, ToolCallBuffer, String, bool) {
        (String::new(), ToolCallBuffer::default(), String::new(), false)
    }

    #[test]
    fn message_start_emits_start_then_usage() {
        let (mut block_type, mut tool_buf, mut stop_reason, mut started) = state();
        let data = r#"{"message":{"model":"claude-sonnet-4-6","usage":{"input_tokens":12}}}"#;
        let events = parse_data_block(
            "message_start", data, &mut block_type, &mut tool_buf, &mut stop_reason, &mut started,
        );
        assert!(started);
        match &events[0] {
            StreamEvent::Start { model } => assert_eq!(model, "claude-sonnet-4-6"),
            other => panic!("expected Start, got {other:?}"),
        }
        match &events[1] {
            StreamEvent::Usage { input_tokens, output_tokens } => {
                assert_eq!(*input_tokens, 12);
                assert_eq!(*output_tokens, 0);
            }
            other => panic!("expected Usage, got {other:?}"),
        }
    }

    #[test]
    fn text_delta_round_trips_as_delta_event() {
        let (mut block_type, mut tool_buf, mut stop_reason, mut started) = state();
        block_type.push_str("text");
        let data = r#"{"delta":{"type":"text_delta","text":"hello"}}"#;
        let events = parse_data_block(
            "content_block_delta", data, &mut block_type, &mut tool_buf, &mut stop_reason, &mut started,
        );
        match &events[0] {
            StreamEvent::Delta { text } => assert_eq!(text, "hello"),
            other => panic!("expected Delta, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_arguments_buffer_across_deltas_until_block_stop() {
        let (mut block_type, mut tool_buf, mut stop_reason, mut started) = state();

        let start = r#"{"content_block":{"type":"tool_use","id":"t1","name":"read_file"}}"#;
        let events = parse_data_block(
            "content_block_start", start, &mut block_type, &mut tool_buf, &mut stop_reason, &mut started,
        );
        assert!(events.is_empty());
        assert_eq!(block_type, "tool_use");

        for frag in [r#"{"delta":{"type":"input_json_delta","partial_json":"{\"pa"}}"#,
                     r#"{"delta":{"type":"input_json_delta","partial_json":"th\":\"a.txt\"}"}}"#] {
            let events = parse_data_block(
                "content_block_delta", frag, &mut block_type, &mut tool_buf, &mut stop_reason, &mut started,
            );
            assert!(events.is_empty(), "deltas should not emit until block stop");
        }

        let events = parse_data_block(
            "content_block_stop", "{}", &mut block_type, &mut tool_buf, &mut stop_reason, &mut started,
        );
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::ToolCall { id, name, arguments } => {
                assert_eq!(id, "t1");
                assert_eq!(name, "read_file");
                assert_eq!(arguments, &serde_json::json!({"path": "a.txt"}));
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }
        assert!(block_type.is_empty());
    }

    #[test]
    fn message_delta_captures_stop_reason_and_output_usage() {
        let (mut block_type, mut tool_buf, mut stop_reason, mut started) = state();
        let data = r#"{"delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":7}}"#;
        let events = parse_data_block(
            "message_delta", data, &mut block_type, &mut tool_buf, &mut stop_reason, &mut started,
        );
        assert_eq!(stop_reason, "end_turn");
        match &events[0] {
            StreamEvent::Usage { output_tokens, .. } => assert_eq!(*output_tokens, 7),
            other => panic!("expected Usage, got {other:?}"),
        }
    }

    #[test]
    fn error_event_is_surfaced() {
        let (mut block_type, mut tool_buf, mut stop_reason, mut started) = state();
        let events = parse_data_block(
            "error", r#"{"type":"error","error":{"message":"overloaded"}}"#,
            &mut block_type, &mut tool_buf, &mut stop_reason, &mut started,
        );
        assert!(matches!(&events[0], StreamEvent::Error { .. }));
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let (mut block_type, mut tool_buf, mut stop_reason, mut started) = state();
        let events = parse_data_block(
            "message_stop", "{}", &mut block_type, &mut tool_buf, &mut stop_reason, &mut started,
        );
        assert!(events.is_empty());
    }
}
