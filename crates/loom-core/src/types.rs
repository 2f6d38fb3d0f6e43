use serde::{Deserialize, Serialize};
use std::fmt;

/// A single role in the conversation. `Tool` carries the response to one
/// prior `tool_use`, identified by `tool_call_id` on the owning message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Tagged content block. Every consumer exhaustively discriminates on this
/// rather than treating message content as a grab-bag of optional fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { mediatype: String, source: ImageSource },
    ToolUse {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Thinking { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    Url { url: String },
    Bytes { base64: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        ContentBlock::ToolUse { id: id.into(), name: name.into(), arguments }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        ContentBlock::ToolResult { tool_use_id: tool_use_id.into(), content: content.into(), is_error }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Message content accepts either a plain string or an ordered sequence of
/// blocks on the wire; internally we always normalize to the sequence form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(s) => vec![ContentBlock::text(s.clone())],
            MessageContent::Blocks(b) => b.clone(),
        }
    }

    /// Flattened text, concatenating all text blocks. Used for plain-text
    /// transports and logging.
    pub fn flat_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.as_text())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<Vec<ContentBlock>> for MessageContent {
    fn from(b: Vec<ContentBlock>) -> Self {
        MessageContent::Blocks(b)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()), tool_call_id: None }
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Blocks(blocks), tool_call_id: None }
    }
}

/// Monotonic per-session token/call counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub message_count: u64,
    pub tool_call_count: u64,
}

impl Usage {
    pub fn add_tokens(&mut self, input: u64, output: u64) {
        self.input_tokens += input;
        self.output_tokens += output;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_string_shorthand_normalizes_to_a_single_text_block() {
        let content = MessageContent::Text("hi there".to_string());
        assert_eq!(content.blocks().len(), 1);
        assert_eq!(content.flat_text(), "hi there");
    }

    #[test]
    fn flat_text_concatenates_only_text_blocks() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::text("part one "),
            ContentBlock::tool_use("t1", "read_file", serde_json::json!({"path": "a.txt"})),
            ContentBlock::text("part two"),
        ]);
        assert_eq!(content.flat_text(), "part one part two");
    }

    #[test]
    fn wire_shape_accepts_both_string_and_block_sequence() {
        let as_string: MessageContent = serde_json::from_str(r#""hello""#).unwrap();
        assert!(matches!(as_string, MessageContent::Text(s) if s == "hello"));

        let as_blocks: MessageContent =
            serde_json::from_str(r#"[{"type":"text","text":"hi"}]"#).unwrap();
        assert!(matches!(as_blocks, MessageContent::Blocks(_)));
    }

    #[test]
    fn usage_add_tokens_is_additive() {
        let mut usage = Usage::default();
        usage.add_tokens(10, 5);
        usage.add_tokens(3, 2);
        assert_eq!(usage.input_tokens, 13);
        assert_eq!(usage.output_tokens, 7);
    }
}
