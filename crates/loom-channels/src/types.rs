use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Direct,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    Image,
    Audio,
    Video,
    Document,
    Voice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    pub url: Option<String>,
    pub mime: Option<String>,
    pub filename: Option<String>,
    pub caption: Option<String>,
    pub duration: Option<u32>,
}

/// Normalized message delivered by every Channel implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel-local message id.
    pub id: String,
    pub channel: String,
    pub chat_id: String,
    pub chat_type: ChatType,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub text: String,
    /// Unix ms.
    pub timestamp: i64,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub mentions: Vec<String>,
    pub raw_payload: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    Markdown,
    Html,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub callback_data: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub silent: bool,
    #[serde(default = "default_parse_mode")]
    pub parse_mode: ParseMode,
    #[serde(default)]
    pub buttons: Vec<Button>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

fn default_parse_mode() -> ParseMode {
    ParseMode::None
}

impl OutboundMessage {
    pub fn text(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            reply_to: None,
            attachments: Vec::new(),
            silent: false,
            parse_mode: ParseMode::None,
            buttons: Vec::new(),
            metadata: std::collections::HashMap::new(),
        }
    }
}

/// Result of a `send` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub message_id: Option<String>,
    pub timestamp: i64,
    pub error: Option<String>,
}

/// Capabilities a channel advertises — determines whether the router needs
/// to adapt content (e.g. downgrade markdown to plain text, truncate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub chat_types: Vec<ChatType>,
    pub supports_images: bool,
    pub supports_audio: bool,
    pub supports_video: bool,
    pub supports_docs: bool,
    pub supports_voice: bool,
    pub supports_buttons: bool,
    pub supports_reactions: bool,
    pub supports_threads: bool,
    pub supports_edit: bool,
    pub supports_delete: bool,
    pub supports_markdown: bool,
    pub supports_html: bool,
    pub max_text_length: usize,
    pub max_file_size: usize,
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub connected: bool,
    pub error: Option<String>,
    pub account: Option<String>,
    #[serde(default)]
    pub details: std::collections::HashMap<String, String>,
}

impl ChannelStatus {
    pub fn connected() -> Self {
        Self { connected: true, error: None, account: None, details: Default::default() }
    }

    pub fn disconnected() -> Self {
        Self { connected: false, error: None, account: None, details: Default::default() }
    }

    pub fn errored(error: impl Into<String>) -> Self {
        Self { connected: false, error: Some(error.into()), account: None, details: Default::default() }
    }
}

