//! The WebChat transport: the one channel the core itself owns (§6), since
//! its wire format is part of the gateway rather than an external adapter.
//!
//! Unlike Discord/Telegram, WebChat has no independent reader task — inbound
//! messages arrive as HTTP `POST /webchat/message` calls and are fed
//! straight into [`loom_channels::Router::handle_inbound`] by the handler in
//! `http::webchat`. This adapter exists only so the router's generic
//! "look up capabilities / send a reply on the originating channel" path
//! has somewhere to land; delivery itself already happened through the
//! per-turn SSE sink by the time `Channel::send` is called.

use async_trait::async_trait;

use loom_channels::channel::{Channel, MessageHandler};
use loom_channels::error::ChannelError;
use loom_channels::types::{Capabilities, ChannelStatus, ChatType, OutboundMessage, SendResult};

pub struct WebChatChannel;

#[async_trait]
impl Channel for WebChatChannel {
    fn id(&self) -> &str {
        "webchat"
    }

    fn label(&self) -> &str {
        "WebChat"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            chat_types: vec![ChatType::Direct],
            supports_images: true,
            supports_audio: false,
            supports_video: false,
            supports_docs: true,
            supports_voice: false,
            supports_buttons: false,
            supports_reactions: false,
            supports_threads: false,
            supports_edit: false,
            supports_delete: false,
            supports_markdown: true,
            supports_html: false,
            max_text_length: 100_000,
            max_file_size: 20 * 1024 * 1024,
        }
    }

    async fn start(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        ChannelStatus::connected()
    }

    /// A no-op: the SSE sink passed to `Router::handle_inbound` already
    /// streamed the reply to the browser. This exists so
    /// `Router::truncate_for_channel`/`ChannelManager::reply` have a
    /// registered channel to address.
    async fn send(&self, msg: OutboundMessage) -> Result<SendResult, ChannelError> {
        Ok(SendResult {
            message_id: Some(format!("webchat:{}", msg.chat_id)),
            timestamp: chrono::Utc::now().timestamp_millis(),
            error: None,
        })
    }

    /// WebChat never registers a handler — inbound messages are fed
    /// directly from the HTTP handler, not a reader task.
    fn set_message_handler(&self, _handler: MessageHandler) {}
}
