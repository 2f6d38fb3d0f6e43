use async_trait::async_trait;

use crate::{
    error::ChannelError,
    types::{Capabilities, ChannelStatus, InboundMessage, OutboundMessage, SendResult},
};

/// A callback invoked from a channel's own reader task for every normalized
/// inbound message. Must return promptly — the router spawns a new task per
/// message rather than blocking the reader.
pub type MessageHandler = Box<dyn Fn(InboundMessage) + Send + Sync>;

/// Common interface implemented by every transport adapter (Telegram,
/// Discord, WebChat, the local CLI, ...).
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier (e.g. `"telegram"`). Used as the key
    /// inside [`ChannelManager`](crate::manager::ChannelManager).
    fn id(&self) -> &str;

    /// Human-readable label for status displays.
    fn label(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Establish the connection and begin reading inbound events.
    async fn start(&self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn stop(&self) -> Result<(), ChannelError>;

    fn status(&self) -> ChannelStatus;

    async fn send(&self, msg: OutboundMessage) -> Result<SendResult, ChannelError>;

    /// Registers the single callback invoked for every inbound message.
    /// Replaces any previously registered handler.
    fn set_message_handler(&self, handler: MessageHandler);
}
