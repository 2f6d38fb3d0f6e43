use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::{
    channel::{Channel, MessageHandler},
    error::ChannelError,
    types::{ChannelStatus, InboundMessage, OutboundMessage, SendResult},
};

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 300;
/// Maximum number of reconnect attempts before giving up.
const MAX_ATTEMPTS: u32 = 10;
/// Jitter fraction applied to each delay (±10 %).
const JITTER_FRACTION: f64 = 0.10;

/// Manages the collection of registered channel adapters: wires a single
/// global inbound handler across all of them and offers aggregated
/// send/status operations.
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self { channels: HashMap::new() }
    }

    /// Register a channel adapter. Replaces any existing registration with
    /// the same id.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let id = channel.id().to_string();
        info!(channel = %id, "registering channel adapter");
        self.channels.insert(id, channel);
    }

    /// Wire the same handler into every registered channel's reader task.
    pub fn set_global_handler(&self, make_handler: impl Fn() -> MessageHandler) {
        for channel in self.channels.values() {
            channel.set_message_handler(make_handler());
        }
    }

    /// Start every registered channel, retrying with exponential backoff.
    pub async fn start_all(&self) {
        for (id, channel) in self.channels.iter() {
            info!(channel = %id, "starting channel");
            if let Err(e) = start_with_backoff(id, channel.as_ref()).await {
                error!(channel = %id, error = %e, "failed to start channel after retries");
            }
        }
    }

    pub async fn stop_all(&self) {
        for (id, channel) in self.channels.iter() {
            info!(channel = %id, "stopping channel");
            if let Err(e) = channel.stop().await {
                warn!(channel = %id, error = %e, "error while stopping channel");
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(id).cloned()
    }

    pub async fn send(&self, channel_id: &str, msg: OutboundMessage) -> Result<SendResult, ChannelError> {
        let channel = self
            .channels
            .get(channel_id)
            .ok_or_else(|| ChannelError::NotRegistered { channel: channel_id.to_string() })?;
        channel.send(msg).await
    }

    /// Convenience wrapper: reply to an inbound message on its own channel.
    pub async fn reply(&self, inbound: &InboundMessage, text: String) -> Result<SendResult, ChannelError> {
        let mut msg = OutboundMessage::text(inbound.chat_id.clone(), text);
        msg.reply_to = Some(inbound.id.clone());
        self.send(&inbound.channel, msg).await
    }

    /// Send the same text to every connected channel's given chat id map.
    /// `targets` maps channel id -> chat id.
    pub async fn broadcast(&self, targets: &[(String, String)], text: &str) {
        for (channel_id, chat_id) in targets {
            let msg = OutboundMessage::text(chat_id.clone(), text.to_string());
            if let Err(e) = self.send(channel_id, msg).await {
                warn!(channel = %channel_id, error = %e, "broadcast send failed");
            }
        }
    }

    /// Current status for every registered channel, sorted by id.
    pub fn statuses(&self) -> Vec<(String, ChannelStatus)> {
        let mut result: Vec<(String, ChannelStatus)> =
            self.channels.iter().map(|(id, ch)| (id.clone(), ch.status())).collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Attempt to start a single channel with exponential backoff and ±10% jitter.
/// Schedule: 5s -> 10s -> 20s -> ... -> 300s (cap), up to `MAX_ATTEMPTS` tries.
async fn start_with_backoff(id: &str, channel: &dyn Channel) -> Result<(), ChannelError> {
    let mut delay_secs = BACKOFF_BASE_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        match channel.start().await {
            Ok(()) => {
                info!(channel = %id, attempt, "channel started successfully");
                return Ok(());
            }
            Err(e) if attempt == MAX_ATTEMPTS => {
                return Err(e);
            }
            Err(e) => {
                let jitter = jitter_secs(delay_secs);
                let total = delay_secs + jitter;
                warn!(
                    channel = %id,
                    attempt,
                    max = MAX_ATTEMPTS,
                    error = %e,
                    retry_after_secs = total,
                    "channel start failed, retrying with backoff"
                );
                sleep(Duration::from_secs(total)).await;
                delay_secs = (delay_secs * 2).min(BACKOFF_MAX_SECS);
            }
        }
    }

    unreachable!("backoff loop exited without returning")
}

/// Return a jitter offset (0 .. JITTER_FRACTION * base_secs) as integer
/// seconds, derived from the current timestamp to avoid a rand dependency.
fn jitter_secs(base_secs: u64) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_secs as f64) * JITTER_FRACTION) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capabilities, ChatType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockChannel {
        id: String,
        sent: Mutex<Vec<OutboundMessage>>,
        fail_sends: AtomicUsize,
    }

    impl MockChannel {
        fn new(id: &str) -> Self {
            Self { id: id.to_string(), sent: Mutex::new(Vec::new()), fail_sends: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn id(&self) -> &str {
            &self.id
        }

        fn label(&self) -> &str {
            &self.id
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                chat_types: vec![ChatType::Direct],
                supports_images: false,
                supports_audio: false,
                supports_video: false,
                supports_docs: false,
                supports_voice: false,
                supports_buttons: false,
                supports_reactions: false,
                supports_threads: false,
                supports_edit: false,
                supports_delete: false,
                supports_markdown: false,
                supports_html: false,
                max_text_length: 4096,
                max_file_size: 0,
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

        async fn send(&self, msg: OutboundMessage) -> Result<SendResult, ChannelError> {
            if self.fail_sends.load(Ordering::SeqCst) > 0 {
                self.fail_sends.fetch_sub(1, Ordering::SeqCst);
                return Err(ChannelError::SendFailed("mock send failure".to_string()));
            }
            self.sent.lock().unwrap().push(msg);
            Ok(SendResult { message_id: Some("m1".to_string()), timestamp: 0, error: None })
        }

        fn set_message_handler(&self, _handler: MessageHandler) {}
    }

    #[tokio::test]
    async fn send_routes_to_the_registered_channel() {
        let mut manager = ChannelManager::new();
        manager.register(Arc::new(MockChannel::new("mock")));

        let result = manager
            .send("mock", OutboundMessage::text("c1".to_string(), "hi".to_string()))
            .await
            .unwrap();
        assert_eq!(result.message_id.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn send_to_unregistered_channel_is_an_error() {
        let manager = ChannelManager::new();
        let err = manager
            .send("nope", OutboundMessage::text("c1".to_string(), "hi".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::NotRegistered { .. }));
    }

    #[tokio::test]
    async fn reply_targets_the_inbound_messages_own_channel_and_chat() {
        let mut manager = ChannelManager::new();
        manager.register(Arc::new(MockChannel::new("mock")));

        let inbound = InboundMessage {
            id: "in-1".to_string(),
            channel: "mock".to_string(),
            chat_id: "c1".to_string(),
            chat_type: ChatType::Direct,
            sender_id: "u1".to_string(),
            sender_name: None,
            text: "hi".to_string(),
            timestamp: 0,
            reply_to: None,
            attachments: Vec::new(),
            mentions: Vec::new(),
            raw_payload: None,
            metadata: Default::default(),
        };

        manager.reply(&inbound, "hello back".to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_continues_past_a_single_channel_failure() {
        let mut manager = ChannelManager::new();
        let failing = Arc::new(MockChannel::new("a"));
        failing.fail_sends.store(1, Ordering::SeqCst);
        manager.register(failing);
        manager.register(Arc::new(MockChannel::new("b")));

        // Should not panic even though channel "a" fails once.
        manager
            .broadcast(&[("a".to_string(), "c1".to_string()), ("b".to_string(), "c1".to_string())], "ping")
            .await;
    }

    #[test]
    fn statuses_are_sorted_by_channel_id() {
        let mut manager = ChannelManager::new();
        manager.register(Arc::new(MockChannel::new("zeta")));
        manager.register(Arc::new(MockChannel::new("alpha")));

        let statuses = manager.statuses();
        assert_eq!(statuses[0].0, "alpha");
        assert_eq!(statuses[1].0, "zeta");
    }
}
