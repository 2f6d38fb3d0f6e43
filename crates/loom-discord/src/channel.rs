use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use serenity::model::gateway::GatewayIntents;
use serenity::model::id::ChannelId;
use serenity::Client;
use tracing::{error, warn};

use loom_channels::channel::{Channel, MessageHandler};
use loom_channels::error::ChannelError;
use loom_channels::types::{Capabilities, ChannelStatus, ChatType, OutboundMessage, SendResult};
use loom_core::config::DiscordConfig;

use crate::handler::DiscordHandler;
use crate::send;

/// Discord channel adapter: one `serenity` gateway connection per process.
///
/// [`start`](Channel::start) makes a single connection attempt and returns;
/// [`ChannelManager`](loom_channels::ChannelManager) is responsible for
/// retrying with backoff if it fails. Once connected, serenity's own gateway
/// loop keeps running in a background task for the adapter's lifetime.
pub struct DiscordChannel {
    config: DiscordConfig,
    handler: Mutex<Option<Arc<MessageHandler>>>,
    http: OnceLock<Arc<serenity::http::Http>>,
    shard_manager: Mutex<Option<Arc<serenity::gateway::ShardManager>>>,
    status: Mutex<ChannelStatus>,
}

impl DiscordChannel {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            handler: Mutex::new(None),
            http: OnceLock::new(),
            shard_manager: Mutex::new(None),
            status: Mutex::new(ChannelStatus::disconnected()),
        }
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn id(&self) -> &str {
        "discord"
    }

    fn label(&self) -> &str {
        "Discord"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            chat_types: vec![ChatType::Direct, ChatType::Group],
            supports_images: true,
            supports_audio: true,
            supports_video: true,
            supports_docs: true,
            supports_voice: true,
            supports_buttons: false,
            supports_reactions: true,
            supports_threads: true,
            supports_edit: true,
            supports_delete: true,
            supports_markdown: true,
            supports_html: false,
            max_text_length: 1950,
            max_file_size: 25 * 1024 * 1024,
        }
    }

    async fn start(&self) -> Result<(), ChannelError> {
        let handler = self
            .handler
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ChannelError::ConfigError("no message handler registered".to_string()))?;

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let event_handler = DiscordHandler { handler, config: self.config.clone(), bot_id: OnceLock::new() };

        let mut client = Client::builder(&self.config.bot_token, intents)
            .event_handler(event_handler)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        *self.http.get_or_init(|| Arc::clone(&client.http));
        *self.shard_manager.lock().unwrap() = Some(Arc::clone(&client.shard_manager));

        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                warn!(error = %e, "Discord gateway loop exited");
            }
        });

        *self.status.lock().unwrap() = ChannelStatus::connected();
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        if let Some(manager) = self.shard_manager.lock().unwrap().clone() {
            manager.shutdown_all().await;
        }
        *self.status.lock().unwrap() = ChannelStatus::disconnected();
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }

    async fn send(&self, msg: OutboundMessage) -> Result<SendResult, ChannelError> {
        let http = self
            .http
            .get()
            .ok_or_else(|| ChannelError::SendFailed("channel not started".to_string()))?;

        let channel_id: ChannelId = msg
            .chat_id
            .parse::<u64>()
            .map(ChannelId::new)
            .map_err(|_| ChannelError::SendFailed(format!("invalid channel id: {}", msg.chat_id)))?;

        let mut last_id = None;
        for chunk in send::split_chunks(&msg.text) {
            match channel_id.say(http.as_ref(), &chunk).await {
                Ok(sent) => last_id = Some(sent.id.to_string()),
                Err(e) => {
                    error!(error = %e, "Discord send failed");
                    return Err(ChannelError::SendFailed(e.to_string()));
                }
            }
        }

        Ok(SendResult {
            message_id: last_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            error: None,
        })
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        *self.handler.lock().unwrap() = Some(Arc::from(handler));
    }
}
