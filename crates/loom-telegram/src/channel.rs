use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use teloxide::types::ParseMode as TgParseMode;
use tracing::error;

use loom_channels::channel::{Channel, MessageHandler};
use loom_channels::error::ChannelError;
use loom_channels::types::{Capabilities, ChannelStatus, ChatType, OutboundMessage, SendResult};
use loom_core::config::TelegramConfig;

use crate::handler::handle_message;
use crate::send::{escape_markdown_v2, split_chunks_smart};

/// Telegram channel adapter: a `teloxide` long-polling dispatcher behind the
/// normalized [`Channel`] interface.
pub struct TelegramChannel {
    config: TelegramConfig,
    handler: Mutex<Option<Arc<MessageHandler>>>,
    bot: Mutex<Option<Bot>>,
    shutdown: Mutex<Option<ShutdownToken>>,
    status: Mutex<ChannelStatus>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            handler: Mutex::new(None),
            bot: Mutex::new(None),
            shutdown: Mutex::new(None),
            status: Mutex::new(ChannelStatus::disconnected()),
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn id(&self) -> &str {
        "telegram"
    }

    fn label(&self) -> &str {
        "Telegram"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            chat_types: vec![ChatType::Direct, ChatType::Group],
            supports_images: true,
            supports_audio: true,
            supports_video: true,
            supports_docs: true,
            supports_voice: true,
            supports_buttons: true,
            supports_reactions: false,
            supports_threads: true,
            supports_edit: true,
            supports_delete: true,
            supports_markdown: true,
            supports_html: true,
            max_text_length: 4090,
            max_file_size: 20 * 1024 * 1024,
        }
    }

    async fn start(&self) -> Result<(), ChannelError> {
        let handler = self
            .handler
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ChannelError::ConfigError("no message handler registered".to_string()))?;

        let bot = Bot::new(&self.config.bot_token);
        bot.get_me().await.map_err(|e| ChannelError::AuthFailed(e.to_string()))?;

        let endpoint = Update::filter_message().endpoint(
            |msg: Message, handler: Arc<MessageHandler>| async move { handle_message(msg, handler).await },
        );

        let mut dispatcher = Dispatcher::builder(bot.clone(), endpoint)
            .dependencies(dptree::deps![handler])
            .default_handler(|_upd| async {})
            .build();

        *self.shutdown.lock().unwrap() = Some(dispatcher.shutdown_token());
        *self.bot.lock().unwrap() = Some(bot);

        tokio::spawn(async move {
            dispatcher.dispatch().await;
        });

        *self.status.lock().unwrap() = ChannelStatus::connected();
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        if let Some(token) = self.shutdown.lock().unwrap().take() {
            let _ = token.shutdown();
        }
        *self.status.lock().unwrap() = ChannelStatus::disconnected();
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }

    async fn send(&self, msg: OutboundMessage) -> Result<SendResult, ChannelError> {
        let bot = self
            .bot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ChannelError::SendFailed("channel not started".to_string()))?;

        let chat_id = ChatId(
            msg.chat_id
                .parse::<i64>()
                .map_err(|_| ChannelError::SendFailed(format!("invalid chat id: {}", msg.chat_id)))?,
        );

        let mut last_id = None;
        for chunk in split_chunks_smart(&msg.text) {
            let escaped = escape_markdown_v2(&chunk);
            let sent = bot.send_message(chat_id, &escaped).parse_mode(TgParseMode::MarkdownV2).await;

            let sent = match sent {
                Ok(m) => Ok(m),
                Err(_) => bot.send_message(chat_id, &chunk).await,
            };

            match sent {
                Ok(m) => last_id = Some(m.id.0.to_string()),
                Err(e) => {
                    error!(error = %e, "Telegram send failed");
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
