//! The local CLI transport named in §1 ("chat apps, a browser SSE endpoint,
//! a local CLI"). Its wire protocol is line-delimited stdio — trivial
//! enough that, per spec.md, it carries none of the out-of-scope transport
//! complexity real chat-app adapters do.
//!
//! One reader task loops over stdin lines and calls the registered
//! handler, exactly like `DiscordHandler`/`handle_message` do for their
//! transports; `send` writes the reply straight to stdout.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use loom_channels::channel::{Channel, MessageHandler};
use loom_channels::error::ChannelError;
use loom_channels::types::{Capabilities, ChannelStatus, ChatType, InboundMessage, OutboundMessage, SendResult};

/// Single-user chat id every CLI message is addressed to — there is only
/// ever one local operator per process.
const CLI_CHAT_ID: &str = "local";

pub struct CliChannel {
    handler: Mutex<Option<Arc<MessageHandler>>>,
    status: Mutex<ChannelStatus>,
}

impl CliChannel {
    pub fn new() -> Self {
        Self { handler: Mutex::new(None), status: Mutex::new(ChannelStatus::disconnected()) }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn id(&self) -> &str {
        "cli"
    }

    fn label(&self) -> &str {
        "Local CLI"
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
            max_text_length: usize::MAX,
            max_file_size: 0,
        }
    }

    async fn start(&self) -> Result<(), ChannelError> {
        let handler = self
            .handler
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ChannelError::ConfigError("no message handler registered".to_string()))?;

        *self.status.lock().unwrap() = ChannelStatus::connected();

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let text = line.trim().to_string();
                        if text.is_empty() {
                            continue;
                        }
                        let inbound = InboundMessage {
                            id: uuid::Uuid::new_v4().to_string(),
                            channel: "cli".to_string(),
                            chat_id: CLI_CHAT_ID.to_string(),
                            chat_type: ChatType::Direct,
                            sender_id: "cli-user".to_string(),
                            sender_name: None,
                            text,
                            timestamp: chrono::Utc::now().timestamp_millis(),
                            reply_to: None,
                            attachments: Vec::new(),
                            mentions: Vec::new(),
                            raw_payload: None,
                            metadata: Default::default(),
                        };
                        (handler)(inbound);
                    }
                    Ok(None) => {
                        info!("CLI stdin closed, reader task exiting");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "CLI stdin read error");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        *self.status.lock().unwrap() = ChannelStatus::disconnected();
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }

    async fn send(&self, msg: OutboundMessage) -> Result<SendResult, ChannelError> {
        let mut stdout = tokio::io::stdout();
        let line = format!("{}\n", msg.text);
        stdout.write_all(line.as_bytes()).await.map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        stdout.flush().await.map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(SendResult { message_id: None, timestamp: chrono::Utc::now().timestamp_millis(), error: None })
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        *self.handler.lock().unwrap() = Some(Arc::from(handler));
    }
}
