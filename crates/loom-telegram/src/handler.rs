//! Telegram message handler registered in the teloxide `Dispatcher`.
//! Normalizes every incoming `Message` into an [`InboundMessage`] and
//! forwards it to the registered callback. No session, provider, or
//! agent-loop logic lives here.

use std::sync::Arc;

use teloxide::prelude::*;

use loom_channels::channel::MessageHandler;
use loom_channels::types::{ChatType, InboundMessage};

pub async fn handle_message(msg: Message, handler: Arc<MessageHandler>) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    if from.is_bot {
        return Ok(());
    }

    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    let has_media = msg.photo().is_some()
        || msg.document().is_some()
        || msg.video().is_some()
        || msg.audio().is_some()
        || msg.voice().is_some();

    if text.is_empty() && !has_media {
        return Ok(());
    }

    let inbound = InboundMessage {
        id: msg.id.0.to_string(),
        channel: "telegram".to_string(),
        chat_id: msg.chat.id.0.to_string(),
        chat_type: if msg.chat.is_private() { ChatType::Direct } else { ChatType::Group },
        sender_id: from.id.0.to_string(),
        sender_name: from.username.clone().or_else(|| Some(from.first_name.clone())),
        text,
        timestamp: msg.date.timestamp() * 1000,
        reply_to: msg.reply_to_message().map(|m| m.id.0.to_string()),
        attachments: Vec::new(),
        mentions: Vec::new(),
        raw_payload: None,
        metadata: Default::default(),
    };

    (handler)(inbound);
    Ok(())
}
