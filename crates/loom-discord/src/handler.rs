//! Serenity event handler: normalizes gateway events into
//! [`InboundMessage`] and forwards them to the registered callback. No
//! session, provider, or agent-loop logic lives here.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serenity::all::ActivityData;
use serenity::async_trait;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::UserId;
use serenity::model::user::OnlineStatus;
use serenity::prelude::{Context, EventHandler};
use tracing::info;

use loom_channels::channel::MessageHandler;
use loom_channels::types::{Attachment, AttachmentType, ChatType, InboundMessage};
use loom_core::config::DiscordConfig;

pub struct DiscordHandler {
    pub handler: Arc<MessageHandler>,
    pub config: DiscordConfig,
    pub bot_id: OnceLock<UserId>,
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        self.bot_id.set(ready.user.id).ok();
        ctx.set_presence(Some(ActivityData::playing("with tools")), OnlineStatus::Online);
        info!(name = %ready.user.name, "Discord bot connected");
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let is_guild = msg.guild_id.is_some();

        if is_guild && self.config.require_mention {
            let Some(bot_id) = self.bot_id.get() else { return };
            if !msg.mentions_user_id(*bot_id) {
                return;
            }
        }

        if !is_guild && !self.config.dm_allowed {
            return;
        }

        let text = strip_mention(&msg.content).trim().to_string();
        if text.is_empty() && msg.attachments.is_empty() {
            return;
        }

        let attachments = msg
            .attachments
            .iter()
            .map(|a| Attachment {
                kind: classify_attachment(&a.content_type),
                url: Some(a.url.clone()),
                mime: a.content_type.clone(),
                filename: Some(a.filename.clone()),
                caption: None,
                duration: None,
            })
            .collect();

        let mut metadata = HashMap::new();
        if let Some(guild_id) = msg.guild_id {
            metadata.insert("guild_id".to_string(), guild_id.to_string());
        }

        let inbound = InboundMessage {
            id: msg.id.to_string(),
            channel: "discord".to_string(),
            chat_id: msg.channel_id.to_string(),
            chat_type: if is_guild { ChatType::Group } else { ChatType::Direct },
            sender_id: msg.author.id.to_string(),
            sender_name: Some(msg.author.name.clone()),
            text,
            timestamp: msg.timestamp.unix_timestamp() * 1000,
            reply_to: msg.referenced_message.as_ref().map(|m| m.id.to_string()),
            attachments,
            mentions: msg.mentions.iter().map(|u| u.id.to_string()).collect(),
            raw_payload: None,
            metadata,
        };

        (self.handler)(inbound);
    }
}

/// Remove an @mention prefix (e.g. `<@123456789>`) from a message.
fn strip_mention(s: &str) -> &str {
    let trimmed = s.trim_start();
    if trimmed.starts_with("<@") {
        if let Some(end) = trimmed.find('>') {
            return trimmed[end + 1..].trim_start();
        }
    }
    trimmed
}

fn classify_attachment(content_type: &Option<String>) -> AttachmentType {
    match content_type.as_deref() {
        Some(ct) if ct.starts_with("image/") => AttachmentType::Image,
        Some(ct) if ct.starts_with("audio/") => AttachmentType::Audio,
        Some(ct) if ct.starts_with("video/") => AttachmentType::Video,
        _ => AttachmentType::Document,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_mention_removes_leading_user_mention() {
        assert_eq!(strip_mention("<@123456789> hello there"), "hello there");
        assert_eq!(strip_mention("no mention here"), "no mention here");
        assert_eq!(strip_mention("  <@987>  padded"), "padded");
    }

    #[test]
    fn strip_mention_leaves_unterminated_mention_syntax_alone() {
        assert_eq!(strip_mention("<@unterminated"), "<@unterminated");
    }

    #[test]
    fn classify_attachment_buckets_by_mime_prefix() {
        assert_eq!(classify_attachment(&Some("image/png".to_string())), AttachmentType::Image);
        assert_eq!(classify_attachment(&Some("audio/mpeg".to_string())), AttachmentType::Audio);
        assert_eq!(classify_attachment(&Some("video/mp4".to_string())), AttachmentType::Video);
        assert_eq!(classify_attachment(&Some("application/pdf".to_string())), AttachmentType::Document);
        assert_eq!(classify_attachment(&None), AttachmentType::Document);
    }
}
