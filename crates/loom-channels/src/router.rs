//! The router: session resolution, turn spawning, and outbound delivery
//! that sits on top of the channel manager.
//!
//! One [`Router`] owns the provider/tool-registry/session-store triple the
//! agent loop needs and a [`ChannelManager`] to talk back to whichever
//! transport an inbound message arrived on. Each inbound message becomes
//! one spawned, deadline-bounded turn; turns on different sessions run
//! concurrently, turns on the same session serialize behind that session's
//! own mutex (see `loom-sessions`).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use loom_core::types::Message;
use loom_sessions::manager::SessionManager;
use loom_sessions::types::{SessionKey, SessionKind};

use loom_agent::pipeline::{run_turn, TurnConfig};
use loom_agent::prompt::SystemPrompt;
use loom_agent::thinking::ThinkingLevel;
use loom_agent::tools::ToolRegistry;
use loom_agent::LlmProvider;

use crate::manager::ChannelManager;
use crate::types::{ChatType, InboundMessage};

/// Static (per-process) turn parameters. Per-session overrides (model,
/// override string) live on the `Session` itself and are applied inside
/// the agent loop via `effective_model`.
pub struct RouterConfig {
    pub default_model: String,
    pub max_iterations: u32,
    pub compact_model: String,
    pub compact_threshold: usize,
    pub compact_keep: usize,
    pub turn_deadline_secs: u64,
    pub thinking: Option<ThinkingLevel>,
}

/// One partial or final reply event, shaped to match the WebChat SSE wire
/// format directly — other channels simply never receive `Delta`.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    Delta { id: String, session_id: String, content: String },
    Message { id: String, session_id: String, role: String, content: String, timestamp: i64, done: bool },
}

pub type StreamSink = Arc<dyn Fn(RouterEvent) + Send + Sync>;

/// Accumulates a streaming reply's text in a mutex-protected buffer and
/// forwards each accumulated snapshot to a caller-supplied sink, firing a
/// final `done: true` event once the turn completes.
struct StreamingResponder {
    id: String,
    session_id: String,
    buffer: Mutex<String>,
    sink: StreamSink,
}

impl StreamingResponder {
    fn new(id: String, session_id: String, sink: StreamSink) -> Self {
        Self { id, session_id, buffer: Mutex::new(String::new()), sink }
    }

    fn push(&self, fragment: &str) {
        let snapshot = {
            let mut buf = self.buffer.lock().unwrap();
            buf.push_str(fragment);
            buf.clone()
        };
        (self.sink)(RouterEvent::Delta {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            content: snapshot,
        });
    }

    fn finish(&self, role: &str) {
        let content = self.buffer.lock().unwrap().clone();
        (self.sink)(RouterEvent::Message {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            role: role.to_string(),
            content,
            timestamp: chrono::Utc::now().timestamp_millis(),
            done: true,
        });
    }
}

/// Resolve a session key for an inbound message. Direct chats get one
/// session per (channel, chat); group chats get one session per (channel,
/// group) shared across every member — see the open design question on
/// group-vs-per-user keying in the design notes.
pub fn resolve_session_key(inbound: &InboundMessage) -> (SessionKey, SessionKind) {
    match inbound.chat_type {
        ChatType::Direct => (SessionKey::direct(&inbound.channel, &inbound.chat_id), SessionKind::Main),
        ChatType::Group => (SessionKey::group(&inbound.channel, &inbound.chat_id), SessionKind::Group),
    }
}

/// Composes over the channel manager: resolves sessions, spawns bounded
/// turns, and dispatches the final reply (and, for streaming-capable
/// clients, partial deltas) back to the originating channel.
pub struct Router {
    channels: Arc<ChannelManager>,
    sessions: Arc<SessionManager>,
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    system_prompt: SystemPrompt,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        channels: Arc<ChannelManager>,
        sessions: Arc<SessionManager>,
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        system_prompt: SystemPrompt,
        config: RouterConfig,
    ) -> Self {
        Self { channels, sessions, provider, tools, system_prompt, config }
    }

    /// Spawn a bounded-lifetime task that drives one turn for `inbound` and
    /// replies on its originating channel. `stream_sink`, when present,
    /// receives `Delta`/`Message` events as the reply streams in (used by
    /// the WebChat SSE endpoint; ignored by non-streaming channels).
    pub fn handle_inbound(self: &Arc<Self>, inbound: InboundMessage, stream_sink: Option<StreamSink>) {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            router.run_turn_and_reply(inbound, stream_sink).await;
        });
    }

    async fn run_turn_and_reply(&self, inbound: InboundMessage, stream_sink: Option<StreamSink>) {
        let (key, kind) = resolve_session_key(&inbound);
        match kind {
            SessionKind::Group => {
                self.sessions.create_group(&inbound.channel, &inbound.chat_id, None);
            }
            _ => {
                self.sessions.get_or_create(&key, kind, None);
            }
        }

        let responder = stream_sink
            .map(|sink| Arc::new(StreamingResponder::new(inbound.id.clone(), key.as_str().to_string(), sink)));

        let on_delta: Box<dyn Fn(&str) + Send + Sync> = match responder.clone() {
            Some(r) => Box::new(move |text: &str| r.push(text)),
            None => Box::new(|_: &str| {}),
        };
        let on_thinking: Box<dyn Fn(&str) + Send + Sync> = Box::new(|_: &str| {});

        let cancel = CancellationToken::new();
        let deadline_cancel = cancel.clone();
        let deadline_secs = self.config.turn_deadline_secs;
        let deadline_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(deadline_secs)).await;
            deadline_cancel.cancel();
        });

        let turn_config = TurnConfig {
            default_model: &self.config.default_model,
            max_iterations: self.config.max_iterations,
            thinking: self.config.thinking,
            compact_model: &self.config.compact_model,
            compact_threshold: self.config.compact_threshold,
            compact_keep: self.config.compact_keep,
        };

        let result = run_turn(
            self.provider.as_ref(),
            self.tools.as_ref(),
            &self.sessions,
            &key,
            &self.system_prompt,
            &turn_config,
            Message::user(inbound.text.clone()),
            on_delta.as_ref(),
            on_thinking.as_ref(),
            &cancel,
        )
        .await;

        deadline_task.abort();

        let reply_text = match result {
            Ok(outcome) => outcome.text,
            Err(loom_core::error::GatewayError::Cancelled) if cancel.is_cancelled() => {
                "Error: turn deadline exceeded".to_string()
            }
            Err(e) => format!("Error: {e}"),
        };

        if let Some(r) = &responder {
            r.finish("assistant");
        }

        let truncated = self.truncate_for_channel(&inbound.channel, &reply_text);
        if let Err(e) = self.channels.reply(&inbound, truncated).await {
            warn!(channel = %inbound.channel, error = %e, "failed to deliver reply, turn result is not affected");
        }
    }

    fn truncate_for_channel(&self, channel_id: &str, text: &str) -> String {
        let max_len = self
            .channels
            .get(channel_id)
            .map(|c| c.capabilities().max_text_length)
            .unwrap_or(usize::MAX);

        if text.chars().count() <= max_len || max_len == 0 {
            return text.to_string();
        }
        let marker = "\n\n[truncated]";
        let budget = max_len.saturating_sub(marker.len());
        let truncated: String = text.chars().take(budget).collect();
        format!("{truncated}{marker}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatType;

    fn inbound(chat_type: ChatType, channel: &str, chat_id: &str) -> InboundMessage {
        InboundMessage {
            id: "m1".to_string(),
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            chat_type,
            sender_id: "u1".to_string(),
            sender_name: None,
            text: "hi".to_string(),
            timestamp: 0,
            reply_to: None,
            attachments: Vec::new(),
            mentions: Vec::new(),
            raw_payload: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn direct_chat_resolves_to_main_kind_per_channel_chat_key() {
        let (key, kind) = resolve_session_key(&inbound(ChatType::Direct, "telegram", "42"));
        assert_eq!(key.as_str(), "telegram:42");
        assert_eq!(kind, SessionKind::Main);
    }

    #[test]
    fn group_chat_resolves_to_group_kind_with_group_prefixed_key() {
        let (key, kind) = resolve_session_key(&inbound(ChatType::Group, "discord", "99"));
        assert_eq!(key.as_str(), "group:discord:99");
        assert_eq!(kind, SessionKind::Group);
    }
}
