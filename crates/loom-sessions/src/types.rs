use loom_core::types::{Message, Usage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique session key. `main` is reserved; group/main sessions use
/// `{channel}:{chat_id}` or `group:{channel}:{chat_id}`; isolated sessions
/// use a fresh opaque id (`isolated:{uuid}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub const MAIN: &'static str = "main";

    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    pub fn direct(channel: &str, chat_id: &str) -> Self {
        Self(format!("{channel}:{chat_id}"))
    }

    pub fn group(channel: &str, chat_id: &str) -> Self {
        Self(format!("group:{channel}:{chat_id}"))
    }

    pub fn isolated() -> Self {
        Self(format!("isolated:{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_main(&self) -> bool {
        self.0 == Self::MAIN
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What kind of conversation a session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Main,
    Group,
    Isolated,
}

/// A persisted conversation session — see the message-pairing and
/// compaction invariants in the session store module docs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub kind: SessionKind,
    pub label: Option<String>,
    pub channel: Option<String>,
    pub chat_id: Option<String>,
    pub model: Option<String>,
    pub model_override: Option<String>,
    /// Only set for `Isolated` sessions.
    pub parent_key: Option<SessionKey>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_message_at: chrono::DateTime<chrono::Utc>,
    pub usage: Usage,
    pub messages: Vec<Message>,
    pub compacted_summary: Option<String>,
    pub compacted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Session {
    pub fn new(key: SessionKey, kind: SessionKind, label: Option<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            key,
            kind,
            label,
            channel: None,
            chat_id: None,
            model: None,
            model_override: None,
            parent_key: None,
            created_at: now,
            last_message_at: now,
            usage: Usage::default(),
            messages: Vec::new(),
            compacted_summary: None,
            compacted_at: None,
        }
    }

    /// override > session.model > default
    pub fn effective_model<'a>(&'a self, default: &'a str) -> &'a str {
        self.model_override
            .as_deref()
            .or(self.model.as_deref())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats() {
        assert_eq!(SessionKey::main().as_str(), "main");
        assert_eq!(SessionKey::direct("telegram", "42").as_str(), "telegram:42");
        assert_eq!(SessionKey::group("telegram", "42").as_str(), "group:telegram:42");
        assert!(SessionKey::isolated().as_str().starts_with("isolated:"));
    }

    #[test]
    fn effective_model_precedence() {
        let mut session = Session::new(SessionKey::main(), SessionKind::Main, None);
        assert_eq!(session.effective_model("default-model"), "default-model");
        session.model = Some("session-model".to_string());
        assert_eq!(session.effective_model("default-model"), "session-model");
        session.model_override = Some("override-model".to_string());
        assert_eq!(session.effective_model("default-model"), "override-model");
    }
}
