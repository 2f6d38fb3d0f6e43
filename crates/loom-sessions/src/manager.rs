use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use loom_core::types::Message;
use tracing::{debug, instrument, warn};

use crate::error::{Result, SessionError};
use crate::types::{Session, SessionKey, SessionKind};

/// Optional filters for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub kinds: Option<Vec<SessionKind>>,
    pub active_within_minutes: Option<i64>,
    pub channel: Option<String>,
    pub limit: Option<usize>,
}

fn session_path(dir: &Path, key: &SessionKey) -> PathBuf {
    // Session keys may contain ':' (group:telegram:42); that is filesystem
    // safe on every target this gateway runs on, so no further escaping.
    dir.join(format!("{}.json", key.as_str()))
}

fn write_atomic(path: &Path, session: &Session) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(session)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// In-memory session store backed by per-session transcript files.
///
/// Each session gets its own mutex (`Arc<Mutex<Session>>`) rather than one
/// global lock: lookups take the map's lock briefly, then release it before
/// taking the session's own lock, so one long-running turn on session A
/// never blocks a turn on session B.
pub struct SessionManager {
    sessions: DashMap<SessionKey, Arc<Mutex<Session>>>,
    dirty: DashMap<SessionKey, ()>,
    dir: PathBuf,
}

impl SessionManager {
    /// Load every `*.json` transcript from `dir`, skipping malformed files
    /// with a warning, then ensure the reserved `main` session exists.
    pub fn load(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let sessions = DashMap::new();

        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match std::fs::read_to_string(&path) {
                    Ok(raw) => match serde_json::from_str::<Session>(&raw) {
                        Ok(session) => {
                            sessions.insert(session.key.clone(), Arc::new(Mutex::new(session)));
                        }
                        Err(e) => warn!(path = %path.display(), err = %e, "skipping malformed session transcript"),
                    },
                    Err(e) => warn!(path = %path.display(), err = %e, "failed to read session transcript"),
                }
            }
        }

        let manager = Self { sessions, dirty: DashMap::new(), dir };
        if manager.sessions.get(&SessionKey::main()).is_none() {
            let main = Session::new(SessionKey::main(), SessionKind::Main, None);
            manager.sessions.insert(main.key.clone(), Arc::new(Mutex::new(main)));
        }
        Ok(manager)
    }

    /// Return the handle for `key` if present.
    pub fn get(&self, key: &SessionKey) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(key).map(|e| e.value().clone())
    }

    #[instrument(skip(self), fields(key = %key))]
    pub fn get_or_create(&self, key: &SessionKey, kind: SessionKind, label: Option<String>) -> Arc<Mutex<Session>> {
        if let Some(existing) = self.get(key) {
            debug!("session cache hit");
            return existing;
        }
        let session = Session::new(key.clone(), kind, label);
        let handle = Arc::new(Mutex::new(session));
        self.sessions.insert(key.clone(), handle.clone());
        self.mark_dirty(key);
        handle
    }

    pub fn create_group(&self, channel: &str, chat_id: &str, label: Option<String>) -> Arc<Mutex<Session>> {
        let key = SessionKey::group(channel, chat_id);
        let handle = self.get_or_create(&key, SessionKind::Group, label);
        {
            let mut session = handle.lock().unwrap();
            session.channel = Some(channel.to_string());
            session.chat_id = Some(chat_id.to_string());
        }
        handle
    }

    pub fn create_isolated(&self, parent_key: &SessionKey, label: Option<String>, model: Option<String>) -> Result<Arc<Mutex<Session>>> {
        if self.get(parent_key).is_none() {
            return Err(SessionError::NotFound { key: parent_key.as_str().to_string() });
        }
        let key = SessionKey::isolated();
        let mut session = Session::new(key.clone(), SessionKind::Isolated, label);
        session.parent_key = Some(parent_key.clone());
        session.model = model;
        let handle = Arc::new(Mutex::new(session));
        self.sessions.insert(key.clone(), handle.clone());
        self.mark_dirty(&key);
        Ok(handle)
    }

    /// Ordered by `last_message_at` descending.
    pub fn list(&self, filter: ListFilter) -> Vec<Session> {
        let cutoff = filter
            .active_within_minutes
            .map(|m| chrono::Utc::now() - chrono::Duration::minutes(m));

        let mut result: Vec<Session> = self
            .sessions
            .iter()
            .map(|e| e.value().lock().unwrap().clone())
            .filter(|s| filter.kinds.as_ref().map(|k| k.contains(&s.kind)).unwrap_or(true))
            .filter(|s| filter.channel.as_deref().map(|c| s.channel.as_deref() == Some(c)).unwrap_or(true))
            .filter(|s| cutoff.map(|c| s.last_message_at >= c).unwrap_or(true))
            .collect();

        result.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        result
    }

    /// Refuses `main`; removes the in-memory entry and the on-disk transcript.
    pub fn delete(&self, key: &SessionKey) -> Result<()> {
        if key.is_main() {
            return Err(SessionError::MainUndeletable);
        }
        if self.sessions.remove(key).is_none() {
            return Err(SessionError::NotFound { key: key.as_str().to_string() });
        }
        self.dirty.remove(key);
        let path = session_path(&self.dir, key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn mark_dirty(&self, key: &SessionKey) {
        self.dirty.insert(key.clone(), ());
    }

    pub fn append(&self, key: &SessionKey, message: Message) -> Result<()> {
        let handle = self.get(key).ok_or_else(|| SessionError::NotFound { key: key.as_str().to_string() })?;
        {
            let mut session = handle.lock().unwrap();
            session.messages.push(message);
            session.usage.message_count += 1;
            session.last_message_at = chrono::Utc::now();
        }
        self.mark_dirty(key);
        Ok(())
    }

    pub fn snapshot_messages(&self, key: &SessionKey) -> Result<Vec<Message>> {
        let handle = self.get(key).ok_or_else(|| SessionError::NotFound { key: key.as_str().to_string() })?;
        let session = handle.lock().unwrap();
        Ok(session.messages.clone())
    }

    pub fn update_usage(&self, key: &SessionKey, input: u64, output: u64) -> Result<()> {
        let handle = self.get(key).ok_or_else(|| SessionError::NotFound { key: key.as_str().to_string() })?;
        handle.lock().unwrap().usage.add_tokens(input, output);
        self.mark_dirty(key);
        Ok(())
    }

    pub fn increment_tool_calls(&self, key: &SessionKey, n: u64) -> Result<()> {
        let handle = self.get(key).ok_or_else(|| SessionError::NotFound { key: key.as_str().to_string() })?;
        handle.lock().unwrap().usage.tool_call_count += n;
        self.mark_dirty(key);
        Ok(())
    }

    pub fn set_model_override(&self, key: &SessionKey, model: Option<String>) -> Result<()> {
        let handle = self.get(key).ok_or_else(|| SessionError::NotFound { key: key.as_str().to_string() })?;
        handle.lock().unwrap().model_override = model;
        self.mark_dirty(key);
        Ok(())
    }

    /// Replaces the prefix `messages[0..len-keep]` with a summary marker.
    /// Called by the compactor; never invoked directly by the agent loop.
    pub fn apply_compaction(&self, key: &SessionKey, keep: Vec<Message>, summary: String) -> Result<()> {
        let handle = self.get(key).ok_or_else(|| SessionError::NotFound { key: key.as_str().to_string() })?;
        {
            let mut session = handle.lock().unwrap();
            session.messages = keep;
            session.compacted_summary = Some(match session.compacted_summary.take() {
                Some(existing) if !existing.is_empty() => format!("{existing}\n\n{summary}"),
                _ => summary,
            });
            session.compacted_at = Some(chrono::Utc::now());
        }
        self.mark_dirty(key);
        Ok(())
    }

    /// Write every dirty session to disk. Called on the autosave timer and
    /// on shutdown.
    pub fn flush(&self) -> Result<()> {
        let keys: Vec<SessionKey> = self.dirty.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some(handle) = self.get(&key) {
                let session = handle.lock().unwrap().clone();
                write_atomic(&session_path(&self.dir, &key), &session)?;
            }
            self.dirty.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::types::Message;

    fn temp_manager() -> SessionManager {
        let dir = std::env::temp_dir().join(format!("loom-sessions-test-{}", uuid::Uuid::new_v4()));
        SessionManager::load(dir).unwrap()
    }

    #[test]
    fn main_session_exists_on_load() {
        let manager = temp_manager();
        assert!(manager.get(&SessionKey::main()).is_some());
    }

    #[test]
    fn main_cannot_be_deleted() {
        let manager = temp_manager();
        assert!(matches!(manager.delete(&SessionKey::main()), Err(SessionError::MainUndeletable)));
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let manager = temp_manager();
        let key = SessionKey::direct("mock", "c1");
        let a = manager.get_or_create(&key, SessionKind::Main, None);
        let b = manager.get_or_create(&key, SessionKind::Main, None);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn append_increments_message_count() {
        let manager = temp_manager();
        let key = SessionKey::main();
        manager.append(&key, Message::user("hi")).unwrap();
        let session = manager.get(&key).unwrap();
        assert_eq!(session.lock().unwrap().usage.message_count, 1);
    }

    #[test]
    fn isolated_requires_existing_parent() {
        let manager = temp_manager();
        let missing = SessionKey::from("isolated:does-not-exist");
        assert!(manager.create_isolated(&missing, None, None).is_err());
    }

    #[test]
    fn compaction_replaces_prefix_and_accumulates_summary() {
        let manager = temp_manager();
        let key = SessionKey::main();
        for i in 0..5 {
            manager.append(&key, Message::user(format!("msg {i}"))).unwrap();
        }
        let tail = manager.snapshot_messages(&key).unwrap()[3..].to_vec();
        manager.apply_compaction(&key, tail, "first summary".to_string()).unwrap();
        let session = manager.get(&key).unwrap();
        let session = session.lock().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.compacted_summary.as_deref(), Some("first summary"));
    }
}
