//! The WebChat wire contract named in §6: `POST /webchat/message` submits a
//! user turn, `GET /webchat/events` streams the reply back over
//! server-sent events, `GET /webchat/status` reports whether anyone is
//! listening.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use dashmap::DashMap;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use loom_channels::router::{resolve_session_key, RouterEvent, StreamSink};
use loom_channels::types::{Attachment, AttachmentType, ChatType, InboundMessage};

use crate::app::AppState;

/// How often a `ping` event is emitted on an idle `/webchat/events` stream.
const PING_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct FileUpload {
    pub name: String,
    #[serde(rename = "type")]
    pub mime: String,
    #[serde(default)]
    pub size: u64,
    /// Base64-encoded file contents.
    pub data: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct SendMessageRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub text: String,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub files: Vec<FileUpload>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub session_id: String,
}

fn classify_mime(mime: &str) -> AttachmentType {
    match mime {
        m if m.starts_with("image/") => AttachmentType::Image,
        m if m.starts_with("audio/") => AttachmentType::Audio,
        m if m.starts_with("video/") => AttachmentType::Video,
        _ => AttachmentType::Document,
    }
}

/// Decode a `files[]` entry into an `Attachment`, embedding the payload as
/// a data URL since WebChat has no separate blob store. Base64 decode
/// failures degrade to an attachment with no `url` rather than rejecting
/// the whole request — the accompanying text still deserves a reply.
fn decode_attachment(file: FileUpload) -> Attachment {
    let url = base64::engine::general_purpose::STANDARD
        .decode(&file.data)
        .ok()
        .map(|_| format!("data:{};base64,{}", file.mime, file.data));

    Attachment {
        kind: classify_mime(&file.mime),
        url,
        mime: Some(file.mime),
        filename: Some(file.name),
        caption: None,
        duration: None,
    }
}

/// Accepts one user message and spawns a turn. If the browser already has
/// a `GET /webchat/events` connection open for the resolved session, the
/// reply streams there as `delta`/`message` events; this request only
/// returns the ids needed to correlate them.
pub async fn send_message(State(state): State<AppState>, Json(req): Json<SendMessageRequest>) -> impl IntoResponse {
    if req.text.trim().is_empty() && req.files.is_empty() {
        return (axum::http::StatusCode::BAD_REQUEST, Json(json!({ "error": "text and files must not both be empty" })))
            .into_response();
    }

    let chat_id = req.session_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let id = uuid::Uuid::new_v4().to_string();
    let attachments = req.files.into_iter().map(decode_attachment).collect();

    let inbound = InboundMessage {
        id: id.clone(),
        channel: "webchat".to_string(),
        chat_id,
        chat_type: ChatType::Direct,
        sender_id: "webchat-user".to_string(),
        sender_name: None,
        text: req.text,
        timestamp: chrono::Utc::now().timestamp_millis(),
        reply_to: req.reply_to,
        attachments,
        mentions: Vec::new(),
        raw_payload: None,
        metadata: Default::default(),
    };

    let (session_key, _kind) = resolve_session_key(&inbound);
    let session_id = session_key.as_str().to_string();

    let stream_sink: Option<StreamSink> = state.webchat_subscribers.get(&session_id).map(|entry| {
        let tx = entry.clone();
        Arc::new(move |event: RouterEvent| {
            let _ = tx.send(event);
        }) as StreamSink
    });

    state.router.handle_inbound(inbound, stream_sink);

    Json(json!({ "id": id, "session_id": session_id })).into_response()
}

/// Removes the subscriber entry once the SSE stream is dropped (browser
/// navigated away, connection reset, ...) so `webchat_subscribers` doesn't
/// grow unbounded over a long-lived gateway process.
struct SubscriberGuard {
    subscribers: Arc<DashMap<String, mpsc::UnboundedSender<RouterEvent>>>,
    session_id: String,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.subscribers.remove(&self.session_id);
    }
}

fn sse_stream(state: AppState, session_id: String) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<RouterEvent>();
    state.webchat_subscribers.insert(session_id.clone(), tx);

    let subscribers = state.webchat_subscribers.clone();

    let event_stream = stream! {
        let _guard = SubscriberGuard { subscribers, session_id: session_id.clone() };
        yield Ok(Event::default().event("connected").data(json!({ "session_id": session_id }).to_string()));

        let mut ping = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping.tick().await; // first tick fires immediately, skip it

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let (event_name, data) = match event {
                        RouterEvent::Delta { id, session_id, content } => {
                            ("delta", json!({ "id": id, "session_id": session_id, "content": content }))
                        }
                        RouterEvent::Message { id, session_id, role, content, timestamp, done } => (
                            "message",
                            json!({
                                "id": id,
                                "session_id": session_id,
                                "role": role,
                                "content": content,
                                "timestamp": timestamp,
                                "done": done,
                            }),
                        ),
                    };
                    yield Ok(Event::default().event(event_name).data(data.to_string()));
                }
                _ = ping.tick() => {
                    yield Ok(Event::default().event("ping").data(json!({ "ts": chrono::Utc::now().timestamp_millis() }).to_string()));
                }
            }
        }
    };

    Sse::new(event_stream)
}

/// `GET /webchat/events?session_id=...` — opens the SSE stream for a
/// session, emitting `connected` on open, `delta`/`message` as the
/// triggered turn streams in, and a `ping` every 30s for liveness.
pub async fn events(State(state): State<AppState>, Query(q): Query<EventsQuery>) -> impl IntoResponse {
    let mut response = sse_stream(state, q.session_id).into_response();
    let headers = response.headers_mut();
    headers.insert(axum::http::header::CACHE_CONTROL, axum::http::HeaderValue::from_static("no-cache"));
    headers.insert(axum::http::header::CONNECTION, axum::http::HeaderValue::from_static("keep-alive"));
    response
}

/// `GET /webchat/status` — whether the WebChat transport is registered and
/// how many SSE clients are currently attached.
pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let connected = state.channels.get("webchat").map(|c| c.status().connected).unwrap_or(false);
    Json(json!({ "connected": connected, "clients": state.webchat_subscribers.len() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_mime_buckets_by_prefix() {
        assert_eq!(classify_mime("image/png"), AttachmentType::Image);
        assert_eq!(classify_mime("audio/wav"), AttachmentType::Audio);
        assert_eq!(classify_mime("video/mp4"), AttachmentType::Video);
        assert_eq!(classify_mime("application/pdf"), AttachmentType::Document);
    }

    #[test]
    fn decode_attachment_embeds_a_data_url_on_valid_base64() {
        let file = FileUpload {
            name: "note.txt".to_string(),
            mime: "text/plain".to_string(),
            size: 5,
            data: base64::engine::general_purpose::STANDARD.encode("hello"),
        };
        let attachment = decode_attachment(file);
        assert_eq!(attachment.kind, AttachmentType::Document);
        assert!(attachment.url.unwrap().starts_with("data:text/plain;base64,"));
    }

    #[test]
    fn decode_attachment_degrades_gracefully_on_invalid_base64() {
        let file = FileUpload {
            name: "bad.bin".to_string(),
            mime: "application/octet-stream".to_string(),
            size: 0,
            data: "not valid base64!!".to_string(),
        };
        let attachment = decode_attachment(file);
        assert!(attachment.url.is_none());
        assert_eq!(attachment.filename.as_deref(), Some("bad.bin"));
    }
}
