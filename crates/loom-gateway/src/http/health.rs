use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

/// `GET /health` — liveness probe plus a cheap snapshot of channel status
/// and scheduled-job counts, for operators polling without a full client.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime_secs = state.started_at.elapsed().as_secs();
    let channels: Vec<Value> = state
        .channels
        .statuses()
        .into_iter()
        .map(|(id, status)| json!({ "id": id, "connected": status.connected, "error": status.error }))
        .collect();
    let scheduler = state.scheduler.status();

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime_secs,
        "channels": channels,
        "jobs": { "total": scheduler.total, "enabled": scheduler.enabled },
    }))
}
