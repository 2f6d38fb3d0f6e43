//! End-to-end coverage of the assembled router: build a real `AppState`
//! (temp-dir sessions, no configured providers) and drive the axum app
//! through `tower::ServiceExt::oneshot` rather than binding a socket.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use http_body_util::BodyExt;
use tower::ServiceExt;

use loom_agent::prompt::PromptBuilder;
use loom_agent::tools::ToolRegistry;
use loom_agent::LlmProvider;
use loom_channels::manager::ChannelManager;
use loom_channels::router::{Router, RouterConfig};
use loom_core::config::GatewayConfig;
use loom_gateway::app::{build_router, AppState};
use loom_gateway::providers::ProviderRouter;
use loom_gateway::webchat_channel::WebChatChannel;
use loom_scheduler::engine::SchedulerHandle;
use loom_sessions::manager::SessionManager;

fn test_state(dir: &tempfile::TempDir) -> AppState {
    let config = GatewayConfig::default();
    let sessions = Arc::new(SessionManager::load(dir.path().join("sessions")).unwrap());
    let tools = Arc::new(ToolRegistry::with_builtins());
    let provider: Arc<dyn LlmProvider> = Arc::new(ProviderRouter::from_config(&config));
    let system_prompt = PromptBuilder::new(config.agent.system_prompt.clone()).build_prompt(None);

    let mut channels = ChannelManager::new();
    channels.register(Arc::new(WebChatChannel));
    let channels = Arc::new(channels);

    let router_config = RouterConfig {
        default_model: config.agent.model.clone(),
        max_iterations: config.agent.max_iterations,
        compact_model: config.agent.model.clone(),
        compact_threshold: config.agent.compact_threshold,
        compact_keep: config.agent.compact_keep,
        turn_deadline_secs: config.agent.turn_deadline_secs,
        thinking: None,
    };
    let router = Arc::new(Router::new(
        Arc::clone(&channels),
        Arc::clone(&sessions),
        Arc::clone(&provider),
        Arc::clone(&tools),
        system_prompt.clone(),
        router_config,
    ));

    AppState {
        config: Arc::new(config),
        sessions,
        provider,
        tools,
        system_prompt,
        channels,
        router,
        scheduler: SchedulerHandle::new(dir.path().join("state").join("cron-jobs.json")),
        webchat_subscribers: Arc::new(DashMap::new()),
        started_at: Arc::new(Instant::now()),
    }
}

#[tokio::test]
async fn health_reports_ok_with_zero_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(&dir));

    let response = app
        .oneshot(axum::http::Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["jobs"]["total"], 0);
}

#[tokio::test]
async fn webchat_status_reports_connected_with_no_clients() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(&dir));

    let response = app
        .oneshot(axum::http::Request::builder().uri("/webchat/status").body(axum::body::Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["connected"], true);
    assert_eq!(json["clients"], 0);
}

#[tokio::test]
async fn webchat_message_rejects_empty_text_and_files() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(&dir));

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/webchat/message")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(r#"{"text":""}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webchat_message_accepts_text_and_echoes_ids() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_router(test_state(&dir));

    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/webchat/message")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(r#"{"session_id":"abc","text":"hello"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["session_id"], "webchat:abc");
    assert!(json["id"].is_string());
}
