//! Assembles the library crates into one running gateway process: shared
//! state (`AppState`), the axum router, and the dispatch of scheduler-fired
//! jobs into the agent loop.

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router as AxumRouter;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use loom_agent::pipeline::{run_turn, TurnConfig};
use loom_agent::prompt::SystemPrompt;
use loom_agent::tools::ToolRegistry;
use loom_agent::LlmProvider;
use loom_channels::manager::ChannelManager;
use loom_channels::router::{Router, RouterEvent};
use loom_core::config::GatewayConfig;
use loom_core::types::Message;
use loom_scheduler::engine::SchedulerHandle;
use loom_scheduler::types::{Job, Payload, SessionTarget};
use loom_sessions::manager::SessionManager;
use loom_sessions::types::{SessionKey, SessionKind};

/// Everything a request handler or background task needs, cloned cheaply
/// behind `Arc`s (axum's `State` extractor requires `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub sessions: Arc<SessionManager>,
    pub provider: Arc<dyn LlmProvider>,
    pub tools: Arc<ToolRegistry>,
    pub system_prompt: SystemPrompt,
    pub channels: Arc<ChannelManager>,
    pub router: Arc<Router>,
    pub scheduler: SchedulerHandle,
    /// Live WebChat SSE subscribers, keyed by session id — `webchat::events`
    /// registers one on connect and `webchat::message` looks it up to get a
    /// `StreamSink` for the triggered turn.
    pub webchat_subscribers: Arc<DashMap<String, mpsc::UnboundedSender<RouterEvent>>>,
    pub started_at: Arc<Instant>,
}

pub fn build_router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(crate::http::health::health))
        .route("/webchat/message", post(crate::http::webchat::send_message))
        .route("/webchat/events", get(crate::http::webchat::events))
        .route("/webchat/status", get(crate::http::webchat::status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Turn a fired [`Job`] into agent-loop work. System events are appended to
/// the target session's transcript as a bracketed notice with no model
/// call (cheap, deterministic); agent turns run the full pipeline, against
/// an isolated child session when requested so a scheduled prompt never
/// interleaves with the user's own conversation.
pub async fn dispatch_job(state: AppState, job: Job) {
    let main_key = SessionKey::main();

    let target_key = match job.session_target {
        SessionTarget::Main => main_key.clone(),
        SessionTarget::Isolated => {
            match state.sessions.create_isolated(&main_key, Some(format!("job:{}", job.name)), None) {
                Ok(session) => session.lock().unwrap().key.clone(),
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "failed to create isolated session for job");
                    return;
                }
            }
        }
    };

    if matches!(job.session_target, SessionTarget::Main) {
        state.sessions.get_or_create(&target_key, SessionKind::Main, None);
    }

    match job.payload {
        Payload::SystemEvent { text } => {
            let note = Message::user(format!("[system event] {text}"));
            if let Err(e) = state.sessions.append(&target_key, note) {
                error!(job_id = %job.id, error = %e, "failed to append system event");
            }
        }
        Payload::AgentTurn { message, model } => {
            if let Some(model) = model {
                if let Err(e) = state.sessions.set_model_override(&target_key, Some(model)) {
                    warn!(job_id = %job.id, error = %e, "failed to apply job model override");
                }
            }

            let turn_config = TurnConfig {
                default_model: &state.config.agent.model,
                max_iterations: state.config.agent.max_iterations,
                thinking: None,
                compact_model: &state.config.agent.model,
                compact_threshold: state.config.agent.compact_threshold,
                compact_keep: state.config.agent.compact_keep,
            };

            let cancel = tokio_util::sync::CancellationToken::new();
            let result = run_turn(
                state.provider.as_ref(),
                state.tools.as_ref(),
                &state.sessions,
                &target_key,
                &state.system_prompt,
                &turn_config,
                Message::user(message),
                &|_: &str| {},
                &|_: &str| {},
                &cancel,
            )
            .await;

            match result {
                Ok(outcome) => info!(job_id = %job.id, iterations = outcome.iterations, "scheduled agent turn completed"),
                Err(e) => error!(job_id = %job.id, error = %e, "scheduled agent turn failed"),
            }
        }
    }
}
