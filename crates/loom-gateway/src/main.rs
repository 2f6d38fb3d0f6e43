//! Binary entry point: loads config, assembles the library crates from
//! `loom-core` through `loom-scheduler` into an [`AppState`], and runs the
//! HTTP server, channel adapters, and scheduler side by side until
//! shutdown.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use loom_agent::prompt::PromptBuilder;
use loom_agent::tools::ToolRegistry;
use loom_agent::LlmProvider;
use loom_channels::manager::ChannelManager;
use loom_channels::router::{Router, RouterConfig};
use loom_core::config::GatewayConfig;
use loom_discord::channel::DiscordChannel;
use loom_scheduler::engine::{SchedulerEngine, SchedulerHandle};
use loom_sessions::manager::SessionManager;
use loom_telegram::channel::TelegramChannel;

use loom_gateway::app::{build_router, dispatch_job, AppState};
use loom_gateway::cli_channel::CliChannel;
use loom_gateway::providers::ProviderRouter;
use loom_gateway::webchat_channel::WebChatChannel;

/// A multi-channel AI agent gateway: one conversational core reachable
/// from chat apps, WebChat, and a local CLI, with scheduled jobs that can
/// talk back into the same sessions.
#[derive(Parser, Debug)]
#[command(name = "loom-gateway", version, about)]
struct Cli {
    /// Path to loom.toml. Falls back to `LOOM_CONFIG`, then `~/.loom/loom.toml`.
    #[arg(long)]
    config: Option<String>,

    /// Also register the local CLI channel, reading turns from stdin.
    #[arg(long)]
    cli: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::parse();
    let config = GatewayConfig::load(args.config.as_deref())?;
    info!(data_dir = %config.data_dir(), port = config.server.port, "loom-gateway starting");

    let sessions = Arc::new(SessionManager::load(config.sessions_dir())?);
    let tools = Arc::new(ToolRegistry::with_builtins());
    let provider: Arc<dyn LlmProvider> = Arc::new(ProviderRouter::from_config(&config));

    let mut prompt_builder = PromptBuilder::new(config.agent.system_prompt.clone());
    let tool_defs_text = tools
        .definitions()
        .into_iter()
        .map(|d| format!("- {}: {}", d.name, d.description))
        .collect::<Vec<_>>()
        .join("\n");
    prompt_builder.set_tool_defs(tool_defs_text);
    let system_prompt = prompt_builder.build_prompt(None);

    let mut channels = ChannelManager::new();
    channels.register(Arc::new(WebChatChannel));

    if let Some(discord_config) = config.channels.discord.clone() {
        channels.register(Arc::new(DiscordChannel::new(discord_config)));
    }
    if let Some(telegram_config) = config.channels.telegram.clone() {
        channels.register(Arc::new(TelegramChannel::new(telegram_config)));
    }
    if args.cli {
        channels.register(Arc::new(CliChannel::new()));
    }
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

    {
        let router_for_handler = Arc::clone(&router);
        channels.set_global_handler(move || {
            let router = Arc::clone(&router_for_handler);
            Box::new(move |inbound| router.handle_inbound(inbound, None))
        });
    }

    let scheduler_handle = SchedulerHandle::new(config.jobs_path());
    let (fired_tx, mut fired_rx) = mpsc::channel(64);
    let scheduler_engine = SchedulerEngine::new(scheduler_handle.clone(), Some(fired_tx));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState {
        config: Arc::new(config.clone()),
        sessions: Arc::clone(&sessions),
        provider: Arc::clone(&provider),
        tools: Arc::clone(&tools),
        system_prompt,
        channels: Arc::clone(&channels),
        router,
        scheduler: scheduler_handle,
        webchat_subscribers: Arc::new(DashMap::new()),
        started_at: Arc::new(Instant::now()),
    };

    let scheduler_task = tokio::spawn(scheduler_engine.run(shutdown_rx));

    let dispatch_state = state.clone();
    let dispatch_task = tokio::spawn(async move {
        while let Some(job) = fired_rx.recv().await {
            let state = dispatch_state.clone();
            tokio::spawn(dispatch_job(state, job));
        }
    });

    channels.start_all().await;

    let autosave_sessions = Arc::clone(&sessions);
    let autosave_secs = config.agent.autosave_secs.max(1);
    let autosave_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(autosave_secs));
        loop {
            interval.tick().await;
            if let Err(e) = autosave_sessions.flush() {
                warn!(error = %e, "autosave flush failed");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind((state.config.server.bind.as_str(), state.config.server.port)).await?;
    info!(addr = %listener.local_addr()?, "listening");

    let app = build_router(state);
    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received, shutting down");
    });

    if let Err(e) = server.await {
        warn!(error = %e, "server exited with error");
    }

    let _ = shutdown_tx.send(true);
    autosave_task.abort();
    dispatch_task.abort();
    channels.stop_all().await;
    if let Err(e) = sessions.flush() {
        warn!(error = %e, "final session flush failed");
    }
    let _ = scheduler_task.await;

    Ok(())
}
