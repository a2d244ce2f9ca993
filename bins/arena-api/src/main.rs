mod error;
mod handlers;
mod matchmaking;
mod metrics;
mod notify;
mod problems;
mod routes;
mod ws;

use anyhow::Context;
use arena_common::config::{Config, StoreBackend};
use arena_engine::config::LanguageConfigManager;
use arena_engine::docker::DockerSandbox;
use arena_engine::{Judge, Pipeline, Sandbox};
use axum::Router;
use matchmaking::Matchmaker;
use notify::NotificationHub;
use problems::{InMemoryProblemStore, ProblemStore, RedisProblemStore};
use redis::aio::ConnectionManager;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub judge: Judge,
    pub problems: Arc<dyn ProblemStore>,
    pub matchmaker: Matchmaker,
    pub hub: Arc<NotificationHub>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<Pipeline>,
        problems: Arc<dyn ProblemStore>,
        duel_problem_ids: RangeInclusive<u32>,
        pairing_timeout: Duration,
        duel_timeout: Duration,
    ) -> Self {
        let hub = Arc::new(NotificationHub::new());
        Self {
            judge: Judge::new(pipeline.clone()),
            pipeline,
            problems,
            matchmaker: Matchmaker::new(hub.clone(), duel_problem_ids, pairing_timeout, duel_timeout),
            hub,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(anyhow::Error::msg)?;
    init_tracing(config.json_logs);
    error::set_hardened(config.hardened);

    info!("Arena API booting...");

    let languages = LanguageConfigManager::load_or_builtin(&config.executor.languages_file)?;
    info!("Loaded language configurations for: {:?}", languages.list_languages());

    let problems: Arc<dyn ProblemStore> = match config.store {
        StoreBackend::Redis => {
            let client = redis::Client::open(config.redis_url.as_str())
                .context("Failed to create Redis client")?;
            let conn = ConnectionManager::new(client)
                .await
                .context("Failed to connect to Redis")?;
            info!("Connected to Redis: {}", config.redis_url);
            Arc::new(RedisProblemStore::new(conn))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory problem store; problems are lost on restart");
            Arc::new(InMemoryProblemStore::new())
        }
    };

    let sandbox = Arc::new(DockerSandbox::connect(config.executor.clone())?);

    // Bring the executor container up now; requests re-acquire it on demand
    match sandbox.acquire().await {
        Ok(env) => info!(container = %env.name, "Execution environment ready"),
        Err(e) => warn!(error = %e, "Execution environment not ready yet"),
    }

    let pipeline = Arc::new(Pipeline::new(sandbox, languages, &config.executor));
    let state = Arc::new(AppState::new(
        pipeline,
        problems,
        config.duel_problem_ids.clone(),
        config.pairing_timeout,
        config.duel_timeout,
    ));

    let app = Router::new()
        .merge(routes::routes())
        .with_state(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("HTTP server listening on {}", config.bind_addr);
    info!(
        run_timeout_s = config.executor.run_timeout.as_secs(),
        container = %config.executor.container_name,
        "Ready to accept jobs"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Arena API shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    warn!("Received shutdown signal, finishing in-flight requests...");
}
