mod adapters;
mod auth;
mod config;
mod db;
mod engine;
mod error;
mod fetch;
mod models;
mod routes;
mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Utc;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::{Command, Config};
use crate::engine::scheduler::SourceScheduler;
use crate::engine::{Engine, EngineConfig};
use crate::fetch::HttpFetcher;
use crate::models::run::{RunStatus, RunTrigger};
use crate::routes::AppState;
use crate::store::Storage;

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(storage: Storage) -> impl IntoResponse {
    match storage.sources.ping().await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("talentsource=info,tower_http=info")),
        )
        .init();

    let config = Config::parse();

    let storage = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(url).await?;
            if config.run_migrations {
                tracing::info!("Running database migrations...");
                db::run_migrations(&pool).await?;
                tracing::info!("Migrations complete");
            }
            Storage::postgres(pool)
        }
        None => {
            tracing::warn!("No DATABASE_URL set, using in-memory store; state is not durable");
            Storage::memory()
        }
    };

    let engine_config = EngineConfig::default();
    let fetcher = Arc::new(HttpFetcher::new(engine_config.page_timeout));
    let engine = Arc::new(Engine::new(storage.clone(), fetcher, engine_config));

    let recovered = engine.orchestrator.recover_stale().await?;
    if recovered > 0 {
        tracing::info!("Recovered {recovered} interrupted runs at startup");
    }

    match config.resolved_command() {
        Command::Serve {
            listen_addr,
            tick_interval,
        } => serve(config, storage, engine, listen_addr, tick_interval).await,
        Command::Scrape { source } => scrape_once(engine, source).await,
        Command::Tick => tick_once(storage, engine).await,
    }
}

async fn serve(
    config: Config,
    storage: Storage,
    engine: Arc<Engine>,
    listen_addr: String,
    tick_interval: u64,
) -> anyhow::Result<()> {
    let scheduler = SourceScheduler::new(
        storage.clone(),
        engine.orchestrator.clone(),
        Duration::from_secs(tick_interval),
    );
    tokio::spawn(scheduler.run());

    let state = AppState {
        engine,
        api_token_hash: config.api_token.as_deref().map(auth::hash_token),
    };
    if state.api_token_hash.is_none() {
        tracing::warn!("No API_TOKEN set, API is unauthenticated");
    }

    let readyz_storage = storage.clone();
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(move || readyz(readyz_storage.clone())))
        .merge(routes::api::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!("Listening on {listen_addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

/// `scrape --source <id>`: run one source to completion and exit, with a
/// nonzero status when the run failed.
async fn scrape_once(engine: Arc<Engine>, source_id: uuid::Uuid) -> anyhow::Result<()> {
    let run_id = engine
        .orchestrator
        .start(source_id, RunTrigger::Manual, "cli")
        .await?;
    tracing::info!(run_id = %run_id, "Run started, waiting for completion");

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = engine.orchestrator.status(source_id).await?;
        if status.is_running {
            continue;
        }
        let Some(run) = status.last_run else {
            anyhow::bail!("run {run_id} left no history entry");
        };
        tracing::info!(
            status = ?run.status,
            pages = run.pages_scraped,
            found = run.candidates_found,
            added = run.candidates_added,
            duplicates = run.duplicates_skipped,
            "Run finished"
        );
        if run.status == RunStatus::Failed {
            anyhow::bail!(
                "run failed: {}",
                run.first_error()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        return Ok(());
    }
}

/// `tick`: one scheduler pass over due sources, waiting for the runs it
/// started before exiting. Useful under an external cron.
async fn tick_once(storage: Storage, engine: Arc<Engine>) -> anyhow::Result<()> {
    let scheduler = SourceScheduler::new(
        storage.clone(),
        engine.orchestrator.clone(),
        Duration::from_secs(60),
    );
    let started = scheduler.tick(Utc::now()).await?;
    tracing::info!("Tick started {started} runs");

    loop {
        let mut any_running = false;
        for source in storage.sources.list().await? {
            if engine.orchestrator.status(source.id).await?.is_running {
                any_running = true;
                break;
            }
        }
        if !any_running {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
