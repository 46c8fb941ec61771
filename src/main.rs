//! Market Digest Bot — Binary Entrypoint
//! Wires the preference store, digest cache, rate-limited dispatcher,
//! scheduler, Telegram command loop, and the diagnostics HTTP server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_digest_bot::api::{create_router, AppState};
use market_digest_bot::cache::DigestCache;
use market_digest_bot::commands::{run_command_loop, CommandContext};
use market_digest_bot::config::{load_triggers_default, AppConfig};
use market_digest_bot::content::OpenAiProvider;
use market_digest_bot::dispatch::{Dispatcher, RateLimiter};
use market_digest_bot::fanout::Orchestrator;
use market_digest_bot::metrics::Metrics;
use market_digest_bot::scheduler::Scheduler;
use market_digest_bot::store::SqliteStore;
use market_digest_bot::transport::{TelegramApi, TelegramTransport};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::from_env()?;
    let metrics = Metrics::init();

    let store = Arc::new(SqliteStore::open(&cfg.db_path)?);
    let provider = Arc::new(OpenAiProvider::new(
        cfg.openai_api_key.clone(),
        &cfg.openai_model,
    ));
    let cache = Arc::new(DigestCache::new(
        provider,
        Duration::from_secs(cfg.cache_ttl_secs),
    ));

    let tg = Arc::new(TelegramApi::new(cfg.telegram_token.clone()));
    match tg.get_me().await {
        Ok(me) => tracing::info!(
            bot = me.username.as_deref().unwrap_or(&me.first_name),
            "connected to Telegram"
        ),
        Err(e) => tracing::warn!(error = ?e, "getMe failed, continuing anyway"),
    }

    let transport = Arc::new(TelegramTransport::new(tg.clone()));
    let limiter = Arc::new(RateLimiter::new(Duration::from_millis(cfg.send_gap_ms)));
    let dispatcher = Arc::new(Dispatcher::new(transport, store.clone(), limiter));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        cache.clone(),
        dispatcher.clone(),
        Duration::from_secs(cfg.cycle_budget_secs),
        shutdown_rx.clone(),
    ));

    let triggers = load_triggers_default()?;
    let scheduler = Scheduler::new(
        triggers,
        orchestrator.clone(),
        Duration::from_secs(cfg.tick_secs),
        shutdown_rx.clone(),
    );
    let scheduler_task = tokio::spawn(scheduler.run());

    let command_task = tokio::spawn(run_command_loop(
        CommandContext {
            api: tg,
            store: store.clone(),
            cache,
            dispatcher,
            orchestrator: orchestrator.clone(),
        },
        shutdown_rx.clone(),
    ));

    let router = create_router(AppState {
        orchestrator,
        metrics: Some(metrics.handle.clone()),
    });
    let addr = format!("0.0.0.0:{}", cfg.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "diagnostics server listening");

    let mut server_shutdown = shutdown_rx.clone();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = server_shutdown.changed().await;
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received, draining");
            let _ = shutdown_tx.send(true);
        }
    });

    server.await.context("diagnostics server")?;
    let _ = scheduler_task.await;
    let _ = command_task.await;
    tracing::info!("bye");
    Ok(())
}
