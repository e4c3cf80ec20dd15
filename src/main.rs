//! polytrader server entry point: wire the store, venue access layer,
//! market feed, copy trading and strategy engine together, then serve the
//! operator API until shutdown.

use anyhow::{Context, Result};
use polytrader::{
    api::{self, AppState},
    bus::EventBus,
    config::Config,
    copy::{CopyExecutor, CopyWatcher},
    engine::{Engine, RunnerDeps},
    markets::{GammaClient, MarketCache, MarketFeed},
    store::Store,
    venue::{RateLimiter, VenueClient},
};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!(db = %config.database_path, port = config.port, host = %config.host, "starting polytrader");

    let store = Store::open(&config.database_path).context("open store")?;
    let bus = EventBus::default();
    let limiter = RateLimiter::spawn();
    let cache = MarketCache::new();
    cache.spawn_sweeper();

    let client = VenueClient::new(store.clone(), limiter.clone());
    let gamma = GammaClient::new(limiter.clone(), cache.clone());
    let feed = MarketFeed::spawn(bus.clone());

    let watcher = CopyWatcher::spawn(store.clone(), client.clone(), bus.clone());
    let executor = CopyExecutor::spawn(store.clone(), client.clone(), bus.clone());

    let engine = Engine::new(RunnerDeps {
        store: store.clone(),
        bus: bus.clone(),
        feed: feed.clone(),
        gamma: gamma.clone(),
        cache: cache.clone(),
        client: client.clone(),
    });
    engine.auto_start().await;

    let state = AppState {
        store,
        bus,
        watcher,
        executor,
        engine: engine.clone(),
        feed,
        client,
        gamma,
    };
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "api listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        error!(error = %e, "server aborted");
        return Err(e.into());
    }

    // stop runners so each strategy persists its final status
    for id in engine.running_ids() {
        if let Err(e) = engine.stop_strategy(id).await {
            error!(strategy_id = id, error = %e, "failed to stop strategy on shutdown");
        }
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install ctrl-c handler");
    }
    info!("shutdown signal received");
}
