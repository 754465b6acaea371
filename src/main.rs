//! Pricewatch - Entry Point
//!
//! Initializes configuration, logging, market data feeds,
//! and the feed coordinator. Runs until SIGINT/SIGTERM.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Load Alpaca auth from env vars (ALPACA_API_KEY_ID, ALPACA_API_SECRET_KEY)
//! 4. Create REST pollers (Alpaca when credentialed, Yahoo always)
//! 5. Create CoinbaseStream (WebSocket ticker feed + auto-reconnect)
//! 6. Spawn health/metrics server (/live + /ready + /metrics)
//! 7. Spawn ConfigWatcher (watchlist hot reload)
//! 8. Spawn FeedCoordinator main loop (event-driven tokio::select!)
//! 9. Wait for SIGINT -> graceful shutdown (signal, drain, exit)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use pricewatch::adapters::feeds::{
    AlpacaCredentials, AlpacaFetcher, CoinbaseStream, QuotePoller, StreamConfig, YahooFetcher,
};
use pricewatch::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use pricewatch::adapters::notify::LogNotifier;
use pricewatch::config::hot_reload::ConfigWatcher;
use pricewatch::config::loader::load_config;
use pricewatch::usecases::FeedCoordinator;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration from config.toml ──────────────
    let config = load_config(CONFIG_PATH).context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(&config.engine.log_level)
                }),
        )
        .json()
        .init();

    info!(
        name = %config.engine.name,
        version = env!("CARGO_PKG_VERSION"),
        symbols = config.symbols.len(),
        streaming = config.feeds.streaming_enabled,
        "Starting Pricewatch"
    );

    // ── 3. Shutdown signal channel ──────────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 4. Create equity pollers ────────────────────────────
    let alpaca = match AlpacaCredentials::from_env() {
        Some(credentials) => {
            info!("Alpaca credentials found, Alpaca equity polling enabled");
            let fetcher = AlpacaFetcher::new(credentials)
                .context("Failed to create Alpaca client")?;
            Some(QuotePoller::new(fetcher))
        }
        None => {
            info!("No Alpaca credentials in env, equities poll via Yahoo only");
            None
        }
    };

    let yahoo = QuotePoller::new(
        YahooFetcher::new().context("Failed to create Yahoo client")?,
    );

    // ── 5. Create Coinbase streaming feed ───────────────────
    let mut stream_config = StreamConfig::default();
    if let Some(url) = &config.feeds.stream_url {
        stream_config.url = url.clone();
    }
    let stream = CoinbaseStream::new(stream_config);

    // ── 6. Spawn health/metrics server ──────────────────────
    let metrics =
        Arc::new(MetricsRegistry::new().context("Failed to create metrics registry")?);
    let health = Arc::new(HealthState::new());

    let health_handle = if config.metrics.enabled {
        let server = HealthServer::new(
            Arc::clone(&health),
            Arc::clone(&metrics),
            config.metrics.bind_address.clone(),
        );
        let server_shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(server_shutdown).await {
                error!(error = %e, "Health server failed");
            }
        }))
    } else {
        info!("Metrics endpoint disabled by config");
        None
    };

    // ── 7. Spawn config hot-reload watcher ──────────────────
    let (mut watcher, config_rx) = ConfigWatcher::new(CONFIG_PATH, config.clone());
    let watcher_shutdown = shutdown_tx.subscribe();
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher.run(watcher_shutdown).await {
            error!(error = %e, "Config watcher failed");
        }
    });

    // ── 8. Spawn main feed coordinator ──────────────────────
    let coordinator = FeedCoordinator::new(
        stream,
        alpaca,
        yahoo,
        Arc::new(LogNotifier::new()),
        Arc::clone(&metrics),
        Arc::clone(&health),
        config_rx,
        shutdown_tx.subscribe(),
    );
    let coordinator_handle = tokio::spawn(async move {
        if let Err(e) = coordinator.run().await {
            error!(error = %e, "Feed coordinator failed");
        }
    });

    info!("All tasks spawned, engine is running");

    // ── 9. Wait for SIGINT or SIGTERM ───────────────────────
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("SIGINT received, initiating graceful shutdown");
        }
    }

    // ── Graceful shutdown ───────────────────────────────────

    // 1. Signal all tasks to stop
    let _ = shutdown_tx.send(());
    info!("Shutdown signal broadcast to all tasks");

    // 2. Mark readiness probe unhealthy (503 while draining)
    health.engine_running.store(false, Ordering::Relaxed);

    // 3. Wait for the coordinator to unwind its feeds (up to 10s)
    info!("Waiting for feed coordinator shutdown...");
    let _ = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        coordinator_handle,
    )
    .await;

    // 4. Wait for the config watcher (up to 5s)
    let _ = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        watcher_handle,
    )
    .await;

    // 5. Let the health server finish its graceful exit
    if let Some(handle) = health_handle {
        let _ = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            handle,
        )
        .await;
    }

    info!("Shutdown complete");
    Ok(())
}
