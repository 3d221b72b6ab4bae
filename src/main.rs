// =============================================================================
// coin-pulse — Main Entry Point
// =============================================================================
//
// Two modes:
//
//   coin-pulse            run the refresh scheduler and the dashboard API
//   coin-pulse snapshot   run a single cycle, print the summary as JSON and,
//                         when COIN_PULSE_EXPORT_DIR is set, write one CSV per
//                         asset there
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod assembler;
mod charts;
mod error;
mod export;
mod indicators;
mod market_data;
mod refresh;
mod runtime_config;
mod scheduler;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::market_data::cbbi::CbbiClient;
use crate::market_data::{CachedMarketData, CoinGeckoClient, MarketDataSource, RateLimitTracker};
use crate::runtime_config::{DashboardConfig, DEFAULT_CONFIG_PATH};
use crate::scheduler::RefreshScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("COIN_PULSE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let mut config = DashboardConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        let defaults = DashboardConfig::default();
        if !std::path::Path::new(&config_path).exists() {
            if let Err(e) = defaults.save(&config_path) {
                warn!(error = %e, "Failed to write default config");
            }
        }
        defaults
    });
    config.apply_env_overrides();
    config.validate().context("invalid dashboard configuration")?;

    info!(
        assets = ?config.assets,
        currency = %config.currency,
        profile = %config.profile,
        "coin-pulse starting"
    );

    // ── 2. Upstream clients ──────────────────────────────────────────────
    let rate_limits = Arc::new(RateLimitTracker::new(config.requests_per_minute));
    let client = CoinGeckoClient::new(
        config.coingecko_base_url.clone(),
        config.coingecko_api_key.clone(),
        config.request_timeout(),
        rate_limits.clone(),
    )?;
    let cached = Arc::new(CachedMarketData::new(client, config.cache_policy()));
    let source: Arc<dyn MarketDataSource> = cached.clone();

    let cbbi = if config.cbbi_enabled {
        Some(Arc::new(CbbiClient::new(
            config.cbbi_url.clone(),
            config.request_timeout(),
            config.cache_policy().snapshot_ttl,
        )?))
    } else {
        None
    };

    let interval = config.refresh_interval();
    let bind_addr = config.bind_addr.clone();

    // ── 3. Shared state ──────────────────────────────────────────────────
    let state = Arc::new(AppState::new(config, source, rate_limits, cbbi));

    if std::env::args().nth(1).as_deref() == Some("snapshot") {
        return run_snapshot(&state).await;
    }

    // ── 4. Scheduler ─────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let scheduler = RefreshScheduler::new(state.clone(), interval);
    let scheduler_handle = tokio::spawn(async move { scheduler.run(shutdown_rx, None).await });

    // Expired entries are otherwise only replaced when their key is asked for
    // again, so assets dropped from the config would linger.
    let mut purge_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let removed = cached.purge_expired();
                    if removed > 0 {
                        info!(removed, "expired cache entries purged");
                    }
                }
                _ = purge_shutdown.recv() => break,
            }
        }
    });

    // ── 5. API server ────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server to {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(state.clone());
    let mut api_shutdown = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.recv().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");
    let _ = shutdown_tx.send(());

    let cycles = scheduler_handle.await.unwrap_or_else(|e| {
        error!(error = %e, "scheduler task failed");
        0
    });
    if let Err(e) = server_handle.await {
        error!(error = %e, "API server task failed");
    }

    info!(cycles, "coin-pulse shut down complete.");
    Ok(())
}

/// One cycle, summary to stdout, optional CSV files.
async fn run_snapshot(state: &AppState) -> anyhow::Result<()> {
    let snapshot = state.refresh_now().await;
    let json = serde_json::to_string_pretty(snapshot.as_ref()).context("failed to serialise summary")?;
    println!("{json}");

    if let Ok(dir) = std::env::var("COIN_PULSE_EXPORT_DIR") {
        let dir = PathBuf::from(dir);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create export dir {}", dir.display()))?;

        let assets = state.config.read().assets.clone();
        for asset in &assets {
            if let Some(table) = state.indicator_table(asset) {
                table.write_csv(dir.join(format!("{asset}.csv")))?;
            }
        }
        if let Some(Ok(report)) = state.cbbi().await {
            report.table.write_csv(dir.join("cbbi_series.csv"))?;
        }
    }
    Ok(())
}
