// =============================================================================
// Central Application State — coin-pulse dashboard
// =============================================================================
//
// The single source of truth shared by the scheduler and the API. Holds the
// market data source, the most recently published `DashboardSnapshot` and the
// per-asset analyses behind it, plus operational counters for the health
// endpoint.
//
// Thread safety:
//   - Atomic counters for lock-free version and cycle tracking.
//   - parking_lot::RwLock for published results (swapped whole, never edited).
//   - A tokio Mutex serialises refresh cycles so a manual refresh and a
//     scheduled one never run at the same time.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::assembler::AssetAnalysis;
use crate::charts::{build_chart_bundle, ChartBundle};
use crate::error::MarketDataResult;
use crate::export::SeriesTable;
use crate::market_data::cbbi::{CbbiClient, CbbiReport};
use crate::market_data::{MarketDataSource, RateLimitSnapshot, RateLimitTracker};
use crate::refresh::{rank_top_markets, run_cycle, DashboardSnapshot, TopMarketRow};
use crate::runtime_config::DashboardConfig;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Asset the error concerns, if any.
    pub asset: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Incremented every time a new snapshot is published.
    pub state_version: AtomicU64,

    /// Refresh cycles completed since start.
    pub cycle_count: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub config: Arc<RwLock<DashboardConfig>>,

    // ── Upstream ────────────────────────────────────────────────────────
    source: Arc<dyn MarketDataSource>,
    pub rate_limits: Arc<RateLimitTracker>,
    cbbi: Option<Arc<CbbiClient>>,

    // ── Published results ───────────────────────────────────────────────
    latest: RwLock<Option<Arc<DashboardSnapshot>>>,
    analyses: RwLock<HashMap<String, Arc<AssetAnalysis>>>,
    refresh_lock: tokio::sync::Mutex<()>,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: DashboardConfig,
        source: Arc<dyn MarketDataSource>,
        rate_limits: Arc<RateLimitTracker>,
        cbbi: Option<Arc<CbbiClient>>,
    ) -> Self {
        Self {
            state_version: AtomicU64::new(0),
            cycle_count: AtomicU64::new(0),
            config: Arc::new(RwLock::new(config)),
            source,
            rate_limits,
            cbbi,
            latest: RwLock::new(None),
            analyses: RwLock::new(HashMap::new()),
            refresh_lock: tokio::sync::Mutex::new(()),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Refresh ─────────────────────────────────────────────────────────

    /// Run one refresh cycle with the current config and publish it.
    ///
    /// Concurrent callers queue behind the running cycle; thanks to the
    /// source cache the second cycle is then served without upstream calls.
    pub async fn refresh_now(&self) -> Arc<DashboardSnapshot> {
        let _guard = self.refresh_lock.lock().await;
        let settings = self.config.read().refresh_settings();

        let outcome = run_cycle(self.source.as_ref(), &settings).await;

        if let Some(err) = &outcome.snapshot.snapshot_error {
            self.push_error(err.clone(), None);
        }
        for failure in &outcome.snapshot.history_failures {
            self.push_error(failure.error.clone(), Some(failure.asset_id.clone()));
        }

        let snapshot = Arc::new(outcome.snapshot);
        let analyses = outcome
            .analyses
            .into_iter()
            .map(|(id, analysis)| (id, Arc::new(analysis)))
            .collect();

        *self.analyses.write() = analyses;
        *self.latest.write() = Some(snapshot.clone());
        self.cycle_count.fetch_add(1, Ordering::SeqCst);
        let version = self.increment_version();
        debug!(version, cycle = %snapshot.cycle_id, "snapshot published");

        snapshot
    }

    pub fn latest_snapshot(&self) -> Option<Arc<DashboardSnapshot>> {
        self.latest.read().clone()
    }

    pub fn analysis(&self, asset_id: &str) -> Option<Arc<AssetAnalysis>> {
        self.analyses.read().get(&asset_id.to_lowercase()).cloned()
    }

    pub fn chart_bundle(&self, asset_id: &str) -> Option<ChartBundle> {
        self.analysis(asset_id).map(|a| build_chart_bundle(&a))
    }

    pub fn indicator_table(&self, asset_id: &str) -> Option<SeriesTable> {
        self.analysis(asset_id)
            .map(|a| SeriesTable::from_indicators(&a.series, &a.indicators))
    }

    /// Top assets by market cap with their RSI, through the cached source.
    /// `currency` falls back to the configured quote currency.
    pub async fn top_markets(&self, currency: Option<&str>, per_page: u32) -> MarketDataResult<Vec<TopMarketRow>> {
        let (settings, days) = {
            let config = self.config.read();
            (config.refresh_settings(), config.top_markets_history_days)
        };
        let currency = currency
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| settings.currency.clone());
        rank_top_markets(self.source.as_ref(), &currency, per_page, days, &settings).await
    }

    /// Latest CBBI report; `None` when the companion view is disabled.
    pub async fn cbbi(&self) -> Option<MarketDataResult<CbbiReport>> {
        let client = self.cbbi.clone()?;
        let result = client.fetch().await;
        if let Err(e) = &result {
            warn!(error = %e, "CBBI fetch failed");
        }
        Some(result)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error. The ring buffer is capped at [`MAX_RECENT_ERRORS`];
    /// oldest entries are evicted first.
    pub fn push_error(&self, message: String, asset: Option<String>) {
        let record = ErrorRecord {
            message,
            asset,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }

    // ── Health ──────────────────────────────────────────────────────────

    pub fn health(&self) -> HealthSnapshot {
        let latest = self.latest_snapshot();
        let config = self.config.read();
        HealthSnapshot {
            status: match latest.as_deref() {
                None => "starting",
                Some(s) if s.snapshot_error.is_some() || !s.history_failures.is_empty() => "degraded",
                Some(_) => "ok",
            },
            state_version: self.current_state_version(),
            cycle_count: self.cycle_count.load(Ordering::SeqCst),
            last_refresh: latest.as_ref().map(|s| s.generated_at),
            uptime_secs: self.start_time.elapsed().as_secs(),
            profile: config.profile.to_string(),
            tracked_assets: config.assets.clone(),
            rate_limits: self.rate_limits.snapshot(),
            recent_errors: self.recent_errors.read().clone(),
            server_time: Utc::now().timestamp_millis(),
        }
    }
}

/// Payload of `GET /api/v1/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub state_version: u64,
    pub cycle_count: u64,
    pub last_refresh: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub profile: String,
    pub tracked_assets: Vec<String>,
    pub rate_limits: RateLimitSnapshot,
    pub recent_errors: Vec<ErrorRecord>,
    pub server_time: i64,
}
