// =============================================================================
// Refresh Cycle — snapshot + history fan-out + indicators + rows
// =============================================================================
//
// One cycle:
//
//   1. fetch_snapshot for every tracked asset (one call)
//   2. fetch_history per asset, at most `concurrency` in flight at once
//   3. IndicatorSet::compute per history (synchronous, pure)
//   4. assemble_rows → DashboardSnapshot
//
// Every upstream call is bounded by `request_timeout`. Nothing in a cycle is
// fatal: a failed snapshot leaves the table empty and records the error, a
// failed history becomes an empty series whose indicators are unavailable.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::assembler::{assemble_rows, AssetAnalysis, AssetSummaryRow, Momentum};
use crate::error::{MarketDataError, MarketDataResult};
use crate::indicators::{IndicatorParams, IndicatorSet};
use crate::market_data::MarketDataSource;
use crate::types::{AssetSnapshot, IndicatorValue, PriceSeries};

/// Inputs of a refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSettings {
    pub assets: Vec<String>,
    pub currency: String,
    pub days: u32,
    pub params: IndicatorParams,
    /// Maximum history fetches in flight.
    pub concurrency: usize,
    pub request_timeout: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            assets: ["bitcoin", "ethereum", "solana", "sui"]
                .into_iter()
                .map(String::from)
                .collect(),
            currency: "usd".to_string(),
            days: 30,
            params: IndicatorParams::default(),
            concurrency: 4,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// A history fetch that failed this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryFailure {
    pub asset_id: String,
    pub error: String,
}

/// Published result of one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub currency: String,
    pub rows: Vec<AssetSummaryRow>,
    /// Tracked assets the provider's snapshot did not include.
    pub missing_assets: Vec<String>,
    pub history_failures: Vec<HistoryFailure>,
    /// Set when the snapshot call itself failed; `rows` is then empty.
    pub snapshot_error: Option<String>,
}

/// Snapshot plus the per-asset series and indicators behind it.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub snapshot: DashboardSnapshot,
    pub analyses: HashMap<String, AssetAnalysis>,
}

/// Await `fut`, failing with `UpstreamUnavailable` once `timeout` elapses.
pub async fn with_timeout<T, F>(operation: &str, timeout: Duration, fut: F) -> MarketDataResult<T>
where
    F: Future<Output = MarketDataResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(MarketDataError::upstream(
            operation,
            format!("timed out after {} ms", timeout.as_millis()),
        )),
    }
}

/// Run one refresh cycle against `source`. Never fails.
pub async fn run_cycle<S>(source: &S, settings: &RefreshSettings) -> CycleOutcome
where
    S: MarketDataSource + ?Sized,
{
    let started_at = Utc::now();
    let cycle_id = Uuid::new_v4().to_string();
    let currency = settings.currency.as_str();

    // ---- 1. snapshot ----
    let (snapshots, snapshot_error) = match with_timeout(
        "fetch_snapshot",
        settings.request_timeout,
        source.fetch_snapshot(currency, &settings.assets),
    )
    .await
    {
        Ok(map) => (map, None),
        Err(e) => {
            warn!(cycle = %cycle_id, error = %e, "snapshot fetch failed — table will be empty");
            (HashMap::new(), Some(e.to_string()))
        }
    };

    // ---- 2. histories ----
    let results: Vec<(String, MarketDataResult<PriceSeries>)> = stream::iter(settings.assets.iter().cloned())
        .map(|asset_id| async move {
            let result = with_timeout(
                "fetch_history",
                settings.request_timeout,
                source.fetch_history(&asset_id, currency, settings.days),
            )
            .await;
            (asset_id, result)
        })
        .buffer_unordered(settings.concurrency.max(1))
        .collect()
        .await;

    // ---- 3. indicators ----
    let mut analyses = HashMap::with_capacity(results.len());
    let mut history_failures = Vec::new();
    for (asset_id, result) in results {
        let series = match result {
            Ok(series) => series,
            Err(e) => {
                warn!(cycle = %cycle_id, asset = %asset_id, error = %e, "history fetch failed — indicators unavailable");
                history_failures.push(HistoryFailure {
                    asset_id: asset_id.clone(),
                    error: e.to_string(),
                });
                PriceSeries::empty(asset_id.as_str())
            }
        };
        analyses.insert(asset_id, AssetAnalysis::compute(series, &settings.params));
    }
    history_failures.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));

    // ---- 4. rows ----
    let (rows, missing_assets) = if snapshot_error.is_some() {
        (Vec::new(), Vec::new())
    } else {
        assemble_rows(&settings.assets, &snapshots, &analyses, &settings.params)
    };

    info!(
        cycle = %cycle_id,
        rows = rows.len(),
        missing = missing_assets.len(),
        history_failures = history_failures.len(),
        snapshot_ok = snapshot_error.is_none(),
        elapsed_ms = (Utc::now() - started_at).num_milliseconds(),
        "refresh cycle complete"
    );

    CycleOutcome {
        snapshot: DashboardSnapshot {
            cycle_id,
            started_at,
            generated_at: Utc::now(),
            currency: settings.currency.clone(),
            rows,
            missing_assets,
            history_failures,
            snapshot_error,
        },
        analyses,
    }
}

// =============================================================================
// Top markets
// =============================================================================

/// One row of the top-by-market-cap table: the provider's snapshot plus the
/// RSI reading of its recent history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopMarketRow {
    #[serde(flatten)]
    pub snapshot: AssetSnapshot,
    pub history_points: usize,
    pub rsi: IndicatorValue,
    pub momentum: Momentum,
}

/// Fetch the top `per_page` assets and attach RSI and momentum computed from
/// `days` of history each.
///
/// Only the ranking call can fail the request. A history that fails or times
/// out leaves that row's RSI unavailable. History fetches share the cycle's
/// concurrency limit and per-call timeout.
pub async fn rank_top_markets<S>(
    source: &S,
    currency: &str,
    per_page: u32,
    days: u32,
    settings: &RefreshSettings,
) -> MarketDataResult<Vec<TopMarketRow>>
where
    S: MarketDataSource + ?Sized,
{
    let markets = with_timeout(
        "fetch_top_markets",
        settings.request_timeout,
        source.fetch_top_markets(currency, per_page),
    )
    .await?;

    let ids: Vec<String> = markets.iter().map(|m| m.id.clone()).collect();
    let mut histories: HashMap<String, MarketDataResult<PriceSeries>> =
        stream::iter(ids)
            .map(|asset_id| async move {
                let result = with_timeout(
                    "fetch_history",
                    settings.request_timeout,
                    source.fetch_history(&asset_id, currency, days),
                )
                .await;
                (asset_id, result)
            })
            .buffer_unordered(settings.concurrency.max(1))
            .collect()
            .await;

    let rows: Vec<TopMarketRow> = markets
        .into_iter()
        .map(|snapshot| {
            let series = match histories.remove(&snapshot.id) {
                Some(Ok(series)) => series,
                Some(Err(e)) => {
                    warn!(asset = %snapshot.id, error = %e, "top-market history failed — RSI unavailable");
                    PriceSeries::empty(snapshot.id.as_str())
                }
                None => PriceSeries::empty(snapshot.id.as_str()),
            };
            let rsi = IndicatorSet::compute(&series, &settings.params).rsi.latest();
            TopMarketRow {
                history_points: series.len(),
                rsi,
                momentum: Momentum::classify(rsi),
                snapshot,
            }
        })
        .collect();

    info!(currency, rows = rows.len(), days, "top markets ranked");
    Ok(rows)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Trend;
    use crate::types::PricePoint;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted source: serves linear histories, can fail or stall per asset.
    #[derive(Default)]
    struct ScriptedSource {
        fail_snapshot: bool,
        unknown: Vec<&'static str>,
        top: Vec<&'static str>,
        failing_history: Vec<&'static str>,
        slow_history: Vec<&'static str>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        async fn fetch_snapshot(
            &self,
            _currency: &str,
            asset_ids: &[String],
        ) -> MarketDataResult<HashMap<String, AssetSnapshot>> {
            if self.fail_snapshot {
                return Err(MarketDataError::upstream("fetch_snapshot", "HTTP 500"));
            }
            Ok(asset_ids
                .iter()
                .filter(|id| !self.unknown.contains(&id.as_str()))
                .map(|id| (id.clone(), scripted_snapshot(id)))
                .collect())
        }

        async fn fetch_top_markets(&self, _currency: &str, per_page: u32) -> MarketDataResult<Vec<AssetSnapshot>> {
            if self.fail_snapshot {
                return Err(MarketDataError::upstream("fetch_top_markets", "HTTP 500"));
            }
            Ok(self
                .top
                .iter()
                .take(per_page as usize)
                .map(|id| scripted_snapshot(id))
                .collect())
        }

        async fn fetch_history(&self, asset_id: &str, _currency: &str, days: u32) -> MarketDataResult<PriceSeries> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            let delay = if self.slow_history.contains(&asset_id) { 500 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing_history.contains(&asset_id) {
                return Err(MarketDataError::upstream("fetch_history", "HTTP 503"));
            }
            let points = (0..days)
                .map(|i| {
                    PricePoint::new(
                        Utc.timestamp_opt(1_700_000_000 + i as i64 * 86_400, 0).unwrap(),
                        100.0 + i as f64,
                    )
                })
                .collect();
            Ok(PriceSeries::from_points(asset_id, points))
        }
    }

    fn scripted_snapshot(id: &str) -> AssetSnapshot {
        AssetSnapshot {
            id: id.to_string(),
            name: id.to_string(),
            symbol: id.chars().take(3).collect(),
            current_price: Some(129.0),
            market_cap: None,
            volume_24h: None,
            change_24h_pct: None,
            change_7d_pct: None,
            change_30d_pct: None,
        }
    }

    fn settings(assets: &[&str]) -> RefreshSettings {
        RefreshSettings {
            assets: assets.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn healthy_cycle_builds_every_row() {
        let source = ScriptedSource::default();
        let outcome = run_cycle(&source, &settings(&["bitcoin", "ethereum"])).await;
        let snap = &outcome.snapshot;

        assert_eq!(snap.rows.len(), 2);
        assert!(snap.missing_assets.is_empty());
        assert!(snap.history_failures.is_empty());
        assert_eq!(snap.snapshot_error, None);
        assert_eq!(snap.rows[0].id, "bitcoin");
        assert_eq!(snap.rows[0].rsi, IndicatorValue::Defined(100.0));
        assert_eq!(snap.rows[0].trend, Trend::Bullish);
        assert_eq!(outcome.analyses["ethereum"].series.len(), 30);
    }

    #[tokio::test]
    async fn failed_history_degrades_one_row() {
        let source = ScriptedSource {
            failing_history: vec!["sui"],
            ..Default::default()
        };
        let outcome = run_cycle(&source, &settings(&["bitcoin", "sui"])).await;
        let snap = &outcome.snapshot;

        assert_eq!(snap.rows.len(), 2);
        let sui = snap.rows.iter().find(|r| r.id == "sui").unwrap();
        assert_eq!(sui.history_points, 0);
        assert_eq!(sui.momentum, Momentum::Unavailable);
        assert_eq!(snap.history_failures.len(), 1);
        assert_eq!(snap.history_failures[0].asset_id, "sui");
    }

    #[tokio::test]
    async fn missing_asset_is_reported_not_fabricated() {
        let source = ScriptedSource {
            unknown: vec!["not-a-coin"],
            ..Default::default()
        };
        let outcome = run_cycle(&source, &settings(&["bitcoin", "not-a-coin"])).await;
        assert_eq!(outcome.snapshot.rows.len(), 1);
        assert_eq!(outcome.snapshot.missing_assets, vec!["not-a-coin".to_string()]);
    }

    #[tokio::test]
    async fn failed_snapshot_keeps_histories() {
        let source = ScriptedSource {
            fail_snapshot: true,
            ..Default::default()
        };
        let outcome = run_cycle(&source, &settings(&["bitcoin"])).await;
        assert!(outcome.snapshot.rows.is_empty());
        assert!(outcome.snapshot.snapshot_error.is_some());
        assert_eq!(outcome.analyses["bitcoin"].series.len(), 30);
    }

    #[tokio::test]
    async fn slow_history_times_out_for_that_asset_only() {
        let source = ScriptedSource {
            slow_history: vec!["solana"],
            ..Default::default()
        };
        let mut s = settings(&["bitcoin", "solana"]);
        s.request_timeout = Duration::from_millis(100);

        let outcome = run_cycle(&source, &s).await;
        let snap = &outcome.snapshot;
        assert_eq!(snap.history_failures.len(), 1);
        assert_eq!(snap.history_failures[0].asset_id, "solana");
        assert!(snap.history_failures[0].error.contains("timed out"));
        assert_eq!(outcome.analyses["bitcoin"].series.len(), 30);
    }

    #[tokio::test]
    async fn fan_out_respects_concurrency_limit() {
        let source = ScriptedSource::default();
        let mut s = settings(&["a", "b", "c", "d", "e", "f", "g", "h"]);
        s.concurrency = 2;

        run_cycle(&source, &s).await;
        let peak = source.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak in flight {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn empty_asset_list_is_a_quiet_cycle() {
        let source = ScriptedSource::default();
        let outcome = run_cycle(&source, &settings(&[])).await;
        assert!(outcome.snapshot.rows.is_empty());
        assert!(outcome.analyses.is_empty());
        assert!(!outcome.snapshot.cycle_id.is_empty());
    }

    #[tokio::test]
    async fn top_markets_carry_rsi_and_momentum_in_rank_order() {
        let source = ScriptedSource {
            top: vec!["bitcoin", "ethereum", "tether", "solana"],
            failing_history: vec!["tether"],
            ..Default::default()
        };
        let mut s = settings(&[]);
        s.concurrency = 2;

        let rows = rank_top_markets(&source, "eur", 3, 30, &s).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.snapshot.id.as_str()).collect();
        assert_eq!(ids, ["bitcoin", "ethereum", "tether"]);

        assert_eq!(rows[0].history_points, 30);
        assert_eq!(rows[0].rsi, IndicatorValue::Defined(100.0));
        assert_eq!(rows[0].momentum, Momentum::Overbought);

        assert_eq!(rows[2].history_points, 0);
        assert_eq!(rows[2].rsi, IndicatorValue::Unavailable);
        assert_eq!(rows[2].momentum, Momentum::Unavailable);

        assert!(source.peak_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn top_markets_short_history_has_no_rsi() {
        let source = ScriptedSource {
            top: vec!["bitcoin"],
            ..Default::default()
        };
        // 14 daily samples give only 13 deltas, one short of an RSI(14) window.
        let rows = rank_top_markets(&source, "usd", 10, 14, &settings(&[])).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rsi, IndicatorValue::Unavailable);
    }

    #[tokio::test]
    async fn top_markets_ranking_failure_is_an_error() {
        let source = ScriptedSource {
            fail_snapshot: true,
            ..Default::default()
        };
        let err = rank_top_markets(&source, "usd", 10, 14, &settings(&[])).await.unwrap_err();
        assert!(matches!(err, MarketDataError::UpstreamUnavailable { .. }));
    }

    #[test]
    fn top_market_row_flattens_snapshot_fields() {
        let row = TopMarketRow {
            snapshot: scripted_snapshot("bitcoin"),
            history_points: 30,
            rsi: IndicatorValue::Defined(55.0),
            momentum: Momentum::Neutral,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["id"], "bitcoin");
        assert_eq!(json["current_price"], 129.0);
        assert_eq!(json["rsi"], 55.0);
        assert_eq!(json["momentum"], "neutral");
    }
}
