// =============================================================================
// CoinGecko REST API Client — public market endpoints
// =============================================================================
//
// Only unauthenticated GET endpoints are used. An optional demo key is sent as
// the `x-cg-demo-api-key` header and is never logged or serialised.
//
// Every call goes through `get_body`, which checks the local request budget,
// records the response status with the rate-limit tracker, and turns transport
// errors, non-2xx statuses and undecodable bodies into `UpstreamUnavailable`.
// Payload parsing lives in free functions so it can be tested without a
// network.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{MarketDataError, MarketDataResult};
use crate::market_data::rate_limit::RateLimitTracker;
use crate::market_data::MarketDataSource;
use crate::types::{AssetSnapshot, PricePoint, PriceSeries};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
/// Largest page `/coins/markets` serves. Without an explicit `per_page` the
/// provider stops at 100 rows, even for an `ids` filter.
pub const MAX_PER_PAGE: usize = 250;
const API_KEY_HEADER: &str = "x-cg-demo-api-key";

/// CoinGecko REST client.
#[derive(Clone)]
pub struct CoinGeckoClient {
    base_url: String,
    has_api_key: bool,
    client: reqwest::Client,
    rate_limits: Arc<RateLimitTracker>,
}

impl CoinGeckoClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` — API root, e.g. [`DEFAULT_BASE_URL`].
    /// * `api_key`  — optional demo key, sent as a header on every request.
    /// * `timeout`  — per-request timeout applied by the HTTP client.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        rate_limits: Arc<RateLimitTracker>,
    ) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut default_headers = HeaderMap::new();
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if let Some(key) = &api_key {
            let value = HeaderValue::from_str(key.trim()).context("API key is not a valid header value")?;
            default_headers.insert(API_KEY_HEADER, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .user_agent(concat!("coin-pulse/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        debug!(base_url = %base_url, keyed = api_key.is_some(), "CoinGeckoClient initialised");

        Ok(Self {
            base_url,
            has_api_key: api_key.is_some(),
            client,
            rate_limits,
        })
    }

    #[cfg(test)]
    pub fn rate_limits(&self) -> &Arc<RateLimitTracker> {
        &self.rate_limits
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    /// GET `{base_url}{path}` and return the body of a 2xx response.
    async fn get_body(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> MarketDataResult<String> {
        if !self.rate_limits.try_acquire() {
            return Err(MarketDataError::upstream(operation, "local rate limit reached"));
        }

        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| MarketDataError::upstream(operation, e))?;

        let status = resp.status();
        self.rate_limits.record_response(status, resp.headers());

        let body = resp
            .text()
            .await
            .map_err(|e| MarketDataError::upstream(operation, e))?;

        if !status.is_success() {
            warn!(operation, %status, "CoinGecko returned an error status");
            return Err(MarketDataError::upstream(
                operation,
                format!("HTTP {status}: {}", truncate(&body, 200)),
            ));
        }
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Endpoints
    // -------------------------------------------------------------------------

    /// GET /coins/markets for an explicit id list, one request per batch of
    /// [`MAX_PER_PAGE`] ids.
    #[instrument(skip(self, asset_ids), fields(count = asset_ids.len()), name = "coingecko::fetch_snapshot")]
    async fn markets_by_ids(
        &self,
        currency: &str,
        asset_ids: &[String],
    ) -> MarketDataResult<HashMap<String, AssetSnapshot>> {
        let mut snapshots = HashMap::with_capacity(asset_ids.len());
        for query in snapshot_queries(currency, asset_ids) {
            let body = self.get_body("fetch_snapshot", "/coins/markets", &query).await?;
            let rows = parse_markets(&body).map_err(|e| MarketDataError::upstream("fetch_snapshot", e))?;
            snapshots.extend(rows.into_iter().map(|row| (row.id.clone(), row)));
        }

        debug!(returned = snapshots.len(), "market snapshot fetched");
        Ok(snapshots)
    }

    /// GET /coins/markets, first page ordered by market cap.
    #[instrument(skip(self), name = "coingecko::fetch_top_markets")]
    async fn top_markets(&self, currency: &str, per_page: u32) -> MarketDataResult<Vec<AssetSnapshot>> {
        let query = [
            ("vs_currency", currency.to_string()),
            ("order", "market_cap_desc".to_string()),
            ("per_page", per_page.to_string()),
            ("page", "1".to_string()),
            ("sparkline", "false".to_string()),
            ("price_change_percentage", "24h,7d,30d".to_string()),
        ];
        let body = self.get_body("fetch_top_markets", "/coins/markets", &query).await?;
        let rows = parse_markets(&body).map_err(|e| MarketDataError::upstream("fetch_top_markets", e))?;

        debug!(returned = rows.len(), "top markets fetched");
        Ok(rows)
    }

    /// GET /coins/{id}/market_chart.
    #[instrument(skip(self), name = "coingecko::fetch_history")]
    async fn market_chart(&self, asset_id: &str, currency: &str, days: u32) -> MarketDataResult<PriceSeries> {
        let path = format!("/coins/{asset_id}/market_chart");
        let query = [("vs_currency", currency.to_string()), ("days", days.to_string())];
        let body = self.get_body("fetch_history", &path, &query).await?;
        let series =
            parse_market_chart(asset_id, &body).map_err(|e| MarketDataError::upstream("fetch_history", e))?;

        debug!(asset = asset_id, points = series.len(), "price history fetched");
        Ok(series)
    }
}

#[async_trait]
impl MarketDataSource for CoinGeckoClient {
    async fn fetch_snapshot(
        &self,
        currency: &str,
        asset_ids: &[String],
    ) -> MarketDataResult<HashMap<String, AssetSnapshot>> {
        if asset_ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.markets_by_ids(currency, asset_ids).await
    }

    async fn fetch_top_markets(&self, currency: &str, per_page: u32) -> MarketDataResult<Vec<AssetSnapshot>> {
        if per_page == 0 {
            return Err(MarketDataError::InvalidRequest("per_page must be at least 1".to_string()));
        }
        self.top_markets(currency, per_page).await
    }

    async fn fetch_history(&self, asset_id: &str, currency: &str, days: u32) -> MarketDataResult<PriceSeries> {
        if days == 0 {
            return Err(MarketDataError::InvalidRequest(
                "history lookback must be at least one day".to_string(),
            ));
        }
        self.market_chart(asset_id, currency, days).await
    }
}

impl std::fmt::Debug for CoinGeckoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinGeckoClient")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.has_api_key { "<redacted>" } else { "<none>" })
            .finish()
    }
}

// =============================================================================
// Payload parsing
// =============================================================================

/// One element of the `/coins/markets` array. Numeric fields are `null` for
/// thinly traded assets.
#[derive(Debug, Deserialize)]
struct MarketRow {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    symbol: String,
    current_price: Option<f64>,
    market_cap: Option<f64>,
    total_volume: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    price_change_percentage_7d_in_currency: Option<f64>,
    #[serde(default)]
    price_change_percentage_30d_in_currency: Option<f64>,
}

impl From<MarketRow> for AssetSnapshot {
    fn from(row: MarketRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            symbol: row.symbol,
            current_price: row.current_price.filter(|v| v.is_finite()),
            market_cap: row.market_cap.filter(|v| v.is_finite()),
            volume_24h: row.total_volume.filter(|v| v.is_finite()),
            change_24h_pct: row.price_change_percentage_24h.filter(|v| v.is_finite()),
            change_7d_pct: row.price_change_percentage_7d_in_currency.filter(|v| v.is_finite()),
            change_30d_pct: row.price_change_percentage_30d_in_currency.filter(|v| v.is_finite()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MarketChart {
    prices: Vec<(f64, Option<f64>)>,
}

/// Parse a `/coins/markets` body, preserving the provider's order.
pub fn parse_markets(body: &str) -> Result<Vec<AssetSnapshot>, serde_json::Error> {
    let rows: Vec<MarketRow> = serde_json::from_str(body)?;
    Ok(rows.into_iter().map(AssetSnapshot::from).collect())
}

/// Parse a `/coins/{id}/market_chart` body into a price series.
///
/// `prices` is an array of `[epoch_ms, price]` pairs. Pairs with a `null` or
/// non-finite price, or an out-of-range timestamp, are skipped.
pub fn parse_market_chart(asset_id: &str, body: &str) -> Result<PriceSeries, serde_json::Error> {
    let chart: MarketChart = serde_json::from_str(body)?;
    let total = chart.prices.len();

    let points: Vec<PricePoint> = chart
        .prices
        .into_iter()
        .filter_map(|(ms, price)| {
            let price = price.filter(|p| p.is_finite())?;
            if !ms.is_finite() {
                return None;
            }
            let timestamp = DateTime::from_timestamp_millis(ms as i64)?;
            Some(PricePoint::new(timestamp, price))
        })
        .collect();

    if points.len() < total {
        warn!(asset = asset_id, skipped = total - points.len(), "skipped unusable price samples");
    }
    Ok(PriceSeries::from_points(asset_id, points))
}

/// Query strings for a snapshot of `asset_ids`, batched so every id fits on
/// the first page of its request.
fn snapshot_queries(currency: &str, asset_ids: &[String]) -> Vec<Vec<(&'static str, String)>> {
    asset_ids
        .chunks(MAX_PER_PAGE)
        .map(|batch| {
            vec![
                ("vs_currency", currency.to_string()),
                ("ids", batch.join(",")),
                ("order", "market_cap_desc".to_string()),
                ("per_page", batch.len().to_string()),
                ("page", "1".to_string()),
                ("sparkline", "false".to_string()),
                ("price_change_percentage", "24h,7d,30d".to_string()),
            ]
        })
        .collect()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKETS: &str = r#"[
        {
            "id": "bitcoin", "symbol": "btc", "name": "Bitcoin",
            "current_price": 64000.5, "market_cap": 1260000000000, "total_volume": 31000000000,
            "price_change_percentage_24h": -1.25,
            "price_change_percentage_7d_in_currency": 3.5,
            "price_change_percentage_30d_in_currency": 12.0
        },
        {
            "id": "tiny-coin", "symbol": "tiny", "name": "Tiny",
            "current_price": null, "market_cap": null, "total_volume": 0,
            "price_change_percentage_24h": null
        }
    ]"#;

    #[test]
    fn markets_parse_with_nulls() {
        let rows = parse_markets(MARKETS).unwrap();
        assert_eq!(rows.len(), 2);

        let btc = &rows[0];
        assert_eq!(btc.id, "bitcoin");
        assert_eq!(btc.symbol, "btc");
        assert_eq!(btc.current_price, Some(64000.5));
        assert_eq!(btc.change_24h_pct, Some(-1.25));
        assert_eq!(btc.change_7d_pct, Some(3.5));

        let tiny = &rows[1];
        assert_eq!(tiny.current_price, None);
        assert_eq!(tiny.market_cap, None);
        assert_eq!(tiny.volume_24h, Some(0.0));
        assert_eq!(tiny.change_30d_pct, None);
    }

    #[test]
    fn markets_malformed_body_is_an_error() {
        assert!(parse_markets(r#"{"error": "rate limited"}"#).is_err());
        assert!(parse_markets("not json").is_err());
    }

    #[test]
    fn market_chart_parses_and_sorts() {
        let body = r#"{
            "prices": [[1700086400000, 101.0], [1700000000000, 100.0], [1700172800000, null]],
            "market_caps": [], "total_volumes": []
        }"#;
        let series = parse_market_chart("bitcoin", body).unwrap();
        assert_eq!(series.asset_id, "bitcoin");
        assert_eq!(series.prices(), vec![100.0, 101.0]);
        assert_eq!(series.points()[0].timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn market_chart_empty_prices_is_empty_series() {
        let series = parse_market_chart("sui", r#"{"prices": []}"#).unwrap();
        assert!(series.is_empty());
    }

    #[test]
    fn market_chart_missing_prices_is_an_error() {
        assert!(parse_market_chart("sui", r#"{"status": {"error_code": 429}}"#).is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let client = CoinGeckoClient::new(
            DEFAULT_BASE_URL,
            Some("CG-secret".to_string()),
            Duration::from_secs(5),
            Arc::new(RateLimitTracker::default()),
        )
        .unwrap();
        let dbg = format!("{client:?}");
        assert!(dbg.contains("<redacted>"));
        assert!(!dbg.contains("CG-secret"));
    }

    #[tokio::test]
    async fn zero_days_rejected_before_network() {
        let client = CoinGeckoClient::new(
            "http://127.0.0.1:9",
            None,
            Duration::from_secs(1),
            Arc::new(RateLimitTracker::default()),
        )
        .unwrap();
        let err = client.fetch_history("bitcoin", "usd", 0).await.unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidRequest(_)));
        assert_eq!(client.rate_limits().snapshot().requests_total, 0);
    }

    #[tokio::test]
    async fn exhausted_budget_fails_fast() {
        let client = CoinGeckoClient::new(
            "http://127.0.0.1:9",
            None,
            Duration::from_secs(1),
            Arc::new(RateLimitTracker::new(1)),
        )
        .unwrap();
        assert!(client.rate_limits().try_acquire());
        let err = client.fetch_history("bitcoin", "usd", 30).await.unwrap_err();
        assert!(matches!(err, MarketDataError::UpstreamUnavailable { .. }));
    }

    #[test]
    fn snapshot_query_sets_page_size_for_every_batch() {
        let ids: Vec<String> = (0..300).map(|i| format!("coin-{i}")).collect();
        let queries = snapshot_queries("usd", &ids);
        assert_eq!(queries.len(), 2);

        let value = |query: &[(&str, String)], key: &str| {
            query.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone()).unwrap()
        };
        assert_eq!(value(&queries[0], "per_page"), "250");
        assert_eq!(value(&queries[1], "per_page"), "50");
        assert_eq!(value(&queries[1], "ids").split(',').count(), 50);
        assert!(value(&queries[1], "ids").starts_with("coin-250,"));
    }

    #[test]
    fn small_snapshot_is_a_single_request() {
        let ids = vec!["bitcoin".to_string(), "sui".to_string()];
        let queries = snapshot_queries("eur", &ids);
        assert_eq!(queries.len(), 1);
        assert!(queries[0].contains(&("per_page", "2".to_string())));
        assert!(queries[0].contains(&("ids", "bitcoin,sui".to_string())));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
