// =============================================================================
// Market Data Module
// =============================================================================
//
// Everything that talks to the outside world for prices:
//
//   1. `coingecko`  — REST client for current snapshots and daily history
//   2. `cached`     — TTL + single-flight decorator over any source
//   3. `rate_limit` — request budget tracking against the provider's limits
//   4. `cbbi`       — companion fetcher for the CBBI confidence index
//
// The `MarketDataSource` trait is the seam the refresh pipeline depends on, so
// tests and the cache decorator can stand in for the real provider.

pub mod cache;
pub mod cached;
pub mod cbbi;
pub mod coingecko;
pub mod rate_limit;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::MarketDataResult;
use crate::types::{AssetSnapshot, PriceSeries};

pub use cached::{CachePolicy, CachedMarketData};
pub use coingecko::CoinGeckoClient;
pub use rate_limit::{RateLimitSnapshot, RateLimitTracker};

/// A provider of current snapshots and historical daily prices.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Current snapshot for each of `asset_ids` the provider knows about.
    /// Unknown ids are simply absent from the map.
    async fn fetch_snapshot(
        &self,
        currency: &str,
        asset_ids: &[String],
    ) -> MarketDataResult<HashMap<String, AssetSnapshot>>;

    /// The top `per_page` assets by market capitalisation, largest first.
    async fn fetch_top_markets(
        &self,
        currency: &str,
        per_page: u32,
    ) -> MarketDataResult<Vec<AssetSnapshot>>;

    /// Daily price history for one asset covering the last `days` days.
    async fn fetch_history(
        &self,
        asset_id: &str,
        currency: &str,
        days: u32,
    ) -> MarketDataResult<PriceSeries>;
}
