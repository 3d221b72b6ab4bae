// =============================================================================
// Cached Market Data — TTL + single-flight decorator
// =============================================================================
//
// Wraps any `MarketDataSource` and memoises each operation by its normalised
// arguments:
//
//   fetch_snapshot     key = currency | sorted, de-duplicated ids
//   fetch_top_markets  key = currency | per_page
//   fetch_history      key = asset id | currency | days
//
// Currency and ids are lower-cased so "USD" and "usd" share one entry.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{MarketDataError, MarketDataResult};
use crate::market_data::cache::{CacheKey, TtlCache};
use crate::market_data::MarketDataSource;
use crate::types::{AssetSnapshot, PriceSeries};

/// Time-to-live per operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CachePolicy {
    pub snapshot_ttl: Duration,
    pub history_ttl: Duration,
}

impl CachePolicy {
    /// Page-refresh cadence: snapshots for 5 minutes, history for an hour.
    pub fn standard() -> Self {
        Self {
            snapshot_ttl: Duration::from_secs(300),
            history_ttl: Duration::from_secs(3600),
        }
    }

    /// Live-ticker cadence: everything expires after 45 seconds.
    pub fn live() -> Self {
        Self {
            snapshot_ttl: Duration::from_secs(45),
            history_ttl: Duration::from_secs(45),
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Caching decorator over an inner source.
pub struct CachedMarketData<S> {
    inner: S,
    policy: CachePolicy,
    snapshots: TtlCache<HashMap<String, AssetSnapshot>>,
    top_markets: TtlCache<Vec<AssetSnapshot>>,
    histories: TtlCache<PriceSeries>,
}

impl<S: MarketDataSource> CachedMarketData<S> {
    pub fn new(inner: S, policy: CachePolicy) -> Self {
        Self {
            inner,
            policy,
            snapshots: TtlCache::new(),
            top_markets: TtlCache::new(),
            histories: TtlCache::new(),
        }
    }

    #[cfg(test)]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Drop expired entries from every operation's cache.
    pub fn purge_expired(&self) -> usize {
        self.snapshots.purge_expired() + self.top_markets.purge_expired() + self.histories.purge_expired()
    }
}

fn normalise_ids(asset_ids: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = asset_ids
        .iter()
        .map(|id| id.trim().to_lowercase())
        .filter(|id| !id.is_empty())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

#[async_trait]
impl<S: MarketDataSource> MarketDataSource for CachedMarketData<S> {
    async fn fetch_snapshot(
        &self,
        currency: &str,
        asset_ids: &[String],
    ) -> MarketDataResult<HashMap<String, AssetSnapshot>> {
        let currency = currency.to_lowercase();
        let ids = normalise_ids(asset_ids);
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let key = CacheKey::new("fetch_snapshot", format!("{currency}|{}", ids.join(",")));
        let inner = &self.inner;
        let (currency, ids) = (&currency, &ids);
        self.snapshots
            .get_or_fetch(key, self.policy.snapshot_ttl, move || {
                inner.fetch_snapshot(currency, ids)
            })
            .await
    }

    async fn fetch_top_markets(
        &self,
        currency: &str,
        per_page: u32,
    ) -> MarketDataResult<Vec<AssetSnapshot>> {
        let currency = currency.to_lowercase();
        let key = CacheKey::new("fetch_top_markets", format!("{currency}|{per_page}"));
        let inner = &self.inner;
        let currency = &currency;
        self.top_markets
            .get_or_fetch(key, self.policy.snapshot_ttl, move || {
                inner.fetch_top_markets(currency, per_page)
            })
            .await
    }

    async fn fetch_history(
        &self,
        asset_id: &str,
        currency: &str,
        days: u32,
    ) -> MarketDataResult<PriceSeries> {
        if days == 0 {
            return Err(MarketDataError::InvalidRequest(
                "history lookback must be at least one day".to_string(),
            ));
        }

        let asset_id = asset_id.trim().to_lowercase();
        let currency = currency.to_lowercase();
        let key = CacheKey::new("fetch_history", format!("{asset_id}|{currency}|{days}"));
        let inner = &self.inner;
        let (asset_id, currency) = (&asset_id, &currency);
        self.histories
            .get_or_fetch(key, self.policy.history_ttl, move || {
                inner.fetch_history(asset_id, currency, days)
            })
            .await
    }
}
