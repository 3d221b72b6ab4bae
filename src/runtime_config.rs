// =============================================================================
// Runtime Configuration — dashboard settings with atomic save
// =============================================================================
//
// Every tunable of the dashboard lives here: tracked assets, quote currency,
// lookback, indicator windows, refresh profile and cache TTLs, fan-out
// limits, and the API bind address.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// Environment variables override the file after loading; the CoinGecko API
// key is only ever read from the environment and is never written to disk.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::indicators::IndicatorParams;
use crate::market_data::cbbi::CBBI_JSON_URL;
use crate::market_data::coingecko::DEFAULT_BASE_URL;
use crate::market_data::rate_limit::DEFAULT_REQUESTS_PER_MINUTE;
use crate::market_data::CachePolicy;
use crate::refresh::RefreshSettings;
use crate::types::RefreshProfile;

pub const DEFAULT_CONFIG_PATH: &str = "dashboard_config.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_assets() -> Vec<String> {
    vec![
        "bitcoin".to_string(),
        "ethereum".to_string(),
        "solana".to_string(),
        "sui".to_string(),
    ]
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_history_days() -> u32 {
    30
}

fn default_concurrency() -> usize {
    4
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_requests_per_minute() -> u32 {
    DEFAULT_REQUESTS_PER_MINUTE
}

fn default_top_markets() -> u32 {
    10
}

fn default_top_markets_history_days() -> u32 {
    14
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_cbbi_url() -> String {
    CBBI_JSON_URL.to_string()
}

// =============================================================================
// DashboardConfig
// =============================================================================

/// Top-level configuration for the dashboard backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    // --- What to track ------------------------------------------------------

    /// CoinGecko asset ids, e.g. "bitcoin".
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,

    /// Quote currency, e.g. "usd" or "eur".
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Days of daily history fetched per asset.
    #[serde(default = "default_history_days")]
    pub history_days: u32,

    /// Default page size of the top-markets table.
    #[serde(default = "default_top_markets")]
    pub top_markets: u32,

    /// Days of history behind the RSI column of the top-markets table.
    #[serde(default = "default_top_markets_history_days")]
    pub top_markets_history_days: u32,

    #[serde(default)]
    pub indicators: IndicatorParams,

    // --- Refresh cadence ----------------------------------------------------

    #[serde(default)]
    pub profile: RefreshProfile,

    /// Overrides the profile's snapshot TTL.
    #[serde(default)]
    pub snapshot_ttl_secs: Option<u64>,

    /// Overrides the profile's history TTL.
    #[serde(default)]
    pub history_ttl_secs: Option<u64>,

    /// Overrides the profile's refresh interval.
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,

    // --- Upstream -----------------------------------------------------------

    /// Maximum history fetches in flight per cycle.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Self-imposed CoinGecko request budget.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_base_url")]
    pub coingecko_base_url: String,

    /// Demo API key. Environment only.
    #[serde(skip)]
    pub coingecko_api_key: Option<String>,

    #[serde(default = "default_true")]
    pub cbbi_enabled: bool,

    #[serde(default = "default_cbbi_url")]
    pub cbbi_url: String,

    // --- API ----------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            assets: default_assets(),
            currency: default_currency(),
            history_days: default_history_days(),
            top_markets: default_top_markets(),
            top_markets_history_days: default_top_markets_history_days(),
            indicators: IndicatorParams::default(),
            profile: RefreshProfile::Standard,
            snapshot_ttl_secs: None,
            history_ttl_secs: None,
            refresh_interval_secs: None,
            concurrency: default_concurrency(),
            request_timeout_secs: default_request_timeout_secs(),
            requests_per_minute: default_requests_per_minute(),
            coingecko_base_url: default_base_url(),
            coingecko_api_key: None,
            cbbi_enabled: true,
            cbbi_url: default_cbbi_url(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl DashboardConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dashboard config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse dashboard config from {}", path.display()))?;

        info!(
            path = %path.display(),
            assets = ?config.assets,
            profile = %config.profile,
            "dashboard config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write (write to
    /// `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise dashboard config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "dashboard config saved (atomic)");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Environment overrides
    // -------------------------------------------------------------------------

    /// Apply `COIN_PULSE_*` / `COINGECKO_*` variables from the process
    /// environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(list) = lookup("COIN_PULSE_ASSETS") {
            self.assets = list.split(',').map(str::to_string).collect();
        }
        if let Some(currency) = lookup("COIN_PULSE_CURRENCY").filter(|c| !c.trim().is_empty()) {
            self.currency = currency;
        }
        if let Some(addr) = lookup("COIN_PULSE_BIND_ADDR").filter(|a| !a.trim().is_empty()) {
            self.bind_addr = addr.trim().to_string();
        }
        if let Some(url) = lookup("COINGECKO_BASE_URL").filter(|u| !u.trim().is_empty()) {
            self.coingecko_base_url = url.trim().to_string();
        }
        if let Some(key) = lookup("COINGECKO_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.coingecko_api_key = Some(key.trim().to_string());
        }
        self.normalise();
    }

    /// Lower-case and de-duplicate asset ids (keeping first occurrence),
    /// lower-case the currency.
    pub fn normalise(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.assets = self
            .assets
            .iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty() && seen.insert(a.clone()))
            .collect();
        self.currency = self.currency.trim().to_lowercase();
    }

    /// Reject settings no cycle could run with.
    pub fn validate(&self) -> Result<()> {
        if self.currency.is_empty() {
            bail!("currency must not be empty");
        }
        if self.history_days == 0 {
            bail!("history_days must be at least 1");
        }
        if self.top_markets_history_days == 0 {
            bail!("top_markets_history_days must be at least 1");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        if self.assets.is_empty() {
            warn!("no assets configured — the summary table will be empty");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Derived settings
    // -------------------------------------------------------------------------

    pub fn cache_policy(&self) -> CachePolicy {
        let base = match self.profile {
            RefreshProfile::Standard => CachePolicy::standard(),
            RefreshProfile::Live => CachePolicy::live(),
        };
        CachePolicy {
            snapshot_ttl: self.snapshot_ttl_secs.map(Duration::from_secs).unwrap_or(base.snapshot_ttl),
            history_ttl: self.history_ttl_secs.map(Duration::from_secs).unwrap_or(base.history_ttl),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        let base = match self.profile {
            RefreshProfile::Standard => 300,
            RefreshProfile::Live => 45,
        };
        Duration::from_secs(self.refresh_interval_secs.unwrap_or(base).max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            assets: self.assets.clone(),
            currency: self.currency.clone(),
            days: self.history_days,
            params: self.indicators.clone(),
            concurrency: self.concurrency.max(1),
            request_timeout: self.request_timeout(),
        }
    }
}
