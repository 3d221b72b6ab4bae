// =============================================================================
// Shared types used across the coin-pulse dashboard
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Refresh profile
// -----------------------------------------------------------------------------

/// Polling cadence the dashboard runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshProfile {
    /// Page-style refresh: long-lived history cache.
    Standard,
    /// Live ticker: everything refreshed every 45 seconds.
    Live,
}

impl Default for RefreshProfile {
    fn default() -> Self {
        Self::Standard
    }
}

impl std::fmt::Display for RefreshProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Live => write!(f, "live"),
        }
    }
}

// -----------------------------------------------------------------------------
// Price samples
// -----------------------------------------------------------------------------

/// A single time-stamped price sample from the upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, price }
    }
}

/// Ordered price history for one asset.
///
/// Timestamps are non-decreasing and unique: [`PriceSeries::from_points`]
/// sorts its input and keeps the last sample seen for a duplicated timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub asset_id: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// An empty series, used when the provider returned nothing usable.
    pub fn empty(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            points: Vec::new(),
        }
    }

    /// Build a series from raw samples in any order.
    pub fn from_points(asset_id: impl Into<String>, mut raw: Vec<PricePoint>) -> Self {
        // Stable sort keeps arrival order among equal timestamps, so the last
        // one pushed below is the last one received.
        raw.sort_by_key(|p| p.timestamp);

        let mut points: Vec<PricePoint> = Vec::with_capacity(raw.len());
        for point in raw {
            match points.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => points.push(point),
            }
        }

        Self {
            asset_id: asset_id.into(),
            points,
        }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    /// Price column, index-aligned with [`PriceSeries::points`].
    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }
}

// -----------------------------------------------------------------------------
// Indicator values
// -----------------------------------------------------------------------------

/// One indicator reading. `Unavailable` covers warm-up indices and any
/// computation that would otherwise yield a non-finite number.
///
/// Serialises as a JSON number or `null`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndicatorValue {
    Defined(f64),
    #[default]
    Unavailable,
}

impl IndicatorValue {
    /// Wrap `value`, demoting NaN and infinities to `Unavailable`.
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            Self::Defined(value)
        } else {
            Self::Unavailable
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Self::Defined(v) => Some(v),
            Self::Unavailable => None,
        }
    }

    pub fn is_defined(self) -> bool {
        matches!(self, Self::Defined(_))
    }
}

impl From<Option<f64>> for IndicatorValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Unavailable, Self::from_f64)
    }
}

impl std::fmt::Display for IndicatorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Defined(v) => write!(f, "{v:.2}"),
            Self::Unavailable => write!(f, "n/a"),
        }
    }
}

/// A single point of an indicator series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    pub timestamp: DateTime<Utc>,
    pub value: IndicatorValue,
}

/// Indicator output aligned 1:1 with the price series it was computed from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSeries {
    pub name: String,
    pub points: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    /// Zip `values` with the timestamps of `source`.
    ///
    /// Both sides come from the same price column so their lengths match; a
    /// shorter `values` only happens for an empty source.
    pub fn aligned(name: impl Into<String>, source: &PriceSeries, values: Vec<IndicatorValue>) -> Self {
        debug_assert_eq!(source.len(), values.len());
        let points = source
            .points()
            .iter()
            .zip(values)
            .map(|(p, value)| IndicatorPoint {
                timestamp: p.timestamp,
                value,
            })
            .collect();
        Self {
            name: name.into(),
            points,
        }
    }

    /// Most recent defined reading, or `Unavailable` when there is none.
    pub fn latest(&self) -> IndicatorValue {
        self.points
            .iter()
            .rev()
            .map(|p| p.value)
            .find(|v| v.is_defined())
            .unwrap_or(IndicatorValue::Unavailable)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// -----------------------------------------------------------------------------
// Market snapshot
// -----------------------------------------------------------------------------

/// Current-state fields for one asset, refreshed on every poll.
///
/// Numeric fields are optional because the provider reports `null` for
/// assets it has no recent trades for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub change_24h_pct: Option<f64>,
    #[serde(default)]
    pub change_7d_pct: Option<f64>,
    #[serde(default)]
    pub change_30d_pct: Option<f64>,
}
