// =============================================================================
// Snapshot Assembler — one summary row per tracked asset
// =============================================================================
//
// Joins the current `AssetSnapshot` of each asset with the latest defined
// reading of every indicator computed from its price history, and derives
// the trend, momentum and MACD-bias labels shown in the dashboard table.
//
// An asset absent from the snapshot is dropped (with a warning) rather than
// given a fabricated row. An asset with no usable history still gets a row;
// its indicator readings are simply unavailable.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::MarketDataError;
use crate::indicators::{IndicatorParams, IndicatorSet};
use crate::types::{AssetSnapshot, IndicatorValue, PriceSeries};

/// RSI above this is overbought.
pub const RSI_OVERBOUGHT: f64 = 70.0;
/// RSI below this is oversold.
pub const RSI_OVERSOLD: f64 = 30.0;

// -----------------------------------------------------------------------------
// Classifications
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Unavailable,
}

impl Trend {
    /// `Bullish` when `fast > slow`, otherwise `Bearish`.
    pub fn classify(fast: IndicatorValue, slow: IndicatorValue) -> Self {
        match (fast.value(), slow.value()) {
            (Some(f), Some(s)) if f > s => Self::Bullish,
            (Some(_), Some(_)) => Self::Bearish,
            _ => Self::Unavailable,
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Momentum {
    Overbought,
    Oversold,
    Neutral,
    Unavailable,
}

impl Momentum {
    pub fn classify(rsi: IndicatorValue) -> Self {
        match rsi.value() {
            Some(v) if v > RSI_OVERBOUGHT => Self::Overbought,
            Some(v) if v < RSI_OVERSOLD => Self::Oversold,
            Some(_) => Self::Neutral,
            None => Self::Unavailable,
        }
    }
}

impl std::fmt::Display for Momentum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overbought => write!(f, "overbought"),
            Self::Oversold => write!(f, "oversold"),
            Self::Neutral => write!(f, "neutral"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

// -----------------------------------------------------------------------------
// Per-asset analysis and summary row
// -----------------------------------------------------------------------------

/// Price history and the indicators computed from it for one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetAnalysis {
    pub asset_id: String,
    pub series: PriceSeries,
    pub indicators: IndicatorSet,
}

impl AssetAnalysis {
    pub fn compute(series: PriceSeries, params: &IndicatorParams) -> Self {
        let indicators = IndicatorSet::compute(&series, params);
        Self {
            asset_id: series.asset_id.clone(),
            series,
            indicators,
        }
    }
}

/// One row of the dashboard table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSummaryRow {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub change_24h_pct: Option<f64>,
    pub change_7d_pct: Option<f64>,
    pub change_30d_pct: Option<f64>,

    /// Number of samples the indicators were computed from.
    pub history_points: usize,

    pub rsi: IndicatorValue,
    pub ema_fast: IndicatorValue,
    pub ema_slow: IndicatorValue,
    pub macd: IndicatorValue,
    pub macd_signal: IndicatorValue,
    pub macd_histogram: IndicatorValue,
    pub bb_middle: IndicatorValue,
    pub bb_upper: IndicatorValue,
    pub bb_lower: IndicatorValue,
    /// Latest Bollinger standard deviation.
    pub volatility: IndicatorValue,

    pub trend: Trend,
    pub momentum: Momentum,
    pub macd_bias: Trend,
}

/// Build the row for one asset.
pub fn assemble_row(snapshot: &AssetSnapshot, analysis: &AssetAnalysis) -> AssetSummaryRow {
    let ind = &analysis.indicators;

    let rsi = ind.rsi.latest();
    let ema_fast = ind.ema_fast.latest();
    let ema_slow = ind.ema_slow.latest();
    let macd = ind.macd.macd.latest();
    let macd_signal = ind.macd.signal.latest();

    AssetSummaryRow {
        id: snapshot.id.clone(),
        name: snapshot.name.clone(),
        symbol: snapshot.symbol.to_uppercase(),
        current_price: snapshot.current_price,
        market_cap: snapshot.market_cap,
        volume_24h: snapshot.volume_24h,
        change_24h_pct: snapshot.change_24h_pct,
        change_7d_pct: snapshot.change_7d_pct,
        change_30d_pct: snapshot.change_30d_pct,
        history_points: analysis.series.len(),
        rsi,
        ema_fast,
        ema_slow,
        macd,
        macd_signal,
        macd_histogram: ind.macd.histogram.latest(),
        bb_middle: ind.bollinger.middle.latest(),
        bb_upper: ind.bollinger.upper.latest(),
        bb_lower: ind.bollinger.lower.latest(),
        volatility: ind.bollinger.std_dev.latest(),
        trend: Trend::classify(ema_fast, ema_slow),
        momentum: Momentum::classify(rsi),
        macd_bias: Trend::classify(macd, macd_signal),
    }
}

/// Assemble rows for `tracked`, in that order.
///
/// Returns the rows and the ids dropped because the snapshot had no entry for
/// them. A tracked asset with no analysis is treated as having empty history.
pub fn assemble_rows(
    tracked: &[String],
    snapshots: &HashMap<String, AssetSnapshot>,
    analyses: &HashMap<String, AssetAnalysis>,
    params: &IndicatorParams,
) -> (Vec<AssetSummaryRow>, Vec<String>) {
    let mut rows = Vec::with_capacity(tracked.len());
    let mut missing = Vec::new();

    for id in tracked {
        let Some(snapshot) = snapshots.get(id) else {
            let err = MarketDataError::MissingAsset(id.clone());
            warn!(asset = %id, error = %err, "dropping row");
            missing.push(id.clone());
            continue;
        };

        match analyses.get(id) {
            Some(analysis) => rows.push(assemble_row(snapshot, analysis)),
            None => {
                let empty = AssetAnalysis::compute(PriceSeries::empty(id.as_str()), params);
                rows.push(assemble_row(snapshot, &empty));
            }
        }
    }

    (rows, missing)
}
