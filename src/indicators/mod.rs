// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators shown on the
// dashboard. Every output is index-aligned with its input price column and
// uses `IndicatorValue::Unavailable` for warm-up or numerically undefined
// positions, so callers can never compare against a NaN by accident.

pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;

use serde::{Deserialize, Serialize};

use crate::types::{IndicatorSeries, PriceSeries};

pub use bollinger::BollingerBands;
pub use macd::MacdSeries;

fn default_rsi_period() -> usize {
    rsi::DEFAULT_RSI_PERIOD
}

fn default_ema_fast() -> usize {
    9
}

fn default_ema_slow() -> usize {
    26
}

fn default_macd_fast() -> usize {
    macd::DEFAULT_FAST
}

fn default_macd_slow() -> usize {
    macd::DEFAULT_SLOW
}

fn default_macd_signal() -> usize {
    macd::DEFAULT_SIGNAL
}

fn default_bollinger_window() -> usize {
    bollinger::DEFAULT_WINDOW
}

fn default_bollinger_std() -> f64 {
    bollinger::DEFAULT_NUM_STD
}

/// Look-back settings for one indicator pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParams {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,

    /// Short EMA used for the trend classification.
    #[serde(default = "default_ema_fast")]
    pub ema_fast: usize,

    /// Long EMA used for the trend classification.
    #[serde(default = "default_ema_slow")]
    pub ema_slow: usize,

    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,

    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,

    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,

    #[serde(default = "default_bollinger_window")]
    pub bollinger_window: usize,

    #[serde(default = "default_bollinger_std")]
    pub bollinger_std: f64,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            ema_fast: default_ema_fast(),
            ema_slow: default_ema_slow(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
            bollinger_window: default_bollinger_window(),
            bollinger_std: default_bollinger_std(),
        }
    }
}

/// Every indicator series computed from one price series.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSet {
    pub rsi: IndicatorSeries,
    pub ema_fast: IndicatorSeries,
    pub ema_slow: IndicatorSeries,
    pub macd: MacdSeries,
    pub bollinger: BollingerBands,
}

impl IndicatorSet {
    /// Run the full indicator pass. Never fails: a short or empty series just
    /// produces unavailable readings.
    pub fn compute(series: &PriceSeries, params: &IndicatorParams) -> Self {
        Self {
            rsi: rsi::rsi_series(series, params.rsi_period),
            ema_fast: ema::ema_series(series, params.ema_fast),
            ema_slow: ema::ema_series(series, params.ema_slow),
            macd: macd::macd_series(series, params.macd_fast, params.macd_slow, params.macd_signal),
            bollinger: bollinger::bollinger_series(
                series,
                params.bollinger_window,
                params.bollinger_std,
            ),
        }
    }
}
