// =============================================================================
// MACD — Moving Average Convergence Divergence
// =============================================================================
//
//   MACD      = EMA(close, 12) - EMA(close, 26)
//   Signal    = EMA(MACD, 9)     (reseeded at MACD's first value)
//   Histogram = MACD - Signal
//
// Because the EMA has no warm-up gap, all three lines are defined at every
// index of a clean price column.
// =============================================================================

use crate::indicators::ema::{calculate_ema, ema_values};
use crate::types::{IndicatorSeries, IndicatorValue, PriceSeries};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

/// Raw MACD output, index-aligned with the input closes.
#[derive(Debug, Clone, PartialEq)]
pub struct MacdValues {
    pub macd: Vec<IndicatorValue>,
    pub signal: Vec<IndicatorValue>,
    pub histogram: Vec<IndicatorValue>,
}

pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal_span: usize) -> MacdValues {
    let fast_ema = calculate_ema(closes, fast);
    let slow_ema = calculate_ema(closes, slow);

    let macd: Vec<IndicatorValue> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| difference(*f, *s))
        .collect();

    let signal = ema_values(macd.iter().copied(), signal_span);

    let histogram = macd
        .iter()
        .zip(&signal)
        .map(|(m, s)| difference(*m, *s))
        .collect();

    MacdValues {
        macd,
        signal,
        histogram,
    }
}

fn difference(a: IndicatorValue, b: IndicatorValue) -> IndicatorValue {
    match (a, b) {
        (IndicatorValue::Defined(a), IndicatorValue::Defined(b)) => IndicatorValue::from_f64(a - b),
        _ => IndicatorValue::Unavailable,
    }
}

/// MACD lines of a price series as named indicator series.
#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub macd: IndicatorSeries,
    pub signal: IndicatorSeries,
    pub histogram: IndicatorSeries,
}

pub fn macd_series(series: &PriceSeries, fast: usize, slow: usize, signal_span: usize) -> MacdSeries {
    let values = calculate_macd(&series.prices(), fast, slow, signal_span);
    MacdSeries {
        macd: IndicatorSeries::aligned("macd", series, values.macd),
        signal: IndicatorSeries::aligned("signal", series, values.signal),
        histogram: IndicatorSeries::aligned("histogram", series, values.histogram),
    }
}
