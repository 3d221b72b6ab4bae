// =============================================================================
// Relative Strength Index (RSI) — simple rolling-mean variant
// =============================================================================
//
// RSI measures the speed and magnitude of recent price changes to evaluate
// whether an asset is overbought or oversold.
//
// Step 1 — delta_i = close_i - close_{i-1}            (undefined at i = 0)
// Step 2 — gain_i  = max(delta_i, 0), loss_i = max(-delta_i, 0)
// Step 3 — avg_gain / avg_loss = simple mean of the trailing `period` gains /
//          losses. This is NOT Wilder's smoothing: each window is an equal-
//          weight average, so the reading only depends on the last `period`
//          moves.
// Step 4 — RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
//
// The first `period` outputs are unavailable (the window needs `period`
// deltas, and there is no delta at index 0).
//
// Thresholds:  RSI > 70 => overbought,  RSI < 30 => oversold.
// =============================================================================

use crate::indicators::sma::rolling_mean;
use crate::types::{IndicatorSeries, IndicatorValue, PriceSeries};

/// Default look-back used by the dashboard.
pub const DEFAULT_RSI_PERIOD: usize = 14;

/// Compute the RSI series for `closes`, index-aligned with the input.
///
/// # Edge cases
/// - `period == 0` or `closes.len() <= period` => every index unavailable.
/// - Average loss of zero with a positive average gain => exactly 100.0.
/// - Average loss and average gain both zero (flat window) => unavailable,
///   since RS is 0/0.
/// - A non-finite close poisons every window that contains one of its deltas.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<IndicatorValue> {
    if period == 0 || closes.len() <= period {
        return vec![IndicatorValue::Unavailable; closes.len()];
    }

    // --- Deltas, gains and losses (index 0 has no predecessor) ---------------
    let mut gains = Vec::with_capacity(closes.len());
    let mut losses = Vec::with_capacity(closes.len());
    gains.push(None);
    losses.push(None);
    for w in closes.windows(2) {
        let delta = w[1] - w[0];
        if delta.is_finite() {
            gains.push(Some(delta.max(0.0)));
            losses.push(Some((-delta).max(0.0)));
        } else {
            gains.push(None);
            losses.push(None);
        }
    }

    // --- Rolling means and RS ------------------------------------------------
    let avg_gains = rolling_mean(&gains, period);
    let avg_losses = rolling_mean(&losses, period);

    avg_gains
        .into_iter()
        .zip(avg_losses)
        .map(|(g, l)| match (g, l) {
            (Some(avg_gain), Some(avg_loss)) => rsi_from_averages(avg_gain, avg_loss),
            _ => IndicatorValue::Unavailable,
        })
        .collect()
}

/// RSI of a price series, named `rsi{period}`.
pub fn rsi_series(series: &PriceSeries, period: usize) -> IndicatorSeries {
    IndicatorSeries::aligned(
        format!("rsi{period}"),
        series,
        calculate_rsi(&series.prices(), period),
    )
}

// =============================================================================
// Internal helpers
// =============================================================================

/// Convert average gain / average loss into an RSI value in [0, 100].
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> IndicatorValue {
    if avg_loss == 0.0 {
        if avg_gain > 0.0 {
            return IndicatorValue::Defined(100.0);
        }
        return IndicatorValue::Unavailable;
    }
    let rs = avg_gain / avg_loss;
    IndicatorValue::from_f64(100.0 - 100.0 / (1.0 + rs))
}
