// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ), all over the same trailing window. σ is the
// sample standard deviation of that window.
//
// The dashboard also reports σ itself as the asset's "volatility" reading.

use crate::indicators::sma::{finite_samples, rolling_mean, rolling_std};
use crate::types::{IndicatorSeries, IndicatorValue, PriceSeries};

pub const DEFAULT_WINDOW: usize = 20;
pub const DEFAULT_NUM_STD: f64 = 2.0;

/// Raw band values, index-aligned with the input closes.
#[derive(Debug, Clone, PartialEq)]
pub struct BollingerValues {
    pub middle: Vec<IndicatorValue>,
    pub upper: Vec<IndicatorValue>,
    pub lower: Vec<IndicatorValue>,
    pub std_dev: Vec<IndicatorValue>,
}

/// Calculate Bollinger Bands for every index of `closes`.
///
/// The first `window - 1` indices are unavailable. With `window == 1` the
/// middle band is the close itself but σ, and therefore both outer bands, is
/// unavailable.
pub fn calculate_bollinger(closes: &[f64], window: usize, num_std: f64) -> BollingerValues {
    let samples = finite_samples(closes);
    let means = rolling_mean(&samples, window);
    let stds = rolling_std(&samples, window);

    let mut values = BollingerValues {
        middle: Vec::with_capacity(closes.len()),
        upper: Vec::with_capacity(closes.len()),
        lower: Vec::with_capacity(closes.len()),
        std_dev: Vec::with_capacity(closes.len()),
    };

    for (mean, std) in means.into_iter().zip(stds) {
        values.middle.push(mean.into());
        values.std_dev.push(std.into());
        match (mean, std) {
            (Some(m), Some(s)) => {
                values.upper.push(IndicatorValue::from_f64(m + num_std * s));
                values.lower.push(IndicatorValue::from_f64(m - num_std * s));
            }
            _ => {
                values.upper.push(IndicatorValue::Unavailable);
                values.lower.push(IndicatorValue::Unavailable);
            }
        }
    }

    values
}

/// Bollinger Bands of a price series as named indicator series.
#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub middle: IndicatorSeries,
    pub upper: IndicatorSeries,
    pub lower: IndicatorSeries,
    pub std_dev: IndicatorSeries,
}

pub fn bollinger_series(series: &PriceSeries, window: usize, num_std: f64) -> BollingerBands {
    let values = calculate_bollinger(&series.prices(), window, num_std);
    BollingerBands {
        middle: IndicatorSeries::aligned("bb_middle", series, values.middle),
        upper: IndicatorSeries::aligned("bb_upper", series, values.upper),
        lower: IndicatorSeries::aligned("bb_lower", series, values.lower),
        std_dev: IndicatorSeries::aligned("bb_std", series, values.std_dev),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0);
        let middle = bb.middle[19].value().unwrap();
        assert!((middle - 10.5).abs() < 1e-10);
        assert!(bb.upper[19].value().unwrap() > middle);
        assert!(bb.lower[19].value().unwrap() < middle);
    }

    #[test]
    fn bollinger_warm_up_unavailable() {
        let closes: Vec<f64> = (1..=25).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0);
        assert!(bb.middle[..19].iter().all(|v| !v.is_defined()));
        assert!(bb.upper[..19].iter().all(|v| !v.is_defined()));
        assert!(bb.middle[19..].iter().all(|v| v.is_defined()));
    }

    #[test]
    fn bollinger_insufficient_data() {
        let bb = calculate_bollinger(&[1.0, 2.0, 3.0], 20, 2.0);
        assert!(bb.middle.iter().all(|v| !v.is_defined()));
        assert!(bb.std_dev.iter().all(|v| !v.is_defined()));
    }

    #[test]
    fn band_width_is_four_sigma() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 50.0 + (i as f64 * 1.3).cos() * 4.0)
            .collect();
        let bb = calculate_bollinger(&closes, 20, 2.0);
        for i in 19..closes.len() {
            let width = bb.upper[i].value().unwrap() - bb.lower[i].value().unwrap();
            let four_sigma = 4.0 * bb.std_dev[i].value().unwrap();
            assert!(
                (width - four_sigma).abs() <= 1e-9 * four_sigma.max(1.0),
                "index {i}: width {width} vs 4σ {four_sigma}"
            );
        }
    }

    #[test]
    fn bollinger_flat_has_zero_width() {
        let bb = calculate_bollinger(&[100.0; 20], 20, 2.0);
        assert_eq!(bb.std_dev[19], IndicatorValue::Defined(0.0));
        assert_eq!(bb.upper[19], bb.lower[19]);
    }

    #[test]
    fn bollinger_window_one_has_no_bands() {
        let bb = calculate_bollinger(&[1.0, 2.0], 1, 2.0);
        assert_eq!(bb.middle[1], IndicatorValue::Defined(2.0));
        assert_eq!(bb.upper[1], IndicatorValue::Unavailable);
    }
}
