// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula (recursive, "adjust = false" form):
//   alpha  = 2 / (span + 1)
//   EMA_0  = x_0
//   EMA_t  = alpha * x_t + (1 - alpha) * EMA_{t-1}
//
// Unlike an SMA-seeded EMA there is no warm-up gap: the output is defined from
// the very first sample.
// =============================================================================

use crate::types::{IndicatorSeries, IndicatorValue, PriceSeries};

/// Run the EMA recursion over a sequence of possibly-unavailable inputs.
///
/// Leading `Unavailable` inputs stay unavailable and the recursion is seeded
/// at the first defined input. Once seeded, an unavailable input breaks the
/// chain: that index and every later one are `Unavailable`.
///
/// `span == 0` yields an all-unavailable output of the same length.
pub fn ema_values<I>(values: I, span: usize) -> Vec<IndicatorValue>
where
    I: IntoIterator<Item = IndicatorValue>,
{
    let values = values.into_iter();
    let mut result = Vec::with_capacity(values.size_hint().0);

    if span == 0 {
        result.extend(values.map(|_| IndicatorValue::Unavailable));
        return result;
    }

    let alpha = 2.0 / (span as f64 + 1.0);
    let mut prev: Option<f64> = None;
    let mut broken = false;

    for value in values {
        if broken {
            result.push(IndicatorValue::Unavailable);
            continue;
        }

        let next = match (value.value(), prev) {
            (Some(x), None) => IndicatorValue::from_f64(x),
            (Some(x), Some(p)) => IndicatorValue::from_f64(alpha * x + (1.0 - alpha) * p),
            (None, None) => IndicatorValue::Unavailable,
            (None, Some(_)) => {
                broken = true;
                IndicatorValue::Unavailable
            }
        };

        match next {
            IndicatorValue::Defined(v) => prev = Some(v),
            IndicatorValue::Unavailable if prev.is_some() => broken = true,
            IndicatorValue::Unavailable => {}
        }

        result.push(next);
    }

    result
}

/// Compute the EMA of a raw price column. Output is index-aligned with
/// `closes`.
pub fn calculate_ema(closes: &[f64], span: usize) -> Vec<IndicatorValue> {
    ema_values(closes.iter().map(|&c| IndicatorValue::from_f64(c)), span)
}

/// EMA of a price series, named `ema{span}`.
pub fn ema_series(series: &PriceSeries, span: usize) -> IndicatorSeries {
    IndicatorSeries::aligned(
        format!("ema{span}"),
        series,
        calculate_ema(&series.prices(), span),
    )
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn defined(values: &[IndicatorValue]) -> Vec<f64> {
        values.iter().map(|v| v.value().unwrap()).collect()
    }

    // ---- calculate_ema ---------------------------------------------------

    #[test]
    fn ema_empty_input() {
        assert!(calculate_ema(&[], 5).is_empty());
    }

    #[test]
    fn ema_span_zero_is_unavailable() {
        let ema = calculate_ema(&[1.0, 2.0, 3.0], 0);
        assert_eq!(ema, vec![IndicatorValue::Unavailable; 3]);
    }

    #[test]
    fn ema_first_value_equals_first_sample() {
        let closes = [42.125, 40.0, 45.5, 39.0];
        for span in [1, 2, 9, 12, 26, 200] {
            let ema = calculate_ema(&closes, span);
            assert_eq!(ema[0], IndicatorValue::Defined(42.125), "span {span}");
        }
    }

    #[test]
    fn ema_defined_at_every_index() {
        let closes: Vec<f64> = (1..=40).map(|x| x as f64).collect();
        let ema = calculate_ema(&closes, 26);
        assert_eq!(ema.len(), closes.len());
        assert!(ema.iter().all(|v| v.is_defined()));
    }

    #[test]
    fn ema_known_values() {
        // span 5 => alpha = 1/3, seeded at the first close.
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let ema = defined(&calculate_ema(&closes, 5));

        let alpha = 2.0 / 6.0;
        let mut expected = closes[0];
        let mut expected_vec = vec![expected];
        for &c in &closes[1..] {
            expected = alpha * c + (1.0 - alpha) * expected;
            expected_vec.push(expected);
        }
        for (a, b) in ema.iter().zip(expected_vec.iter()) {
            assert!((a - b).abs() < 1e-10, "got {a}, expected {b}");
        }
    }

    #[test]
    fn ema_span_one_tracks_input() {
        let closes = [3.0, 1.0, 4.0, 1.0, 5.0];
        assert_eq!(defined(&calculate_ema(&closes, 1)), closes.to_vec());
    }

    #[test]
    fn ema_breaks_after_nan() {
        let closes = [1.0, 2.0, f64::NAN, 4.0];
        let ema = calculate_ema(&closes, 3);
        assert!(ema[0].is_defined());
        assert!(ema[1].is_defined());
        assert_eq!(ema[2], IndicatorValue::Unavailable);
        assert_eq!(ema[3], IndicatorValue::Unavailable);
    }

    #[test]
    fn ema_seeds_after_leading_unavailable() {
        let input = vec![
            IndicatorValue::Unavailable,
            IndicatorValue::Defined(10.0),
            IndicatorValue::Defined(20.0),
        ];
        let ema = ema_values(input, 3);
        assert_eq!(ema[0], IndicatorValue::Unavailable);
        assert_eq!(ema[1], IndicatorValue::Defined(10.0));
        assert_eq!(ema[2], IndicatorValue::Defined(15.0));
    }

    #[test]
    fn ema_fast_above_slow_on_rising_prices() {
        let closes: Vec<f64> = (100..130).map(|x| x as f64).collect();
        let fast = calculate_ema(&closes, 9).last().copied().unwrap();
        let slow = calculate_ema(&closes, 26).last().copied().unwrap();
        assert!(fast.value().unwrap() > slow.value().unwrap());
    }
}
