// =============================================================================
// Simple Moving Average & Rolling Window Statistics
// =============================================================================
//
// Trailing-window helpers shared by RSI and Bollinger Bands. Every output is
// index-aligned with its input: position `i` summarises `input[i+1-window..=i]`
// and is `None` until `window` samples exist or when any sample in the window
// is missing.
//
// Each window is recomputed from scratch rather than maintained as a running
// sum, so a window of exact zeros always averages to exactly zero.
// =============================================================================

/// Trailing arithmetic mean over `window` samples.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| Some(w.iter().sum::<f64>() / w.len() as f64))
}

/// Trailing sample standard deviation (`n - 1` denominator) over `window`
/// samples. A window of one sample has no sample deviation and yields `None`.
pub fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| {
        if w.len() < 2 {
            return None;
        }
        let n = w.len() as f64;
        let mean = w.iter().sum::<f64>() / n;
        let sum_sq = w.iter().map(|x| (x - mean).powi(2)).sum::<f64>();
        Some((sum_sq / (n - 1.0)).sqrt())
    })
}

fn rolling<F>(values: &[Option<f64>], window: usize, stat: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }

    let mut buf = Vec::with_capacity(window);
    for end in (window - 1)..values.len() {
        buf.clear();
        let complete = values[end + 1 - window..=end].iter().all(|v| match v {
            Some(x) if x.is_finite() => {
                buf.push(*x);
                true
            }
            _ => false,
        });
        if complete {
            out[end] = stat(&buf).filter(|v| v.is_finite());
        }
    }
    out
}

/// Lift a raw price column into the `Option` form the rolling helpers take.
pub fn finite_samples(closes: &[f64]) -> Vec<Option<f64>> {
    closes
        .iter()
        .map(|&c| if c.is_finite() { Some(c) } else { None })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_mean_warm_up_is_none() {
        let mean = rolling_mean(&finite_samples(&[1.0, 2.0, 3.0, 4.0]), 3);
        assert_eq!(mean, vec![None, None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn rolling_mean_shorter_than_window() {
        assert_eq!(rolling_mean(&finite_samples(&[1.0, 2.0]), 5), vec![None, None]);
    }

    #[test]
    fn rolling_window_zero() {
        assert_eq!(rolling_mean(&[Some(1.0)], 0), vec![None]);
    }

    #[test]
    fn non_finite_close_breaks_window() {
        let mean = rolling_mean(&finite_samples(&[1.0, f64::NAN, 3.0, 5.0]), 2);
        assert_eq!(mean, vec![None, None, None, Some(4.0)]);
    }

    #[test]
    fn rolling_mean_skips_windows_with_gaps() {
        let values = [Some(1.0), None, Some(3.0), Some(5.0), Some(7.0)];
        let mean = rolling_mean(&values, 2);
        assert_eq!(mean, vec![None, None, None, Some(4.0), Some(6.0)]);
    }

    #[test]
    fn rolling_std_uses_sample_denominator() {
        // Sample std of [2, 4, 4, 4, 5, 5, 7, 9] = sqrt(32 / 7).
        let values = finite_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let std = rolling_std(&values, 8);
        let expected = (32.0_f64 / 7.0).sqrt();
        assert!((std[7].unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn rolling_std_window_one_is_none() {
        let std = rolling_std(&[Some(1.0), Some(2.0)], 1);
        assert_eq!(std, vec![None, None]);
    }

    #[test]
    fn rolling_mean_of_zeros_is_exactly_zero() {
        let values = vec![Some(0.0); 20];
        assert!(rolling_mean(&values, 14)
            .iter()
            .skip(13)
            .all(|v| *v == Some(0.0)));
    }
}
