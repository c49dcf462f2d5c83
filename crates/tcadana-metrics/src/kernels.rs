//! Numeric kernels over contiguous slices.
//!
//! Reductions over large grids are split into fixed-size chunks that run in
//! parallel; chunk results are combined in index order, so the result depends
//! only on the input and the chunk size, never on thread scheduling.

use rayon::prelude::*;

use crate::error::{ComputationError, Result};

/// Fail on the first NaN/Inf in `values`.
pub fn require_finite(values: &[f64], what: &str) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(ComputationError::NonFinite(format!("{} sample {}", what, i))),
        None => Ok(()),
    }
}

/// Check that `x` strictly increases, ignoring steps below `tolerance`
/// relative to the largest magnitude in the sweep.
pub fn require_increasing(x: &[f64], tolerance: f64) -> Result<()> {
    let scale = x.iter().fold(0.0f64, |m, v| m.max(v.abs())).max(f64::MIN_POSITIVE);
    for (i, w) in x.windows(2).enumerate() {
        if w[1] - w[0] <= tolerance * scale {
            return Err(ComputationError::NonMonotonic(format!(
                "bias {} at sample {} does not exceed {}",
                w[1],
                i + 1,
                w[0]
            )));
        }
    }
    Ok(())
}

/// Linear interpolation of `y(x)` at `at` on strictly increasing `x`.
///
/// Returns `None` outside `[x[0], x[n-1]]`.
pub fn interpolate(x: &[f64], y: &[f64], at: f64) -> Option<f64> {
    let n = x.len().min(y.len());
    if n == 0 || at < x[0] || at > x[n - 1] {
        return None;
    }
    // First index with x > at; the bracketing interval is [hi - 1, hi].
    let hi = x[..n].partition_point(|&v| v <= at);
    if hi == n {
        return Some(y[n - 1]);
    }
    if hi == 0 {
        return Some(y[0]);
    }
    let (x0, x1) = (x[hi - 1], x[hi]);
    let alpha = (at - x0) / (x1 - x0);
    Some(y[hi - 1] + alpha * (y[hi] - y[hi - 1]))
}

/// Bias at which `y` first reaches `threshold`, interpolating in `log10(y)`.
///
/// `Ok(None)` when `y` never reaches the threshold. Falls back to linear
/// interpolation when the lower bracket is not positive.
pub fn first_crossing_log(x: &[f64], y: &[f64], threshold: f64) -> Result<Option<f64>> {
    let Some(k) = y.iter().position(|&v| v >= threshold) else {
        return Ok(None);
    };
    if k == 0 {
        return Err(ComputationError::NoCrossing(format!(
            "{} already at or above the threshold at the first sample",
            y[0]
        )));
    }
    let (x0, x1, y0, y1) = (x[k - 1], x[k], y[k - 1], y[k]);
    let alpha = if y0 > 0.0 && y1 > 0.0 {
        (threshold.log10() - y0.log10()) / (y1.log10() - y0.log10())
    } else {
        (threshold - y0) / (y1 - y0)
    };
    Ok(Some(x0 + alpha * (x1 - x0)))
}

/// Centered moving average; `window <= 1` returns the input unchanged.
///
/// The window shrinks at the ends so the output has the input's length.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || values.len() < 2 {
        return values.to_vec();
    }
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            values[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect()
}

/// Least-squares line `y = a + b x`; returns `(a, b)`.
pub fn linear_fit(x: &[f64], y: &[f64]) -> Result<(f64, f64)> {
    let n = x.len().min(y.len());
    if n < 2 {
        return Err(ComputationError::InsufficientData(format!(
            "{} points for a line fit",
            n
        )));
    }
    let nf = n as f64;
    let mean_x = x[..n].iter().sum::<f64>() / nf;
    let mean_y = y[..n].iter().sum::<f64>() / nf;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        sxx += dx * dx;
        sxy += dx * (y[i] - mean_y);
    }
    if sxx == 0.0 {
        return Err(ComputationError::InsufficientData(
            "all fit points share one bias".to_string(),
        ));
    }
    let b = sxy / sxx;
    Ok((mean_y - b * mean_x, b))
}

/// Trapezoidal integral of `y(x)`, chunked over segments.
pub fn trapezoid(x: &[f64], y: &[f64], chunk_size: usize) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let segments = n - 1;
    let chunk = chunk_size.max(1);
    let partials: Vec<f64> = (0..segments.div_ceil(chunk))
        .into_par_iter()
        .map(|c| {
            let start = c * chunk;
            let end = (start + chunk).min(segments);
            let mut sum = 0.0;
            for i in start..end {
                sum += 0.5 * (x[i + 1] - x[i]) * (y[i] + y[i + 1]);
            }
            sum
        })
        .collect();
    partials.iter().sum()
}

/// Index and value of the largest `|v|`; ties resolve to the lowest index.
pub fn max_abs(values: &[f64], chunk_size: usize) -> Option<(usize, f64)> {
    if values.is_empty() {
        return None;
    }
    let chunk = chunk_size.max(1);
    let partials: Vec<(usize, f64)> = values
        .par_chunks(chunk)
        .enumerate()
        .map(|(c, part)| {
            let mut best = (c * chunk, part[0].abs());
            for (j, v) in part.iter().enumerate().skip(1) {
                if v.abs() > best.1 {
                    best = (c * chunk + j, v.abs());
                }
            }
            best
        })
        .collect();
    partials
        .into_iter()
        .reduce(|best, p| if p.1 > best.1 { p } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_interpolate() {
        let x = [0.0, 1.0, 2.0, 4.0];
        let y = [0.0, 10.0, 20.0, 0.0];
        assert_eq!(interpolate(&x, &y, 0.5), Some(5.0));
        assert_eq!(interpolate(&x, &y, 3.0), Some(10.0));
        assert_eq!(interpolate(&x, &y, 4.0), Some(0.0));
        assert_eq!(interpolate(&x, &y, 0.0), Some(0.0));
        assert_eq!(interpolate(&x, &y, 4.5), None);
        assert_eq!(interpolate(&x, &y, -0.1), None);
    }

    #[test]
    fn test_log_crossing() {
        let x = [0.0, 100.0, 200.0];
        let y = [1e-9, 1e-8, 1e-6];
        // Halfway in log space between 1e-8 and 1e-6.
        let v = first_crossing_log(&x, &y, 1e-7).unwrap().unwrap();
        assert!((v - 150.0).abs() < 1e-9);
        assert_eq!(first_crossing_log(&x, &y, 1e-3).unwrap(), None);
        assert!(first_crossing_log(&x, &y, 1e-10).is_err());
    }

    #[test]
    fn test_monotonic() {
        assert!(require_increasing(&[0.0, 1.0, 2.0], 1e-12).is_ok());
        assert!(matches!(
            require_increasing(&[0.0, 2.0, 1.0], 1e-12),
            Err(ComputationError::NonMonotonic(_))
        ));
        assert!(require_increasing(&[0.0, 1.0, 1.0], 1e-12).is_err());
    }

    #[test]
    fn test_linear_fit() {
        let (a, b) = linear_fit(&[0.0, 1.0, 2.0], &[1.0, 3.0, 5.0]).unwrap();
        assert!((a - 1.0).abs() < 1e-12);
        assert!((b - 2.0).abs() < 1e-12);
        assert!(linear_fit(&[1.0, 1.0], &[0.0, 1.0]).is_err());
    }

    #[test]
    fn test_moving_average() {
        assert_eq!(moving_average(&[1.0, 2.0, 3.0], 1), vec![1.0, 2.0, 3.0]);
        assert_eq!(moving_average(&[0.0, 3.0, 0.0], 3), vec![1.5, 1.0, 1.5]);
    }

    #[test]
    fn test_max_abs_tie_lowest_index() {
        let values = [1.0, -5.0, 5.0, 2.0];
        assert_eq!(max_abs(&values, 1), Some((1, 5.0)));
        assert_eq!(max_abs(&values, 3), Some((1, 5.0)));
        assert_eq!(max_abs(&[], 4), None);
    }

    #[test]
    fn test_trapezoid() {
        let x: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();
        assert!((trapezoid(&x, &y, 7) - 1.0).abs() < 1e-12);
        assert_eq!(trapezoid(&[1.0], &[1.0], 4), 0.0);
    }

    proptest! {
        #[test]
        fn prop_trapezoid_deterministic(values in prop::collection::vec(-1e6f64..1e6, 2..500), chunk in 1usize..64) {
            let x: Vec<f64> = (0..values.len()).map(|i| i as f64 * 0.5).collect();
            let a = trapezoid(&x, &values, chunk);
            let b = trapezoid(&x, &values, chunk);
            prop_assert_eq!(a.to_bits(), b.to_bits());
        }

        #[test]
        fn prop_interpolate_hits_samples(values in prop::collection::vec(-1e3f64..1e3, 2..100)) {
            let x: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
            for (i, &v) in values.iter().enumerate() {
                prop_assert_eq!(interpolate(&x, &values, i as f64), Some(v));
            }
        }

        #[test]
        fn prop_max_abs_independent_of_chunking(values in prop::collection::vec(-1e3f64..1e3, 1..300), chunk in 1usize..50) {
            prop_assert_eq!(max_abs(&values, chunk), max_abs(&values, values.len()));
        }
    }
}
