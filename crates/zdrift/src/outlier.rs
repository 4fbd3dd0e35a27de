//! Robust residual screening used between the two least-squares passes.

/// Consistency factor relating MAD to the standard deviation of a normal
/// distribution.
pub(crate) const MAD_NORMAL_SCALE: f64 = 1.4826;

/// Threshold floor when every residual is identical (MAD and standard
/// deviation both zero).
const DEGENERATE_THRESHOLD: f64 = 1e-8;

/// Median of `values`. Averages the two middle elements for even lengths.
pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation of `values` about `center`.
pub(crate) fn mad(values: &[f64], center: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Sample standard deviation (n − 1 denominator). Zero for fewer than two
/// values.
pub(crate) fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// Indices of residuals lying outside the robust threshold.
///
/// The threshold is `deviation_factor × 1.4826 × MAD` about the median
/// residual. When MAD collapses to zero it falls back to
/// `deviation_factor × sample standard deviation`, and to a small fixed
/// floor when that is zero too, so an all-equal residual vector never flags
/// every sample.
pub(crate) fn flag_outliers(residuals: &[f64], deviation_factor: f64) -> Vec<usize> {
    let center = median(residuals);
    let spread = mad(residuals, center);
    let threshold = if spread > 0.0 {
        deviation_factor * MAD_NORMAL_SCALE * spread
    } else {
        let std = sample_std(residuals);
        if std > 0.0 {
            deviation_factor * std
        } else {
            DEGENERATE_THRESHOLD
        }
    };
    residuals
        .iter()
        .enumerate()
        .filter(|(_, r)| (*r - center).abs() > threshold)
        .map(|(i, _)| i)
        .collect()
}
