//! Fit-quality statistics: per-column contribution summaries and the
//! correlation-based confidence band reported with every model.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::design::Column;

/// Correlations at or above this magnitude are treated as a perfect fit and
/// reported with a zero-width band; the Fisher transform diverges there.
const PERFECT_R_CUTOFF: f64 = 0.999999;

// ── Report types ───────────────────────────────────────────────────────────

/// Distribution summary of one column's contribution series
/// (column value × fitted coefficient) over the accepted samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributionSummary {
    /// Contribution of the most recent accepted sample.
    pub last: f64,
    pub mean: f64,
    /// Population standard deviation of the series.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl ContributionSummary {
    pub(crate) fn from_series(series: &[f64]) -> Self {
        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        let var = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let min = series.iter().copied().fold(f64::INFINITY, f64::min);
        let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Self {
            last: *series.last().unwrap_or(&0.0),
            mean,
            std_dev: var.sqrt(),
            min,
            max,
        }
    }
}

/// Statistics snapshot computed alongside every successful fit and persisted
/// inside the model record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitStats {
    /// Labeled observations fed to the fit, before outlier screening.
    pub n_samples: usize,
    /// Observations rejected by the residual screen (0 when no refit ran).
    pub n_outliers: usize,
    /// Indices of rejected observations within the labeled ordering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outlier_indices: Vec<usize>,
    /// Squared Pearson correlation between predicted and actual outcomes
    /// over the accepted samples. 0 when the correlation is degenerate.
    pub r_squared: f64,
    /// Half-width of the 95% confidence band on `r_squared` (Fisher
    /// z-transform). 0 for perfect or degenerate fits.
    pub error: f64,
    /// Per-column contribution summaries, keyed by canonical column name.
    pub contributions: BTreeMap<String, ContributionSummary>,
}

// ── Computation ────────────────────────────────────────────────────────────

/// Pearson correlation coefficient. NaN when either series has zero
/// variance; callers sanitize before persisting.
pub(crate) fn pearson(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    let denom = (var_x * var_y).sqrt();
    if denom <= 0.0 {
        return f64::NAN;
    }
    cov / denom
}

/// Half-width of the 95% confidence band on r² via the Fisher z-transform:
/// `z = atanh(r)`, `se = 1/sqrt(n − 3)`, `z ± 1.96·se` mapped back through
/// `tanh` and squared.
///
/// Returns 0 for `|r| ≥ 0.999999`, a non-finite `r`, or `n ≤ 3`, where the
/// transform degenerates; the reported band is never NaN.
pub(crate) fn error_band(r: f64, n_accepted: usize) -> f64 {
    if !(r.abs() < PERFECT_R_CUTOFF) {
        return 0.0;
    }
    if n_accepted <= 3 {
        return 0.0;
    }
    let z = r.atanh();
    let se = 1.0 / ((n_accepted - 3) as f64).sqrt();
    let lo = (z - 1.96 * se).tanh();
    let hi = (z + 1.96 * se).tanh();
    (hi * hi - lo * lo).abs() / 2.0
}

/// Assemble the statistics snapshot for an accepted fit.
///
/// `design` and `targets` hold only the accepted (post-screening) rows;
/// `n_samples` is the pre-screening labeled count.
pub(crate) fn fit_statistics(
    design: &DMatrix<f64>,
    targets: &DVector<f64>,
    coefficients: &DVector<f64>,
    layout: &[Column],
    n_samples: usize,
    outlier_indices: Vec<usize>,
) -> FitStats {
    let mut contributions = BTreeMap::new();
    for (j, column) in layout.iter().enumerate() {
        let series: Vec<f64> = (0..design.nrows())
            .map(|i| design[(i, j)] * coefficients[j])
            .collect();
        contributions.insert(
            column.name().to_string(),
            ContributionSummary::from_series(&series),
        );
    }

    let predicted = design * coefficients;
    let r = pearson(predicted.as_slice(), targets.as_slice());
    let r_squared = if r.is_finite() { r * r } else { 0.0 };
    let error = error_band(r, design.nrows());

    FitStats {
        n_samples,
        n_outliers: outlier_indices.len(),
        outlier_indices,
        r_squared,
        error,
        contributions,
    }
}
