//! Least-squares fitting of the offset model with robust outlier screening.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::design::{self, Column, FitMode};
use crate::model::OffsetModel;
use crate::observation::{BedType, Observation};
use crate::outlier;
use crate::stats;

/// Labeled observations required before any fit is attempted.
pub const MIN_FIT_SAMPLES: usize = 2;

// ── Error type ─────────────────────────────────────────────────────────────

/// Errors that can occur while fitting or evaluating the offset model.
#[derive(Debug, Clone, PartialEq)]
pub enum FitError {
    /// Too few labeled observations for the requested operation.
    InsufficientData {
        /// Required minimum number of labeled observations.
        needed: usize,
        /// Provided number of labeled observations.
        got: usize,
    },
    /// A plate name outside the fixed category set.
    UnknownBedType {
        /// The name as supplied by the host.
        name: String,
    },
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientData { needed, got } => {
                write!(f, "not enough labeled samples: need {}, got {}", needed, got)
            }
            Self::UnknownBedType { name } => {
                write!(f, "unknown bed type: {:?}", name)
            }
        }
    }
}

impl std::error::Error for FitError {}

// ── Configuration ──────────────────────────────────────────────────────────

/// Regression engine controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Minimum labeled sample count before outlier screening runs; below
    /// this every sample is kept.
    pub outlier_min_samples: usize,
    /// Multiplier on the robust residual spread when thresholding outliers.
    pub deviation_factor: f64,
    /// Labeled sample count that a polynomial fit must exceed; at or below
    /// it the engine downgrades to linear.
    pub poly_min_samples: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            outlier_min_samples: 20,
            deviation_factor: 3.0,
            poly_min_samples: 30,
        }
    }
}

// ── Fitting ────────────────────────────────────────────────────────────────

/// Fit an offset model over the labeled subset of `observations`.
///
/// Solves ordinary least squares over the canonical column layout (the SVD
/// minimum-norm solution, since the one-hot block plus intercept is always
/// rank-deficient), screens residuals when enough samples have accumulated,
/// and refits on the retained subset when at least one outlier was found and
/// at least [`MIN_FIT_SAMPLES`] samples remain.
///
/// The requested mode is downgraded to linear until the labeled count
/// exceeds [`FitConfig::poly_min_samples`].
pub fn fit(
    observations: &[Observation],
    mode: FitMode,
    config: &FitConfig,
) -> Result<OffsetModel, FitError> {
    let labeled: Vec<&Observation> = observations.iter().filter(|o| o.is_labeled()).collect();
    let n = labeled.len();
    if n < MIN_FIT_SAMPLES {
        return Err(FitError::InsufficientData {
            needed: MIN_FIT_SAMPLES,
            got: n,
        });
    }

    let mode = effective_mode(mode, n, config);
    let layout = Column::layout(mode);

    let mut rows = Vec::with_capacity(n);
    let mut targets = Vec::with_capacity(n);
    for obs in &labeled {
        let bed =
            BedType::parse(&obs.bed_surface_type).ok_or_else(|| FitError::UnknownBedType {
                name: obs.bed_surface_type.clone(),
            })?;
        rows.push(design::encode_row(obs, bed, &layout));
        // is_labeled filtered above
        targets.push(obs.z_offset.unwrap_or_default());
    }
    let design = DMatrix::from_fn(n, layout.len(), |i, j| rows[i][j]);
    let targets = DVector::from_vec(targets);

    let coefficients = solve_least_squares(&design, &targets);

    let (design, targets, coefficients, outlier_indices) =
        if n >= config.outlier_min_samples {
            screen_and_refit(design, targets, coefficients, config.deviation_factor)
        } else {
            (design, targets, coefficients, Vec::new())
        };

    let stats = stats::fit_statistics(&design, &targets, &coefficients, &layout, n, outlier_indices);
    tracing::debug!(
        n_samples = stats.n_samples,
        n_outliers = stats.n_outliers,
        r_squared = stats.r_squared,
        mode = ?mode,
        "offset model fitted"
    );

    let factors = layout
        .iter()
        .zip(coefficients.iter())
        .map(|(column, c)| (column.name().to_string(), *c))
        .collect();

    Ok(OffsetModel {
        mode,
        factors,
        stats,
    })
}

/// Downgrade polynomial mode until the labeled count exceeds the configured
/// minimum.
fn effective_mode(requested: FitMode, n_labeled: usize, config: &FitConfig) -> FitMode {
    if requested == FitMode::Polynomial && n_labeled <= config.poly_min_samples {
        tracing::debug!(
            n_labeled,
            poly_min_samples = config.poly_min_samples,
            "downgrading polynomial fit to linear"
        );
        return FitMode::Linear;
    }
    requested
}

/// Minimum-norm ordinary least squares via SVD, with the singular-value
/// cutoff scaled to the matrix size and largest singular value.
fn solve_least_squares(design: &DMatrix<f64>, targets: &DVector<f64>) -> DVector<f64> {
    let svd = design.clone().svd(true, true);
    let max_sv = svd.singular_values.iter().fold(0.0f64, |a, &b| a.max(b));
    let eps = f64::EPSILON * design.nrows().max(design.ncols()) as f64 * max_sv;
    match svd.solve(targets, eps) {
        Ok(coefficients) => coefficients,
        Err(err) => {
            tracing::warn!("least-squares solve failed ({err}); keeping zero coefficients");
            DVector::zeros(design.ncols())
        }
    }
}

/// One-pass robust screen: flag residual outliers against the initial fit
/// and refit on the retained rows when possible.
///
/// When no outlier is flagged, or too few rows would remain, the initial
/// fit is kept and no rejection is reported.
fn screen_and_refit(
    design: DMatrix<f64>,
    targets: DVector<f64>,
    coefficients: DVector<f64>,
    deviation_factor: f64,
) -> (DMatrix<f64>, DVector<f64>, DVector<f64>, Vec<usize>) {
    let predicted = &design * &coefficients;
    let residuals: Vec<f64> = (0..design.nrows())
        .map(|i| targets[i] - predicted[i])
        .collect();

    let flagged = outlier::flag_outliers(&residuals, deviation_factor);
    if flagged.is_empty() {
        return (design, targets, coefficients, Vec::new());
    }
    let n_retained = design.nrows() - flagged.len();
    if n_retained < MIN_FIT_SAMPLES {
        tracing::debug!(
            n_flagged = flagged.len(),
            n_samples = design.nrows(),
            "residual screen would leave too few samples; keeping all"
        );
        return (design, targets, coefficients, Vec::new());
    }

    let retained: Vec<usize> = (0..design.nrows())
        .filter(|i| !flagged.contains(i))
        .collect();
    let kept_design = DMatrix::from_fn(retained.len(), design.ncols(), |i, j| {
        design[(retained[i], j)]
    });
    let kept_targets = DVector::from_fn(retained.len(), |i, _| targets[retained[i]]);
    let refit = solve_least_squares(&kept_design, &kept_targets);

    tracing::debug!(
        n_outliers = flagged.len(),
        n_retained,
        "refitted without outlier residuals"
    );
    (kept_design, kept_targets, refit, flagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn observation(
        bed_probed_delta: f64,
        nozzle_temperature: f64,
        bed_temperature: f64,
        z_offset: Option<f64>,
    ) -> Observation {
        Observation {
            nozzle_reference_z: 0.0,
            nozzle_temperature,
            bed_temperature,
            sensor_temperature: 0.0,
            bed_surface_type: "cool_plate".to_string(),
            bed_probed_delta,
            z_offset,
            timestamp: 0.0,
        }
    }

    /// Observations whose outcome is exactly 2·delta + 3·bed_temp + 5, with
    /// the remaining covariates varied independently so their zero
    /// coefficients are identifiable.
    fn exact_linear_set(n: usize, seed: u64) -> Vec<Observation> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let delta = rng.gen_range(-0.1..0.1);
                let nozzle = rng.gen_range(180.0..260.0);
                let bed = rng.gen_range(40.0..100.0);
                observation(delta, nozzle, bed, Some(2.0 * delta + 3.0 * bed + 5.0))
            })
            .collect()
    }

    #[test]
    fn too_few_labeled_samples_errors() {
        let mut observations = exact_linear_set(5, 1);
        for obs in &mut observations {
            obs.z_offset = None;
        }
        observations[0].z_offset = Some(0.1);

        let err = fit(&observations, FitMode::Linear, &FitConfig::default()).unwrap_err();
        assert_eq!(err, FitError::InsufficientData { needed: 2, got: 1 });
    }

    #[test]
    fn recovers_exact_linear_coefficients() {
        let observations = exact_linear_set(12, 7);
        let model = fit(&observations, FitMode::Linear, &FitConfig::default()).unwrap();

        assert_relative_eq!(model.factors["bed_delta"], 2.0, epsilon = 1e-8);
        assert_relative_eq!(model.factors["bed_temperature"], 3.0, epsilon = 1e-8);
        assert_abs_diff_eq!(model.factors["nozzle_temperature"], 0.0, epsilon = 1e-8);
        // the intercept mass splits across the constant columns (one-hot
        // block + intercept) in the minimum-norm solution
        let constant_mass = model.factors["offset"] + model.factors["bed_type_cool_plate"];
        assert_relative_eq!(constant_mass, 5.0, epsilon = 1e-8);

        assert_eq!(model.stats.n_outliers, 0);
        assert_relative_eq!(model.stats.r_squared, 1.0, epsilon = 1e-9);
        assert_eq!(model.stats.error, 0.0);
    }

    #[test]
    fn predict_inverts_training_outcome() {
        let observations = exact_linear_set(10, 3);
        let model = fit(&observations, FitMode::Linear, &FitConfig::default()).unwrap();
        for obs in &observations {
            let correction = model.predict(obs).unwrap();
            assert_relative_eq!(correction, -obs.z_offset.unwrap(), epsilon = 1e-8);
        }
    }

    #[test]
    fn fitted_model_json_roundtrip_is_bit_exact() {
        // fitted factors carry full-precision mantissas and must reload
        // bit-for-bit
        for seed in [3u64, 7, 13] {
            let observations = exact_linear_set(12, seed);
            let model = fit(&observations, FitMode::Linear, &FitConfig::default()).unwrap();

            let json = serde_json::to_string(&model).unwrap();
            let reloaded: OffsetModel = serde_json::from_str(&json).unwrap();
            for (name, factor) in &model.factors {
                assert_eq!(
                    reloaded.factors[name].to_bits(),
                    factor.to_bits(),
                    "factor {name} drifted through JSON"
                );
            }
            assert_eq!(reloaded, model);
        }
    }

    #[test]
    fn unknown_bed_type_fails_fit() {
        let mut observations = exact_linear_set(4, 9);
        observations[2].bed_surface_type = "obsidian".to_string();
        let err = fit(&observations, FitMode::Linear, &FitConfig::default()).unwrap_err();
        assert!(matches!(err, FitError::UnknownBedType { ref name } if name == "obsidian"));
    }

    #[test]
    fn polynomial_downgrades_below_minimum() {
        let config = FitConfig {
            poly_min_samples: 30,
            ..FitConfig::default()
        };
        let observations = exact_linear_set(12, 11);
        let model = fit(&observations, FitMode::Polynomial, &config).unwrap();
        assert_eq!(model.mode, FitMode::Linear);
        assert!(!model.factors.contains_key("bed_delta_sq"));
    }

    #[test]
    fn polynomial_honored_above_minimum() {
        let config = FitConfig {
            poly_min_samples: 10,
            ..FitConfig::default()
        };
        let observations = exact_linear_set(40, 13);
        let model = fit(&observations, FitMode::Polynomial, &config).unwrap();
        assert_eq!(model.mode, FitMode::Polynomial);
        assert!(model.factors.contains_key("bed_delta_sq"));
        assert!(model.factors.contains_key("sensor_temperature_sq"));
        // quadratic terms of an exactly linear relationship stay negligible
        for obs in &observations {
            let correction = model.predict(obs).unwrap();
            assert_relative_eq!(correction, -obs.z_offset.unwrap(), epsilon = 1e-6);
        }
    }

    /// 25 near-linear samples on a 5x5 temperature grid plus two wild
    /// captures planted at the grid centroid. The centroid placement pulls
    /// only the intercept, so the screen sees clean deviations of 0.01 or 0
    /// against a threshold near 0.044 and planted deviations of 180 and 200.
    fn grid_set_with_planted_outliers() -> Vec<Observation> {
        // per-cell probe delta (sums to zero) and a +/-0.01 residual
        // texture orthogonal to every design column, split 8/9/8 across
        // +0.01 / 0 / -0.01
        const DELTA: [f64; 25] = [
            0.06, -0.03, 0.01, 0.02, -0.02, //
            0.06, -0.03, -0.04, 0.02, -0.02, //
            -0.03, 0.04, 0.03, -0.05, 0.01, //
            -0.05, 0.04, -0.01, -0.06, 0.05, //
            -0.05, 0.04, 0.02, -0.06, 0.05,
        ];
        const TEXTURE: [f64; 25] = [
            0.01, -0.01, 0.0, 0.01, -0.01, //
            -0.01, 0.01, 0.0, -0.01, 0.01, //
            0.0, 0.0, 0.0, 0.0, 0.0, //
            0.01, -0.01, 0.0, 0.01, -0.01, //
            -0.01, 0.01, 0.0, -0.01, 0.01,
        ];
        let mut observations: Vec<Observation> = (0..25)
            .map(|i| {
                let nozzle = 200.0 + (i % 5) as f64 * 10.0;
                let bed = 50.0 + (i / 5) as f64 * 10.0;
                let outcome = 2.0 * DELTA[i] + 3.0 * bed + 5.0 + TEXTURE[i];
                observation(DELTA[i], nozzle, bed, Some(outcome))
            })
            .collect();
        observations.push(observation(0.0, 220.0, 70.0, Some(395.0)));
        observations.push(observation(0.0, 220.0, 70.0, Some(15.0)));
        observations
    }

    #[test]
    fn rejects_exactly_the_planted_outliers() {
        let observations = grid_set_with_planted_outliers();
        let config = FitConfig {
            outlier_min_samples: 20,
            deviation_factor: 3.0,
            ..FitConfig::default()
        };
        let robust = fit(&observations, FitMode::Linear, &config).unwrap();
        assert_eq!(robust.stats.outlier_indices, vec![25, 26]);
        assert_eq!(robust.stats.n_outliers, 2);
        assert_eq!(robust.stats.n_samples, 27);

        // the refit on the retained rows recovers the clean relationship
        assert_relative_eq!(robust.factors["bed_delta"], 2.0, epsilon = 1e-8);
        assert_relative_eq!(robust.factors["bed_temperature"], 3.0, epsilon = 1e-8);
        assert_eq!(robust.stats.error, 0.0);

        // the unscreened fit is measurably worse
        let unscreened_config = FitConfig {
            outlier_min_samples: 1000,
            ..config
        };
        let unscreened = fit(&observations, FitMode::Linear, &unscreened_config).unwrap();
        assert_eq!(unscreened.stats.n_outliers, 0);
        assert!(robust.stats.error < unscreened.stats.error);
        assert!(robust.stats.r_squared > unscreened.stats.r_squared);
    }

    #[test]
    fn screening_skipped_below_sample_threshold() {
        let mut observations = exact_linear_set(10, 17);
        observations.push(observation(0.02, 215.0, 55.0, Some(30.0)));
        let config = FitConfig {
            outlier_min_samples: 20,
            ..FitConfig::default()
        };
        let model = fit(&observations, FitMode::Linear, &config).unwrap();
        assert_eq!(model.stats.n_outliers, 0);
        assert!(model.stats.outlier_indices.is_empty());
        // the wild sample stays in, degrading the fit
        assert!(model.stats.r_squared < 0.999);
    }

    #[test]
    fn unlabeled_observations_do_not_participate() {
        let mut observations = exact_linear_set(8, 19);
        observations.push(observation(10.0, 500.0, 500.0, None));
        let model = fit(&observations, FitMode::Linear, &FitConfig::default()).unwrap();
        assert_eq!(model.stats.n_samples, 8);
        assert_relative_eq!(model.factors["bed_delta"], 2.0, epsilon = 1e-8);
    }
}
