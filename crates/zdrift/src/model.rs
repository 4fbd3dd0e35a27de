//! Fitted offset model: named coefficients plus the statistics snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::design::{self, Column, FitMode};
use crate::fit::FitError;
use crate::observation::{BedType, Observation};
use crate::stats::FitStats;

/// Correction reported while uncalibrated when the baseline reference is
/// exactly zero, so the caller never mistakes the state for "no change
/// needed".
const UNCALIBRATED_SENTINEL: f64 = 1e-6;

/// Result of a successful fit: the effective mode, one coefficient per
/// design-matrix column keyed by canonical name, and the fit statistics.
///
/// Recomputed in full from the labeled observation set on every fit;
/// replaces the previous model wholesale. Columns of the other mode (for
/// example quadratic terms after a linear fit) are simply absent from
/// `factors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetModel {
    /// Mode the coefficients were fitted in.
    pub mode: FitMode,
    /// Fitted coefficient per design-matrix column.
    pub factors: BTreeMap<String, f64>,
    /// Statistics snapshot of the accepted fit.
    pub stats: FitStats,
}

impl OffsetModel {
    /// Correction for `observation`: the negated factor-weighted sum of its
    /// encoded features (the factors predict the deviation, the correction
    /// is its inverse).
    ///
    /// A model without a fitted `bed_delta` factor has never been through a
    /// successful fit; it yields the uncalibrated fallback instead of a
    /// weighted sum. Factors missing for individual columns weigh 0.
    pub fn predict(&self, observation: &Observation) -> Result<f64, FitError> {
        if !self.factors.contains_key(Column::BedDelta.name()) {
            return Ok(uncalibrated_correction(observation));
        }
        let bed = BedType::parse(&observation.bed_surface_type).ok_or_else(|| {
            FitError::UnknownBedType {
                name: observation.bed_surface_type.clone(),
            }
        })?;
        let layout = Column::layout(self.mode);
        let row = design::encode_row(observation, bed, &layout);
        let mut sum = 0.0;
        for (column, value) in layout.iter().zip(row) {
            sum += value * self.factors.get(column.name()).copied().unwrap_or(0.0);
        }
        Ok(-sum)
    }
}

/// Fallback correction while no model has been fitted: the observation's
/// static baseline reference, or a small nonzero sentinel when the baseline
/// is exactly zero.
pub(crate) fn uncalibrated_correction(observation: &Observation) -> f64 {
    if observation.nozzle_reference_z != 0.0 {
        observation.nozzle_reference_z
    } else {
        UNCALIBRATED_SENTINEL
    }
}
