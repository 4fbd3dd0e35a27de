//! Canonical design-matrix layout for the offset regression.
//!
//! Coefficients are addressed positionally during the solve and by column
//! name in the persisted model, so the column order produced by
//! [`Column::layout`] must stay stable across releases.

use serde::{Deserialize, Serialize};

use crate::observation::{BedType, Observation};

/// Regression mode selecting which columns enter the design matrix.
///
/// Polynomial mode adds quadratic terms on the probed delta and the bed and
/// sensor temperatures only; plate categories and the nozzle temperature
/// stay linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// First-order terms only.
    #[default]
    Linear,
    /// First-order terms plus quadratic delta/temperature terms.
    Polynomial,
}

/// One column of the design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Static baseline nozzle trigger height.
    NozzleReference,
    /// Nozzle temperature.
    NozzleTemperature,
    /// Probed height delta at the reference point.
    BedDelta,
    /// Squared probed delta (polynomial mode only).
    BedDeltaSq,
    /// Bed temperature.
    BedTemperature,
    /// Squared bed temperature (polynomial mode only).
    BedTemperatureSq,
    /// One-hot indicator for a single plate category.
    BedType(BedType),
    /// Auxiliary sensor temperature.
    SensorTemperature,
    /// Squared sensor temperature (polynomial mode only).
    SensorTemperatureSq,
    /// Constant 1 intercept.
    Intercept,
}

impl Column {
    /// Canonical column order for the given mode.
    ///
    /// 13 columns in linear mode, 16 in polynomial mode. The one-hot block
    /// follows [`BedType::ALL`] declaration order, never a map iteration.
    pub fn layout(mode: FitMode) -> Vec<Column> {
        let quadratic = mode == FitMode::Polynomial;
        let mut columns = Vec::with_capacity(if quadratic { 16 } else { 13 });
        columns.push(Column::NozzleReference);
        columns.push(Column::NozzleTemperature);
        columns.push(Column::BedDelta);
        if quadratic {
            columns.push(Column::BedDeltaSq);
        }
        columns.push(Column::BedTemperature);
        if quadratic {
            columns.push(Column::BedTemperatureSq);
        }
        for bed in BedType::ALL {
            columns.push(Column::BedType(bed));
        }
        columns.push(Column::SensorTemperature);
        if quadratic {
            columns.push(Column::SensorTemperatureSq);
        }
        columns.push(Column::Intercept);
        columns
    }

    /// Canonical name keying this column's coefficient in persisted models.
    pub fn name(self) -> &'static str {
        match self {
            Column::NozzleReference => "nozzle_reference",
            Column::NozzleTemperature => "nozzle_temperature",
            Column::BedDelta => "bed_delta",
            Column::BedDeltaSq => "bed_delta_sq",
            Column::BedTemperature => "bed_temperature",
            Column::BedTemperatureSq => "bed_temperature_sq",
            Column::BedType(bed) => bed.column_name(),
            Column::SensorTemperature => "sensor_temperature",
            Column::SensorTemperatureSq => "sensor_temperature_sq",
            Column::Intercept => "offset",
        }
    }

    fn value(self, obs: &Observation, bed: BedType) -> f64 {
        match self {
            Column::NozzleReference => obs.nozzle_reference_z,
            Column::NozzleTemperature => obs.nozzle_temperature,
            Column::BedDelta => obs.bed_probed_delta,
            Column::BedDeltaSq => obs.bed_probed_delta * obs.bed_probed_delta,
            Column::BedTemperature => obs.bed_temperature,
            Column::BedTemperatureSq => obs.bed_temperature * obs.bed_temperature,
            Column::BedType(t) => {
                if t == bed {
                    1.0
                } else {
                    0.0
                }
            }
            Column::SensorTemperature => obs.sensor_temperature,
            Column::SensorTemperatureSq => obs.sensor_temperature * obs.sensor_temperature,
            Column::Intercept => 1.0,
        }
    }
}

/// Encode one observation as a design-matrix row over `layout`.
///
/// `bed` is the observation's plate category, parsed by the caller so that
/// unknown names surface as errors before any encoding happens.
pub(crate) fn encode_row(obs: &Observation, bed: BedType, layout: &[Column]) -> Vec<f64> {
    layout.iter().map(|c| c.value(obs, bed)).collect()
}
