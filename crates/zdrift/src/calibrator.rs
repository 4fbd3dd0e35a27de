//! High-level calibration facade tying the sample store, the static printer
//! record, and the regression engine together.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::design::FitMode;
use crate::fit::{self, FitConfig, FitError};
use crate::model::{self, OffsetModel};
use crate::observation::{BedType, Observation, ObservationId};
use crate::stats::FitStats;
use crate::store::{SampleStore, StaticData, StoreError, PRINT_DATA_FILE, STATIC_DATA_FILE};

// ── Inputs ─────────────────────────────────────────────────────────────────

/// Predictor values probed at the start of a print, before the true offset
/// is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSample {
    /// Nozzle temperature during the probe (°C).
    pub nozzle_temperature: f64,
    /// Bed temperature during the probe (°C).
    pub bed_temperature: f64,
    /// Auxiliary sensor temperature (°C); 0 when the printer has none.
    #[serde(default)]
    pub sensor_temperature: f64,
    /// Build plate name as reported by the host.
    pub bed_surface_type: String,
    /// Probed bed height delta against the reference (mm).
    pub bed_probed_delta: f64,
}

// ── Configuration ──────────────────────────────────────────────────────────

/// Calibrator controls. The defaults match a printer that has accumulated
/// no history yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorConfig {
    /// Model family to fit.
    pub mode: FitMode,
    /// Regression engine controls.
    pub fit: FitConfig,
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Errors surfaced by calibrator operations.
#[derive(Debug)]
pub enum CalibrateError {
    /// Too few labeled observations for the requested operation.
    InsufficientData { needed: usize, got: usize },
    /// A plate name outside the fixed category set.
    UnknownBedType { name: String },
    /// A capture arrived without a preceding unlabeled probe.
    NoPendingObservation,
    /// Statistics were requested before any fit succeeded.
    NoModel,
    /// Persistence failure.
    Store(StoreError),
}

impl std::fmt::Display for CalibrateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientData { needed, got } => {
                write!(f, "not enough labeled samples: need {}, got {}", needed, got)
            }
            Self::UnknownBedType { name } => write!(f, "unknown bed type: {:?}", name),
            Self::NoPendingObservation => {
                write!(f, "no pending observation; record a probe first")
            }
            Self::NoModel => write!(f, "no fitted model; run a fit first"),
            Self::Store(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for CalibrateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FitError> for CalibrateError {
    fn from(err: FitError) -> Self {
        match err {
            FitError::InsufficientData { needed, got } => Self::InsufficientData { needed, got },
            FitError::UnknownBedType { name } => Self::UnknownBedType { name },
        }
    }
}

impl From<StoreError> for CalibrateError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

// ── Calibrator ─────────────────────────────────────────────────────────────

/// Dynamic Z-offset calibrator for one printer.
///
/// State lives in two JSON files under the data directory: the observation
/// log and the static record holding the baseline plus the fitted model.
/// The usual cycle per print is [`record_observation`] when the probe runs,
/// [`complete_observation`] once the operator has dialed in the true offset,
/// then [`fit`] to refresh the model and [`predict`] at the next print
/// start.
///
/// [`record_observation`]: Calibrator::record_observation
/// [`complete_observation`]: Calibrator::complete_observation
/// [`fit`]: Calibrator::fit
/// [`predict`]: Calibrator::predict
#[derive(Debug)]
pub struct Calibrator {
    static_path: PathBuf,
    static_data: StaticData,
    store: SampleStore,
    config: CalibratorConfig,
}

impl Calibrator {
    /// Open (or initialize) the calibration state under `dir`.
    ///
    /// Missing or unreadable state degrades to empty; the printer must stay
    /// usable even when its calibration files are damaged.
    pub fn open(dir: impl AsRef<Path>, config: CalibratorConfig) -> Self {
        let dir = dir.as_ref();
        if let Err(err) = std::fs::create_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), error = %err, "failed to create data directory");
        }
        let static_path = dir.join(STATIC_DATA_FILE);
        Self {
            static_data: StaticData::load(&static_path),
            static_path,
            store: SampleStore::open(dir.join(PRINT_DATA_FILE)),
            config,
        }
    }

    pub fn config(&self) -> &CalibratorConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut CalibratorConfig {
        &mut self.config
    }

    /// Read access to the observation log.
    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Sign-adjusted baseline nozzle trigger height.
    pub fn nozzle_reference_z(&self) -> f64 {
        self.static_data.nozzle_reference_z
    }

    /// Last fitted model, if any.
    pub fn model(&self) -> Option<&OffsetModel> {
        self.static_data.model.as_ref()
    }

    /// Append a new unlabeled observation stamped with the current baseline
    /// and wall-clock time.
    ///
    /// An unrecognized plate name is recorded as-is and only rejected once
    /// it reaches a fit or prediction, so a host-side rename never loses
    /// the sample.
    pub fn record_observation(
        &mut self,
        probe: &ProbeSample,
    ) -> Result<ObservationId, CalibrateError> {
        if BedType::parse(&probe.bed_surface_type).is_none() {
            tracing::warn!(
                bed_surface_type = %probe.bed_surface_type,
                "recording observation with unrecognized bed type"
            );
        }
        let observation = self.observation_from_probe(probe, unix_now());
        let id = self.store.append(observation)?;
        tracing::debug!(index = id.0, "observation recorded");
        Ok(id)
    }

    /// Label the pending observation with the offset the operator settled
    /// on for this print.
    pub fn complete_observation(&mut self, z_offset: f64) -> Result<(), CalibrateError> {
        if !self.store.complete_last(z_offset, unix_now())? {
            return Err(CalibrateError::NoPendingObservation);
        }
        tracing::debug!(z_offset, "observation completed");
        Ok(())
    }

    /// Install a freshly probed baseline, dropping the observation log and
    /// the fitted model. Samples taken against the old baseline do not
    /// transfer to the new one.
    pub fn recalibrate_baseline(&mut self, nozzle_reference_z: f64) -> Result<(), CalibrateError> {
        self.store.reset()?;
        self.static_data = StaticData {
            nozzle_reference_z,
            model: None,
        };
        self.static_data.save(&self.static_path)?;
        tracing::info!(nozzle_reference_z, "baseline recalibrated; history cleared");
        Ok(())
    }

    /// Fit the offset model over the labeled observations and persist it.
    pub fn fit(&mut self) -> Result<OffsetModel, CalibrateError> {
        let model = fit::fit(
            self.store.observations(),
            self.config.mode,
            &self.config.fit,
        )?;
        self.static_data.model = Some(model.clone());
        self.static_data.save(&self.static_path)?;
        tracing::info!(
            n_samples = model.stats.n_samples,
            n_outliers = model.stats.n_outliers,
            r_squared = model.stats.r_squared,
            "offset model updated"
        );
        Ok(model)
    }

    /// Correction to apply at the next print start, in mm.
    ///
    /// Falls back to the baseline-derived correction until a model has been
    /// fitted.
    pub fn predict(&self, probe: &ProbeSample) -> Result<f64, CalibrateError> {
        let observation = self.observation_from_probe(probe, 0.0);
        match &self.static_data.model {
            Some(model) => model.predict(&observation).map_err(Into::into),
            None => Ok(model::uncalibrated_correction(&observation)),
        }
    }

    /// Statistics of the last successful fit.
    pub fn statistics(&self) -> Result<&FitStats, CalibrateError> {
        self.static_data
            .model
            .as_ref()
            .map(|model| &model.stats)
            .ok_or(CalibrateError::NoModel)
    }

    fn observation_from_probe(&self, probe: &ProbeSample, timestamp: f64) -> Observation {
        Observation {
            nozzle_reference_z: self.static_data.nozzle_reference_z,
            nozzle_temperature: probe.nozzle_temperature,
            bed_temperature: probe.bed_temperature,
            sensor_temperature: probe.sensor_temperature,
            bed_surface_type: probe.bed_surface_type.clone(),
            bed_probed_delta: probe.bed_probed_delta,
            z_offset: None,
            timestamp,
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
