//! zdrift: dynamic nozzle-to-bed Z-offset calibration for 3D printers.
//!
//! First-layer height drifts with thermal expansion of the nozzle, the bed,
//! and the toolhead. This crate learns a per-printer correction from the
//! operator's own prints. The cycle per print is:
//!
//! 1. **Record**: probe bed height and temperatures at print start and
//!    append an unlabeled observation to the sample log.
//! 2. **Capture**: once the operator has dialed in the first layer, label
//!    the pending observation with the applied offset.
//! 3. **Fit**: least squares over temperatures, probed bed delta, and
//!    build-plate categories, with a robust residual screen rejecting wild
//!    captures.
//! 4. **Predict**: at the next print start, evaluate the model on the
//!    fresh probe values and apply the negated estimate as the correction.
//!
//! # Public API
//! - [`Calibrator`] as the primary entry point, persisting state as JSON
//!   under a data directory
//! - [`CalibratorConfig`] and [`FitConfig`] for tuning
//! - [`fit`] and [`OffsetModel`] for hosts that manage their own samples
//!
//! Column encoding and the robust screen internals are not part of the
//! public surface.

mod calibrator;
mod design;
mod fit;
mod model;
mod observation;
mod outlier;
mod stats;
mod store;

pub use calibrator::{CalibrateError, Calibrator, CalibratorConfig, ProbeSample};
pub use design::FitMode;
pub use fit::{fit, FitConfig, FitError, MIN_FIT_SAMPLES};
pub use model::OffsetModel;
pub use observation::{BedType, Observation, ObservationId};
pub use stats::{ContributionSummary, FitStats};
pub use store::{SampleStore, StaticData, StoreError, PRINT_DATA_FILE, STATIC_DATA_FILE};
