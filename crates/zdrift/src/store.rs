//! JSON-backed persistence for calibration samples and the static printer
//! record.
//!
//! Every rewrite renames the current file to a `.bak` sibling first, so one
//! generation of history survives a crash mid-write. Unreadable or missing
//! files degrade to an empty state instead of failing the host.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::model::OffsetModel;
use crate::observation::{Observation, ObservationId};

/// File name of the append-only observation log.
pub const PRINT_DATA_FILE: &str = "print_data.json";
/// File name of the static printer record.
pub const STATIC_DATA_FILE: &str = "static_data.json";

const BACKUP_SUFFIX: &str = ".bak";

// ── Error type ─────────────────────────────────────────────────────────────

/// Errors raised while persisting calibration state.
#[derive(Debug)]
pub enum StoreError {
    /// Filesystem failure while archiving or writing a record.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A record that could not be serialized.
    Format {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "{}: {}", path.display(), source)
            }
            Self::Format { path, source } => {
                write!(f, "{}: invalid record: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Format { source, .. } => Some(source),
        }
    }
}

// ── Persistence helpers ────────────────────────────────────────────────────

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Rename the current file to its backup sibling. A missing file is fine;
/// there is simply nothing to archive yet.
fn archive(path: &Path) -> std::io::Result<()> {
    match fs::rename(path, backup_path(path)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Serialize `value`, archive the current file, then write the new record.
///
/// Serialization runs first so a failure leaves the current file in place.
fn write_record<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Format {
        path: path.to_path_buf(),
        source,
    })?;
    archive(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a record, falling back to the default on a missing, unreadable, or
/// unparsable file. Calibration must keep working on a fresh or damaged
/// printer, so load failures are logged rather than propagated.
fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read record; starting fresh");
            return T::default();
        }
    };
    match serde_json::from_str(&data) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to parse record; starting fresh");
            T::default()
        }
    }
}

// ── Sample store ───────────────────────────────────────────────────────────

/// Append-only log of calibration observations, mirrored to a JSON file
/// after every mutation.
#[derive(Debug)]
pub struct SampleStore {
    path: PathBuf,
    observations: Vec<Observation>,
}

impl SampleStore {
    /// Open the store at `path`, loading any existing observations.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let observations = load_or_default(&path);
        Self { path, observations }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Append a new observation and persist the log.
    pub fn append(&mut self, observation: Observation) -> Result<ObservationId, StoreError> {
        self.observations.push(observation);
        self.save()?;
        Ok(ObservationId(self.observations.len() - 1))
    }

    /// Label the most recent observation with its measured offset.
    ///
    /// Returns `Ok(false)` when the log is empty or the last observation is
    /// already labeled; a capture must pair with exactly one prior probe.
    pub fn complete_last(&mut self, z_offset: f64, timestamp: f64) -> Result<bool, StoreError> {
        let Some(last) = self.observations.last_mut() else {
            return Ok(false);
        };
        if last.z_offset.is_some() {
            return Ok(false);
        }
        last.z_offset = Some(z_offset);
        last.timestamp = timestamp;
        self.save()?;
        Ok(true)
    }

    /// Drop all observations, archiving the current log file.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.observations.clear();
        self.save()
    }

    fn save(&self) -> Result<(), StoreError> {
        write_record(&self.path, &self.observations)
    }
}

// ── Static record ──────────────────────────────────────────────────────────

/// Per-printer calibration state that survives log resets: the probed
/// baseline and the most recently fitted model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticData {
    /// Sign-adjusted nozzle trigger height from the last baseline
    /// calibration.
    pub nozzle_reference_z: f64,
    /// Last fitted offset model, if any fit has succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<OffsetModel>,
}

impl StaticData {
    pub fn load(path: &Path) -> Self {
        load_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_record(path, self)
    }
}
