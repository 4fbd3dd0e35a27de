//! Calibration sample records and build-plate categories.

use serde::{Deserialize, Serialize};

// ── Bed plate categories ───────────────────────────────────────────────────

/// Build-plate categories recognized by the regression model.
///
/// Declaration order fixes the one-hot column order in the design matrix;
/// reordering variants changes the meaning of persisted coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BedType {
    /// No plate reported by the host.
    None,
    /// Smooth cool plate.
    CoolPlate,
    /// High-temperature plate.
    HighTemp,
    /// Engineering plate.
    Engineering,
    /// Textured PEI plate.
    TexturedPei,
    /// Textured cool plate.
    TexturedCool,
    /// Supertack cool plate.
    Supertack,
}

impl BedType {
    /// All categories in declaration (design-matrix column) order.
    pub const ALL: [BedType; 7] = [
        BedType::None,
        BedType::CoolPlate,
        BedType::HighTemp,
        BedType::Engineering,
        BedType::TexturedPei,
        BedType::TexturedCool,
        BedType::Supertack,
    ];

    /// Canonical snake_case name, matching the serialized form.
    pub fn key(self) -> &'static str {
        match self {
            BedType::None => "none",
            BedType::CoolPlate => "cool_plate",
            BedType::HighTemp => "high_temp",
            BedType::Engineering => "engineering",
            BedType::TexturedPei => "textured_pei",
            BedType::TexturedCool => "textured_cool",
            BedType::Supertack => "supertack",
        }
    }

    /// Name of this category's one-hot column in the design matrix.
    pub fn column_name(self) -> &'static str {
        match self {
            BedType::None => "bed_type_none",
            BedType::CoolPlate => "bed_type_cool_plate",
            BedType::HighTemp => "bed_type_high_temp",
            BedType::Engineering => "bed_type_engineering",
            BedType::TexturedPei => "bed_type_textured_pei",
            BedType::TexturedCool => "bed_type_textured_cool",
            BedType::Supertack => "bed_type_supertack",
        }
    }

    /// Parse a host-supplied plate name.
    ///
    /// Matching ignores case, whitespace, and punctuation, and accepts
    /// slicer-style spellings with a trailing "Plate" ("High Temp Plate"
    /// parses as [`BedType::HighTemp`]). Returns `None` for names outside
    /// the fixed set; callers must surface that as an error rather than
    /// substitute a default.
    pub fn parse(name: &str) -> Option<BedType> {
        let compact: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        BedType::ALL.iter().copied().find(|bt| {
            let key: String = bt.key().chars().filter(|c| *c != '_').collect();
            compact == key || compact == format!("{key}plate")
        })
    }
}

// ── Observation record ─────────────────────────────────────────────────────

/// Index of an observation within the sample store's ordered sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationId(pub usize);

/// One calibration sample: predictor values probed before a print, plus the
/// true offset captured once the print completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Static baseline nozzle trigger height (sign-adjusted), stamped from
    /// the static record at the time the observation was taken.
    pub nozzle_reference_z: f64,
    /// Nozzle temperature during the calibration pass (°C).
    pub nozzle_temperature: f64,
    /// Bed temperature during the calibration pass (°C).
    pub bed_temperature: f64,
    /// Auxiliary frame/chamber sensor temperature (°C), 0 when not fitted.
    #[serde(default)]
    pub sensor_temperature: f64,
    /// Host-supplied plate name. Kept verbatim so records round-trip; parsed
    /// against [`BedType`] when the observation is encoded for fitting.
    pub bed_surface_type: String,
    /// Measured height difference at the reference probe point.
    pub bed_probed_delta: f64,
    /// Captured true offset. Absent until the print completes; observations
    /// without it are excluded from fitting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_offset: Option<f64>,
    /// Capture time in seconds since the Unix epoch. Set when the
    /// observation is recorded, overwritten when the outcome is captured.
    pub timestamp: f64,
}

impl Observation {
    /// Whether the true offset has been captured for this observation.
    pub fn is_labeled(&self) -> bool {
        self.z_offset.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonical_names() {
        assert_eq!(BedType::parse("cool_plate"), Some(BedType::CoolPlate));
        assert_eq!(BedType::parse("none"), Some(BedType::None));
        assert_eq!(BedType::parse("supertack"), Some(BedType::Supertack));
    }

    #[test]
    fn parse_slicer_spellings() {
        assert_eq!(BedType::parse("Cool Plate"), Some(BedType::CoolPlate));
        assert_eq!(BedType::parse("High Temp Plate"), Some(BedType::HighTemp));
        assert_eq!(
            BedType::parse("Textured PEI Plate"),
            Some(BedType::TexturedPei)
        );
        assert_eq!(
            BedType::parse("Textured Cool Plate"),
            Some(BedType::TexturedCool)
        );
        assert_eq!(BedType::parse("Supertack Plate"), Some(BedType::Supertack));
        assert_eq!(BedType::parse("Engineering Plate"), Some(BedType::Engineering));
    }

    #[test]
    fn parse_rejects_unknown_names() {
        assert_eq!(BedType::parse("glass"), None);
        assert_eq!(BedType::parse(""), None);
        assert_eq!(BedType::parse("plate"), None);
    }

    #[test]
    fn bed_type_serializes_snake_case() {
        for bt in BedType::ALL {
            let json = serde_json::to_string(&bt).unwrap();
            assert_eq!(json, format!("\"{}\"", bt.key()));
        }
    }

    #[test]
    fn observation_json_roundtrip() {
        let obs = Observation {
            nozzle_reference_z: -0.0875,
            nozzle_temperature: 220.0,
            bed_temperature: 62.5,
            sensor_temperature: 31.0,
            bed_surface_type: "Textured PEI Plate".to_string(),
            bed_probed_delta: 0.0231,
            z_offset: Some(-0.041),
            timestamp: 1_724_400_000.5,
        };
        let json = serde_json::to_string(&obs).unwrap();
        let back: Observation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.nozzle_reference_z, obs.nozzle_reference_z);
        assert_eq!(back.z_offset, obs.z_offset);
        assert_eq!(back.bed_surface_type, obs.bed_surface_type);
        assert_eq!(back.timestamp, obs.timestamp);
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{
            "nozzle_reference_z": -0.1,
            "nozzle_temperature": 215.0,
            "bed_temperature": 55.0,
            "bed_surface_type": "cool_plate",
            "bed_probed_delta": 0.01,
            "timestamp": 1000.0
        }"#;
        let obs: Observation = serde_json::from_str(json).unwrap();
        assert_eq!(obs.sensor_temperature, 0.0);
        assert!(obs.z_offset.is_none());
        assert!(!obs.is_labeled());
    }
}
