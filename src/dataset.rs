//! Sample records: synthesis parameters, per-technique measurements and
//! derived properties for one polymer sample.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::utils::AnalysisError;

/// One detected FTIR absorption peak
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FtirPeak {
    /// Peak position in cm⁻¹
    pub wavenumber: f64,
    pub intensity: f64,
    #[serde(default)]
    pub area: Option<f64>,
}

/// FTIR spectrum analysis results
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FtirMeasurement {
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub peaks: Vec<FtirPeak>,
    /// Spectral indices such as `esterification_degree`
    #[serde(default)]
    pub indices: IndexMap<String, f64>,
}

/// One TGA decomposition stage (temperatures in °C, mass loss in %)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TgaStage {
    pub onset: f64,
    pub peak: f64,
    pub endset: f64,
    pub mass_loss: f64,
}

/// TGA analysis results
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TgaMeasurement {
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub stages: Vec<TgaStage>,
    /// Whole-curve scalars (residue, T5, T50, ...)
    #[serde(default)]
    pub metrics: IndexMap<String, f64>,
}

/// One DSC thermal transition (Tg, Tm, Tc, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DscTransition {
    pub onset: f64,
    pub peak: f64,
    pub endset: f64,
    #[serde(default)]
    pub enthalpy: Option<f64>,
}

/// DSC results for one heating or cooling segment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DscMeasurement {
    #[serde(default)]
    pub processed: bool,
    #[serde(default)]
    pub transitions: IndexMap<String, DscTransition>,
}

/// Solubility results for one solvent
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SolubilityMeasurement {
    #[serde(default)]
    pub processed: bool,
    /// van 't Hoff fit parameters (delta_h, delta_s, r2, ...)
    #[serde(default)]
    pub vant_hoff: IndexMap<String, f64>,
    #[serde(default)]
    pub metrics: IndexMap<String, f64>,
}

/// Per-technique measurement sections
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Measurements {
    #[serde(default)]
    pub ftir: Option<FtirMeasurement>,
    #[serde(default)]
    pub tga: Option<TgaMeasurement>,
    #[serde(default)]
    pub dsc_heating: Option<DscMeasurement>,
    #[serde(default)]
    pub dsc_cooling: Option<DscMeasurement>,
    /// Keyed by solvent name
    #[serde(default)]
    pub solubility: IndexMap<String, SolubilityMeasurement>,
    #[serde(default)]
    pub other: IndexMap<String, f64>,
}

/// Derived scalar outputs per technique
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Properties {
    #[serde(default)]
    pub ftir_derived: IndexMap<String, f64>,
    #[serde(default)]
    pub tga_derived: IndexMap<String, f64>,
    #[serde(default)]
    pub dsc_derived: IndexMap<String, f64>,
    #[serde(default)]
    pub solubility_derived: IndexMap<String, f64>,
    #[serde(default)]
    pub synthesis: IndexMap<String, f64>,
    #[serde(default)]
    pub other: IndexMap<String, f64>,
}

/// A single polymer sample
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    #[serde(default)]
    pub id: String,
    /// Scalar synthesis parameters (catalyst concentration, temperature, molar fractions, ...)
    #[serde(default)]
    pub synthesis: IndexMap<String, f64>,
    #[serde(default)]
    pub measurements: Measurements,
    #[serde(default)]
    pub properties: Properties,
}

impl Sample {
    /// Create an empty sample
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Add a synthesis parameter
    pub fn with_synthesis(mut self, key: &str, value: f64) -> Self {
        self.synthesis.insert(key.to_string(), value);
        self
    }
}

/// Load samples from JSON: either one sample object or an array of them
pub fn samples_from_json(json_data: &str) -> Result<Vec<Sample>, AnalysisError> {
    let value: serde_json::Value = serde_json::from_str(json_data)
        .map_err(|e| AnalysisError::ArgumentError(format!("invalid sample JSON: {}", e)))?;

    let samples = match value {
        serde_json::Value::Object(_) => vec![parse_sample(value)?],
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(parse_sample)
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(AnalysisError::ArgumentError(
                "samples must be a sample record or an array of sample records".to_string(),
            ))
        }
    };

    if samples.is_empty() {
        return Err(AnalysisError::ArgumentError("sample set is empty".to_string()));
    }
    Ok(samples)
}

fn parse_sample(value: serde_json::Value) -> Result<Sample, AnalysisError> {
    if !value.is_object() {
        return Err(AnalysisError::ArgumentError(
            "sample array entries must be objects".to_string(),
        ));
    }
    serde_json::from_value(value)
        .map_err(|e| AnalysisError::ArgumentError(format!("invalid sample record: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_creation() {
        let sample = Sample::new("PGCit-01")
            .with_synthesis("temp", 150.0)
            .with_synthesis("time", 4.0);

        assert_eq!(sample.id, "PGCit-01");
        assert_eq!(sample.synthesis.get("temp"), Some(&150.0));
        let keys: Vec<&String> = sample.synthesis.keys().collect();
        assert_eq!(keys, vec!["temp", "time"]);
    }

    #[test]
    fn test_json_single_record() {
        let json_data = r#"{
            "id": "S1",
            "synthesis": {"catalyst": 0.5, "temp": 140},
            "measurements": {
                "ftir": {"processed": true, "peaks": [{"wavenumber": 1730.2, "intensity": 0.8}]}
            },
            "properties": {"tga_derived": {"residue": 4.2}}
        }"#;
        let samples = samples_from_json(json_data).unwrap();

        assert_eq!(samples.len(), 1);
        let ftir = samples[0].measurements.ftir.as_ref().unwrap();
        assert!(ftir.processed);
        assert_eq!(ftir.peaks[0].area, None);
        assert_eq!(samples[0].properties.tga_derived.get("residue"), Some(&4.2));
        assert!(samples[0].measurements.tga.is_none());
    }

    #[test]
    fn test_json_array() {
        let json_data = r#"[{"id": "A"}, {"id": "B", "synthesis": {"temp": 120}}]"#;
        let samples = samples_from_json(json_data).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].synthesis.get("temp"), Some(&120.0));
    }

    #[test]
    fn test_json_keeps_record_key_order() {
        let json_data = r#"{
            "id": "A",
            "synthesis": {"temp": 150, "ratio": 0.5, "catalyst": 1.0},
            "measurements": {"solubility": {"water": {"metrics": {"mean": 0.4, "max": 0.8}}}}
        }"#;
        let samples = samples_from_json(json_data).unwrap();
        let keys: Vec<&str> = samples[0].synthesis.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["temp", "ratio", "catalyst"]);
        let metrics: Vec<&str> = samples[0].measurements.solubility["water"]
            .metrics
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(metrics, vec!["mean", "max"]);
    }

    #[test]
    fn test_json_rejects_scalars_and_empty() {
        assert!(matches!(
            samples_from_json("42"),
            Err(AnalysisError::ArgumentError(_))
        ));
        assert!(matches!(
            samples_from_json("[]"),
            Err(AnalysisError::ArgumentError(_))
        ));
        match samples_from_json("[1, 2]") {
            Err(AnalysisError::ArgumentError(msg)) => {
                assert_eq!(msg, "sample array entries must be objects")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
