//! Persisted training output: models and results stored as one unit.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::training::{TrainedModels, TrainingResults};
use crate::utils::AnalysisError;

pub const BUNDLE_VERSION: u32 = 1;

/// Models plus the results they must be paired with at prediction time
/// (feature list, standardization, metrics)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelBundle {
    pub version: u32,
    pub models: TrainedModels,
    pub results: TrainingResults,
}

impl ModelBundle {
    pub fn new(models: TrainedModels, results: TrainingResults) -> Self {
        Self {
            version: BUNDLE_VERSION,
            models,
            results,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AnalysisError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| AnalysisError::Serialization(format!("encode bundle: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AnalysisError> {
        let (bundle, _): (ModelBundle, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| AnalysisError::Serialization(format!("decode bundle: {}", e)))?;

        if bundle.version != BUNDLE_VERSION {
            return Err(AnalysisError::Serialization(format!(
                "bundle version {} is not supported (expected {})",
                bundle.version, BUNDLE_VERSION
            )));
        }
        Ok(bundle)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AnalysisError> {
        let bytes = self.to_bytes()?;
        fs::write(path.as_ref(), &bytes)?;
        info!(path = %path.as_ref().display(), bytes = bytes.len(), "model bundle saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let bytes = fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes_rejected() {
        let err = ModelBundle::from_bytes(&[0xff, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, AnalysisError::Serialization(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelBundle::load(dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, AnalysisError::Io(_)));
    }
}
