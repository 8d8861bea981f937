//! Polymer Insight Engine - feature extraction and property prediction for
//! citrate-glycerol (PGCit) polymer characterization data
//!
//! Samples carry synthesis parameters, FTIR / TGA / DSC / solubility
//! measurements and measured properties. The library turns a sample set
//! into aligned feature/property matrices by name, trains and
//! cross-validates several regression families per property, and predicts
//! properties with confidence intervals for new formulations.

pub mod bundle;
pub mod correlation;
pub mod dataset;
pub mod features;
pub mod models;
pub mod prediction;
pub mod stats;
pub mod training;
pub mod utils;

pub use bundle::ModelBundle;
pub use correlation::{correlation_view, top_features, CorrelationMatrix, CorrelationType, CorrelationView};
pub use dataset::{samples_from_json, Sample};
pub use features::{extract_features, extract_with_names, resolve_feature, resolve_property, Extraction};
pub use models::{Model, ModelType, Regressor};
pub use prediction::{predict_properties, ModelSelection, PredictOptions, PredictionOutput};
pub use stats::Statistics;
pub use training::{train_models, train_models_with_cancel, Metrics, TrainOptions, TrainedModels, TrainingResults};
pub use utils::{AnalysisError, CancellationToken, Standardization, Warning, WarningKind};

/// Result type used by the command-line host
pub type Result<T> = anyhow::Result<T>;
