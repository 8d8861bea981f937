//! Regression model families behind a common [`Regressor`] trait.
//!
//! The training engine is generic over the trait; the fitted results are
//! stored in the [`FittedModel`] tagged union so they can be persisted and
//! dispatched for prediction.

pub mod ann;
pub mod ensemble;
pub mod importance;
pub mod linear;
pub mod svm;
pub mod tuning;

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::AnalysisError;

pub use ann::{Activation, AnnHyper, NeuralNet};
pub use ensemble::{EnsembleHyper, EnsembleMethod, TreeEnsemble};
pub use linear::{LinearHyper, LinearModel};
pub use svm::{SvmHyper, SvmKernel, SvmModel};
pub use tuning::TuneContext;

/// Model family identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Regression,
    Svm,
    Ann,
    Ensemble,
}

impl ModelType {
    pub const ALL: [ModelType; 4] = [
        ModelType::Regression,
        ModelType::Svm,
        ModelType::Ann,
        ModelType::Ensemble,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelType::Regression => "regression",
            ModelType::Svm => "svm",
            ModelType::Ann => "ann",
            ModelType::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regression" => Ok(ModelType::Regression),
            "svm" => Ok(ModelType::Svm),
            "ann" => Ok(ModelType::Ann),
            "ensemble" => Ok(ModelType::Ensemble),
            other => Err(AnalysisError::ArgumentError(format!(
                "unknown model type '{}'",
                other
            ))),
        }
    }
}

/// A model family: hyperparameters, fitting, prediction and importance
pub trait Regressor: Sized {
    const KIND: ModelType;
    type Hyper: Clone + fmt::Debug + Send + Sync;

    /// Fixed hyperparameters used when tuning is off
    fn default_hyper(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Self::Hyper;

    /// Search hyperparameters on training data; defaults when the family has no search
    fn tune(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        _ctx: &mut TuneContext,
    ) -> Result<Self::Hyper, AnalysisError> {
        Ok(Self::default_hyper(x, y))
    }

    fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        hyper: &Self::Hyper,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self, AnalysisError>;

    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64>;

    /// Unnormalized importance per feature column
    ///
    /// Defaults to perturbation sensitivity of the predictions.
    fn importance(&self, x: ArrayView2<f64>, _y: ArrayView1<f64>) -> Vec<f64> {
        importance::perturbation_importance(x, |m| self.predict(m))
    }

    fn into_fitted(self) -> FittedModel;
}

/// Fitted model internals, one variant per family
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum FittedModel {
    Regression(LinearModel),
    Svm(SvmModel),
    Ann(NeuralNet),
    Ensemble(TreeEnsemble),
}

impl FittedModel {
    pub fn model_type(&self) -> ModelType {
        match self {
            FittedModel::Regression(_) => ModelType::Regression,
            FittedModel::Svm(_) => ModelType::Svm,
            FittedModel::Ann(_) => ModelType::Ann,
            FittedModel::Ensemble(_) => ModelType::Ensemble,
        }
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        match self {
            FittedModel::Regression(m) => m.predict(x),
            FittedModel::Svm(m) => m.predict(x),
            FittedModel::Ann(m) => m.predict(x),
            FittedModel::Ensemble(m) => m.predict(x),
        }
    }
}

/// Model record for one (property, family) pair
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Model {
    pub model_type: ModelType,
    pub property_name: String,
    /// Ordered feature names the model was trained on
    pub feature_names: Vec<String>,
    pub fitted: FittedModel,
}

impl Model {
    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        self.fitted.predict(x)
    }
}

/// Check a training matrix before handing it to a family
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(AnalysisError::ModelError)` on empty input, length mismatch or
///   non-finite values
pub fn validate_training_data(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), AnalysisError> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(AnalysisError::ModelError(
            "training matrix cannot be empty".to_string(),
        ));
    }

    if x.nrows() != y.len() {
        return Err(AnalysisError::ModelError(format!(
            "x rows ({}) must match y length ({})",
            x.nrows(),
            y.len()
        )));
    }

    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(AnalysisError::ModelError(
            "training data contains NaN or Inf values".to_string(),
        ));
    }

    Ok(())
}
