use linfa::prelude::*;
use linfa::Dataset;
use linfa_svm::Svm;
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::tuning::{log_uniform, random_search};
use super::{validate_training_data, FittedModel, ModelType, Regressor, TuneContext};
use crate::stats::iqr;
use crate::utils::AnalysisError;

/// Kernel choice; the gaussian scale `s` gives k(a, b) = exp(-|a - b|² / s²)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SvmKernel {
    Linear,
    Gaussian { scale: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SvmHyper {
    pub box_constraint: f64,
    pub epsilon: f64,
    pub kernel: SvmKernel,
}

/// Epsilon-insensitive support vector regression
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SvmModel {
    pub hyper: SvmHyper,
    svm: Svm<f64, f64>,
}

/// Robust spread of the target: IQR / 1.349, or 1 when the IQR is zero
fn target_spread(y: ArrayView1<f64>) -> f64 {
    let spread = iqr(&y.to_vec()) / 1.349;
    if spread.is_finite() && spread > 0.0 {
        spread
    } else {
        1.0
    }
}

impl Regressor for SvmModel {
    const KIND: ModelType = ModelType::Svm;
    type Hyper = SvmHyper;

    fn default_hyper(_x: ArrayView2<f64>, y: ArrayView1<f64>) -> SvmHyper {
        let epsilon = iqr(&y.to_vec()) / 13.49;
        SvmHyper {
            box_constraint: 1.0,
            epsilon: if epsilon.is_finite() && epsilon > 0.0 { epsilon } else { 0.1 },
            kernel: SvmKernel::Gaussian { scale: 1.0 },
        }
    }

    fn tune(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        ctx: &mut TuneContext,
    ) -> Result<SvmHyper, AnalysisError> {
        let spread = target_spread(y);
        random_search::<Self, _>(x, y, ctx, |rng| {
            let kernel = if rng.gen_bool(0.5) {
                SvmKernel::Linear
            } else {
                SvmKernel::Gaussian {
                    scale: log_uniform(rng, -3.0, 3.0),
                }
            };
            SvmHyper {
                box_constraint: log_uniform(rng, -3.0, 3.0),
                epsilon: log_uniform(rng, -3.0, 2.0) * spread,
                kernel,
            }
        })
    }

    fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        hyper: &SvmHyper,
        _rng: &mut ChaCha8Rng,
    ) -> Result<Self, AnalysisError> {
        validate_training_data(x, y)?;

        let dataset = Dataset::new(x.to_owned(), y.to_owned());
        let params = Svm::<f64, f64>::params().c_svr(hyper.box_constraint, Some(hyper.epsilon));
        let params = match hyper.kernel {
            SvmKernel::Linear => params.linear_kernel(),
            SvmKernel::Gaussian { scale } => params.gaussian_kernel(scale * scale),
        };

        let svm = params
            .fit(&dataset)
            .map_err(|e| AnalysisError::ModelError(format!("svm regression failed: {}", e)))?;

        Ok(SvmModel { hyper: *hyper, svm })
    }

    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        self.svm.predict(&x)
    }

    fn into_fitted(self) -> FittedModel {
        FittedModel::Svm(self)
    }
}
