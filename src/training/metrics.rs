use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use super::partition::Partition;
use crate::models::FittedModel;
use crate::stats::mean_std;

/// Held-out scores for one fold
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FoldScore {
    pub rmse: f64,
    pub r2: f64,
    pub mae: f64,
}

/// RMSE, R² and MAE of predictions against targets
///
/// R² is NaN when the targets have no spread (single-row or constant fold).
pub fn score(y: ArrayView1<f64>, y_hat: ArrayView1<f64>) -> FoldScore {
    let n = y.len();
    if n == 0 {
        return FoldScore {
            rmse: f64::NAN,
            r2: f64::NAN,
            mae: f64::NAN,
        };
    }

    let mean = y.sum() / n as f64;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    let mut abs = 0.0;
    for (t, p) in y.iter().zip(y_hat.iter()) {
        ss_res += (t - p).powi(2);
        ss_tot += (t - mean).powi(2);
        abs += (t - p).abs();
    }

    FoldScore {
        rmse: (ss_res / n as f64).sqrt(),
        r2: if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { f64::NAN },
        mae: abs / n as f64,
    }
}

/// Cross-validated metrics for one (property, family) pair
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metrics {
    pub rmse_mean: f64,
    pub rmse_std: f64,
    pub r2_mean: f64,
    pub r2_std: f64,
    pub mae_mean: f64,
    pub mae_std: f64,
    pub fold_scores: Vec<FoldScore>,
    /// R² of all out-of-fold predictions pooled together
    pub pooled_r2: f64,
    pub fold_models: Vec<FittedModel>,
    pub partition: Partition,
    pub n_samples: usize,
}

impl Metrics {
    /// Aggregate fold scores; std is the sample std across folds (0 for a
    /// single fold)
    ///
    /// When any fold has an undefined R² (too few or constant held-out
    /// targets) the pooled out-of-fold R² stands in for the mean.
    pub fn from_folds(
        fold_scores: Vec<FoldScore>,
        pooled_r2: f64,
        fold_models: Vec<FittedModel>,
        partition: Partition,
        n_samples: usize,
    ) -> Self {
        let column = |f: fn(&FoldScore) -> f64| -> (f64, f64) {
            let values: Vec<f64> = fold_scores.iter().map(f).collect();
            mean_std(&values)
        };
        let (rmse_mean, rmse_std) = column(|s| s.rmse);
        let (mae_mean, mae_std) = column(|s| s.mae);
        let (mut r2_mean, mut r2_std) = column(|s| s.r2);

        if fold_scores.iter().any(|s| !s.r2.is_finite()) {
            r2_mean = pooled_r2;
            if !r2_std.is_finite() {
                r2_std = 0.0;
            }
        }

        Metrics {
            rmse_mean,
            rmse_std,
            r2_mean,
            r2_std,
            mae_mean,
            mae_std,
            fold_scores,
            pooled_r2,
            fold_models,
            partition,
            n_samples,
        }
    }

    /// Standard error used for prediction intervals
    ///
    /// Regression uses the fold RMSE spread when it is usable; otherwise the
    /// mean RMSE, then 1.25 × mean MAE.
    pub fn std_error(&self, use_rmse_std: bool) -> f64 {
        if use_rmse_std && self.rmse_std.is_finite() && self.rmse_std > 0.0 {
            return self.rmse_std;
        }
        if self.rmse_mean.is_finite() && self.rmse_mean > 0.0 {
            return self.rmse_mean;
        }
        1.25 * self.mae_mean
    }
}
