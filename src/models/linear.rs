use linfa::prelude::*;
use linfa::Dataset;
use linfa_linear::LinearRegression;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{validate_training_data, FittedModel, ModelType, Regressor, TuneContext};
use crate::stats::t_test_p_value;
use crate::utils::{AnalysisError, ColumnScaler};

/// Entry threshold on a candidate term's p-value
const ENTER_P: f64 = 0.05;
/// Removal threshold on an included term's p-value
const REMOVE_P: f64 = 0.10;
const MAX_STEPS: usize = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearHyper {
    /// Stepwise term selection instead of the full ordinary fit
    pub stepwise: bool,
}

/// Least-squares linear model with per-term inference
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    /// One coefficient per feature column; excluded terms are 0
    pub coefficients: Vec<f64>,
    pub included: Vec<bool>,
    /// Two-sided t-test p-values; NaN for excluded terms
    pub p_values: Vec<f64>,
    pub residual_std: f64,
    pub aic: f64,
    pub stepwise: bool,
}

impl LinearModel {
    /// Coefficients expressed on the unscaled feature/property axes
    ///
    /// `features` are the feature scaler columns the model was trained on and
    /// `(y_mean, y_std)` the property scaling.
    pub fn destandardized(
        &self,
        features: &ColumnScaler,
        y_mean: f64,
        y_std: f64,
    ) -> (f64, Vec<f64>) {
        let coefficients: Vec<f64> = self
            .coefficients
            .iter()
            .enumerate()
            .map(|(j, b)| b * y_std / features.std[j])
            .collect();
        let shift: f64 = coefficients
            .iter()
            .enumerate()
            .map(|(j, b)| b * features.mean[j])
            .sum();
        (y_mean + y_std * self.intercept - shift, coefficients)
    }
}

struct OlsFit {
    intercept: f64,
    coefficients: Vec<f64>,
    p_values: Vec<f64>,
    residual_std: f64,
    aic: f64,
}

/// Ordinary least squares on a column subset, with t-test inference
fn ols(x: ArrayView2<f64>, y: ArrayView1<f64>, columns: &[usize]) -> Result<OlsFit, AnalysisError> {
    let n = x.nrows();
    let k = columns.len() + 1;

    let (intercept, coefficients) = if columns.is_empty() {
        (y.mean().unwrap_or(f64::NAN), Vec::new())
    } else {
        let sub = x.select(Axis(1), columns);
        let dataset = Dataset::new(sub, y.to_owned());
        match LinearRegression::default().fit(&dataset) {
            Ok(model) if model.params().iter().all(|b| b.is_finite()) => {
                (model.intercept(), model.params().to_vec())
            }
            Ok(_) => {
                debug!("normal equations are singular, using pseudo-inverse");
                least_squares_pinv(x, y, columns)?
            }
            Err(e) => {
                debug!("linfa least squares failed ({}), using pseudo-inverse", e);
                least_squares_pinv(x, y, columns)?
            }
        }
    };

    let design = DMatrix::from_fn(n, k, |i, j| if j == 0 { 1.0 } else { x[[i, columns[j - 1]]] });
    let mut beta = Vec::with_capacity(k);
    beta.push(intercept);
    beta.extend_from_slice(&coefficients);
    let beta = DVector::from_vec(beta);
    let target = DVector::from_iterator(n, y.iter().copied());

    let residuals = &target - &design * &beta;
    let sse = residuals.norm_squared();
    let dfe = n as f64 - k as f64;
    let sigma2 = if dfe > 0.0 { sse / dfe } else { f64::NAN };

    let xtx = design.transpose() * &design;
    let inverse = xtx
        .clone()
        .try_inverse()
        .or_else(|| xtx.pseudo_inverse(1e-12).ok());

    let p_values = (1..k)
        .map(|j| match &inverse {
            Some(inv) => {
                let se = (sigma2 * inv[(j, j)]).sqrt();
                t_test_p_value(beta[j] / se, dfe)
            }
            None => f64::NAN,
        })
        .collect();

    let aic = n as f64 * (sse / n as f64).max(f64::MIN_POSITIVE).ln() + 2.0 * k as f64;

    Ok(OlsFit {
        intercept,
        coefficients,
        p_values,
        residual_std: sigma2.sqrt(),
        aic,
    })
}

fn least_squares_pinv(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    columns: &[usize],
) -> Result<(f64, Vec<f64>), AnalysisError> {
    let n = x.nrows();
    let k = columns.len() + 1;
    let design = DMatrix::from_fn(n, k, |i, j| if j == 0 { 1.0 } else { x[[i, columns[j - 1]]] });
    let target = DVector::from_iterator(n, y.iter().copied());
    let beta = design
        .svd(true, true)
        .solve(&target, 1e-12)
        .map_err(|e| AnalysisError::ModelError(format!("linear regression failed: {}", e)))?;
    Ok((beta[0], beta.iter().skip(1).copied().collect()))
}

/// Bidirectional stepwise selection starting from the intercept-only model
fn stepwise(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(Vec<usize>, OlsFit), AnalysisError> {
    let n = x.nrows();
    let p = x.ncols();
    let mut included: Vec<usize> = Vec::new();
    let mut current = ols(x, y, &included)?;

    for step in 0..MAX_STEPS {
        let mut changed = false;

        if included.len() + 2 < n {
            let mut best: Option<(Vec<usize>, f64, OlsFit)> = None;
            for j in (0..p).filter(|j| !included.contains(j)) {
                let mut columns = included.clone();
                columns.push(j);
                columns.sort_unstable();
                let Ok(fit) = ols(x, y, &columns) else { continue };
                let pos = columns.iter().position(|&c| c == j).unwrap_or(0);
                let pj = fit.p_values[pos];
                if pj.is_finite() && best.as_ref().map_or(true, |(_, bp, _)| pj < *bp) {
                    best = Some((columns, pj, fit));
                }
            }
            if let Some((columns, pj, fit)) = best {
                if pj <= ENTER_P && fit.aic <= current.aic {
                    debug!(step, p_value = pj, "stepwise: term added");
                    included = columns;
                    current = fit;
                    changed = true;
                }
            }
        }

        let worst = current
            .p_values
            .iter()
            .enumerate()
            .map(|(pos, &pv)| (pos, if pv.is_finite() { pv } else { 1.0 }))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((pos, pv)) = worst {
            if pv >= REMOVE_P {
                debug!(step, p_value = pv, "stepwise: term removed");
                included.remove(pos);
                current = ols(x, y, &included)?;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    Ok((included, current))
}

impl Regressor for LinearModel {
    const KIND: ModelType = ModelType::Regression;
    type Hyper = LinearHyper;

    fn default_hyper(_x: ArrayView2<f64>, _y: ArrayView1<f64>) -> LinearHyper {
        LinearHyper { stepwise: false }
    }

    fn tune(
        _x: ArrayView2<f64>,
        _y: ArrayView1<f64>,
        _ctx: &mut TuneContext,
    ) -> Result<LinearHyper, AnalysisError> {
        Ok(LinearHyper { stepwise: true })
    }

    fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        hyper: &LinearHyper,
        _rng: &mut ChaCha8Rng,
    ) -> Result<Self, AnalysisError> {
        validate_training_data(x, y)?;
        let p = x.ncols();

        let (columns, fit) = if hyper.stepwise {
            stepwise(x, y)?
        } else {
            let all: Vec<usize> = (0..p).collect();
            let fit = ols(x, y, &all)?;
            (all, fit)
        };

        let mut coefficients = vec![0.0; p];
        let mut p_values = vec![f64::NAN; p];
        let mut included = vec![false; p];
        for (pos, &j) in columns.iter().enumerate() {
            coefficients[j] = fit.coefficients[pos];
            p_values[j] = fit.p_values[pos];
            included[j] = true;
        }

        if coefficients.iter().any(|c| !c.is_finite()) || !fit.intercept.is_finite() {
            return Err(AnalysisError::ModelError(
                "linear regression produced non-finite coefficients".to_string(),
            ));
        }

        Ok(LinearModel {
            intercept: fit.intercept,
            coefficients,
            included,
            p_values,
            residual_std: fit.residual_std,
            aic: fit.aic,
            stepwise: hyper.stepwise,
        })
    }

    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let coefficients = Array1::from(self.coefficients.clone());
        x.dot(&coefficients) + self.intercept
    }

    fn importance(&self, _x: ArrayView2<f64>, _y: ArrayView1<f64>) -> Vec<f64> {
        self.coefficients.iter().map(|c| c.abs()).collect()
    }

    fn into_fitted(self) -> FittedModel {
        FittedModel::Regression(self)
    }
}
