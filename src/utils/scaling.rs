use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::stats::mean_std;
use crate::utils::AnalysisError;

/// Column-wise z-score parameters: (x - mean) / std
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnScaler {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl ColumnScaler {
    /// Learn per-column mean and sample std, ignoring non-finite entries
    ///
    /// # Note
    /// Constant (or all-missing) columns get std 1.0 so they map to 0.0
    /// instead of dividing by zero.
    pub fn fit(matrix: ArrayView2<f64>) -> Self {
        let mut mean = Vec::with_capacity(matrix.ncols());
        let mut std = Vec::with_capacity(matrix.ncols());

        for col in matrix.columns() {
            let values: Vec<f64> = col.to_vec();
            let (m, s) = mean_std(&values);
            mean.push(if m.is_finite() { m } else { 0.0 });
            std.push(if s.is_finite() && s.abs() > f64::EPSILON { s } else { 1.0 });
        }

        Self { mean, std }
    }

    /// Identity scaler for `n` columns
    pub fn identity(n: usize) -> Self {
        Self {
            mean: vec![0.0; n],
            std: vec![1.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Apply the scaling to every column; NaN stays NaN
    pub fn transform(&self, matrix: ArrayView2<f64>) -> Result<Array2<f64>, AnalysisError> {
        if matrix.ncols() != self.len() {
            return Err(AnalysisError::ArgumentError(format!(
                "scaler has {} columns, matrix has {}",
                self.len(),
                matrix.ncols()
            )));
        }

        let mut scaled = matrix.to_owned();
        for (col_idx, mut col) in scaled.columns_mut().into_iter().enumerate() {
            let (m, s) = (self.mean[col_idx], self.std[col_idx]);
            col.mapv_inplace(|v| (v - m) / s);
        }
        Ok(scaled)
    }

    /// Scale a single column's values
    pub fn transform_column(&self, col_idx: usize, values: ArrayView1<f64>) -> Array1<f64> {
        let (m, s) = (self.mean[col_idx], self.std[col_idx]);
        values.mapv(|v| (v - m) / s)
    }

    /// Undo the scaling of a single column's values
    pub fn inverse_column(&self, col_idx: usize, values: ArrayView1<f64>) -> Array1<f64> {
        let (m, s) = (self.mean[col_idx], self.std[col_idx]);
        values.mapv(|v| v * s + m)
    }
}

/// Standardization record kept with a training run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Standardization {
    pub features: ColumnScaler,
    pub properties: ColumnScaler,
}

impl Standardization {
    /// Fit on the full feature and property matrices (before any fold split)
    pub fn fit(features: ArrayView2<f64>, properties: ArrayView2<f64>) -> Self {
        Self {
            features: ColumnScaler::fit(features),
            properties: ColumnScaler::fit(properties),
        }
    }
}
