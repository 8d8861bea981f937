//! Nan-aware descriptive statistics, rank correlation and the reference
//! distributions used for p-values and confidence intervals.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use crate::utils::AnalysisError;

/// Summary statistics for one named column, ignoring non-finite entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub field: String,
    pub count: usize,
    pub missing: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Statistics {
    /// Compute statistics for a column; `None` when no finite value exists
    pub fn compute(field: &str, values: ArrayView1<f64>) -> Option<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();

        if finite.is_empty() {
            return None;
        }

        let (mean, std) = mean_std(&finite);
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(Statistics {
            field: field.to_string(),
            count: finite.len(),
            missing: values.len() - finite.len(),
            mean,
            std,
            min,
            max,
        })
    }
}

/// Mean and sample standard deviation (N-1) of finite values
///
/// Returns `(NaN, NaN)` for no finite values and a zero std for a single one.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let n = finite.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }

    let mean = finite.iter().sum::<f64>() / n as f64;
    if n == 1 {
        return (mean, 0.0);
    }

    let ss: f64 = finite.iter().map(|v| (v - mean).powi(2)).sum();
    (mean, (ss / (n - 1) as f64).sqrt())
}

/// Interquartile range with linear interpolation between order statistics
pub fn iqr(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.len() < 2 {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&sorted, 0.75) - quantile_sorted(&sorted, 0.25)
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Fractional ranks (1-based), ties share the average rank
pub fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut result = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            result[idx] = avg;
        }
        i = j + 1;
    }
    result
}

/// Keep only the positions where both values are finite
pub fn pairwise_complete(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .unzip()
}

/// Pearson product-moment correlation; NaN when either side is constant
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let (x, y) = pairwise_complete(x, y);
    let n = x.len();
    if n < 2 {
        return f64::NAN;
    }

    let mx = x.iter().sum::<f64>() / n as f64;
    let my = y.iter().sum::<f64>() / n as f64;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }

    if sxx <= 0.0 || syy <= 0.0 {
        return f64::NAN;
    }
    (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
}

/// Spearman rank correlation (Pearson on fractional ranks)
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    let (x, y) = pairwise_complete(x, y);
    if x.len() < 2 {
        return f64::NAN;
    }
    pearson(&ranks(&x), &ranks(&y))
}

/// Number of rows usable for a pairwise-complete correlation
pub fn complete_count(x: &[f64], y: &[f64]) -> usize {
    x.iter()
        .zip(y.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .count()
}

/// Two-sided critical value z = Φ⁻¹(1 − α/2) for a confidence level
pub fn normal_critical_value(confidence_level: f64) -> Result<f64, AnalysisError> {
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| AnalysisError::ModelError(format!("normal distribution: {}", e)))?;
    let alpha = 1.0 - confidence_level;
    Ok(normal.inverse_cdf(1.0 - alpha / 2.0))
}

/// Two-sided p-value of a t statistic
pub fn t_test_p_value(t: f64, df: f64) -> f64 {
    if !t.is_finite() || df <= 0.0 {
        return if t.is_infinite() { 0.0 } else { f64::NAN };
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => f64::NAN,
    }
}

/// Two-sided p-value for a correlation coefficient over `n` complete pairs
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if !r.is_finite() || n < 3 {
        return f64::NAN;
    }
    if r.abs() >= 1.0 {
        return 0.0;
    }
    let df = (n - 2) as f64;
    let t = r * (df / (1.0 - r * r)).sqrt();
    t_test_p_value(t, df)
}
