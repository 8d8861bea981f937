//! Feature importance: perturbation sensitivity, a rank-correlation
//! fallback, normalization and the cross-family average.

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

use crate::stats::{mean_std, spearman};
use crate::utils::normalize_weights;

/// Relative shift applied to one column, in units of its standard deviation
const PERTURBATION: f64 = 0.1;

/// Mean absolute change of the predictions when one column is nudged by
/// a tenth of its standard deviation
pub fn perturbation_importance<F>(x: ArrayView2<f64>, predict: F) -> Vec<f64>
where
    F: Fn(ArrayView2<f64>) -> Array1<f64>,
{
    let base = predict(x);
    let mut scores = Vec::with_capacity(x.ncols());

    for (j, column) in x.axis_iter(Axis(1)).enumerate() {
        let (_, std) = mean_std(&column.to_vec());
        let delta = if std.is_finite() { std * PERTURBATION } else { 0.0 };
        if delta == 0.0 {
            scores.push(0.0);
            continue;
        }

        let mut shifted = x.to_owned();
        shifted.column_mut(j).mapv_inplace(|v| v + delta);
        let moved = predict(shifted.view());

        let change = base
            .iter()
            .zip(moved.iter())
            .map(|(a, b)| (b - a).abs())
            .filter(|d| d.is_finite())
            .sum::<f64>()
            / x.nrows().max(1) as f64;
        scores.push(change);
    }

    scores
}

/// Absolute Spearman correlation of each column with the target, NaN as 0
pub fn spearman_importance(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Vec<f64> {
    let target = y.to_vec();
    x.axis_iter(Axis(1))
        .map(|column| {
            let r = spearman(&column.to_vec(), &target).abs();
            if r.is_finite() {
                r
            } else {
                0.0
            }
        })
        .collect()
}

/// Normalize raw importance to sum 1
///
/// Degenerate raw scores (no finite mass) fall back to the Spearman ranking,
/// then to a uniform split.
pub fn normalize_or_fallback(raw: &[f64], x: ArrayView2<f64>, y: ArrayView1<f64>) -> Vec<f64> {
    if let Some(weights) = normalize_weights(raw) {
        return weights;
    }
    if let Some(weights) = normalize_weights(&spearman_importance(x, y)) {
        return weights;
    }
    let p = x.ncols().max(1);
    vec![1.0 / p as f64; x.ncols()]
}

/// Average importance over families, matched by feature name
///
/// Each entry pairs a family's feature names with its normalized scores. A
/// feature absent from a family does not count towards that feature's mean.
pub fn average_importance(entries: &[(&[String], &[f64])], feature_names: &[String]) -> Vec<f64> {
    feature_names
        .iter()
        .map(|name| {
            let values: Vec<f64> = entries
                .iter()
                .filter_map(|(names, scores)| {
                    names
                        .iter()
                        .position(|n| n == name)
                        .and_then(|i| scores.get(i).copied())
                })
                .filter(|v| v.is_finite())
                .collect();
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_perturbation_tracks_used_columns() {
        let x = arr2(&[[1.0, 5.0], [2.0, 3.0], [3.0, 9.0], [4.0, 1.0]]);
        let scores = perturbation_importance(x.view(), |m| m.column(0).mapv(|v| 3.0 * v));
        assert!(scores[0] > 0.0);
        assert_eq!(scores[1], 0.0);
    }

    #[test]
    fn test_constant_column_scores_zero() {
        let x = arr2(&[[1.0, 2.0], [1.0, 3.0], [1.0, 4.0]]);
        let scores = perturbation_importance(x.view(), |m| m.column(0).to_owned());
        assert_eq!(scores[0], 0.0);
    }

    #[test]
    fn test_fallback_to_spearman() {
        let x = arr2(&[[1.0, 4.0], [2.0, 3.0], [3.0, 1.0], [4.0, 2.0]]);
        let y = arr1(&[10.0, 20.0, 30.0, 40.0]);
        let weights = normalize_or_fallback(&[0.0, 0.0], x.view(), y.view());
        assert_abs_diff_eq!(weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(weights[0] > weights[1]);
    }

    #[test]
    fn test_fallback_to_uniform() {
        let x = arr2(&[[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]);
        let y = arr1(&[1.0, 2.0, 3.0]);
        let weights = normalize_or_fallback(&[f64::NAN, f64::NAN], x.view(), y.view());
        assert_eq!(weights, vec![0.5, 0.5]);
    }

    #[test]
    fn test_average_matches_by_name() {
        let a_names = vec!["f1".to_string(), "f2".to_string()];
        let b_names = vec!["f2".to_string(), "f1".to_string()];
        let a = [0.8, 0.2];
        let b = [0.6, 0.4];
        let avg = average_importance(
            &[(&a_names[..], &a[..]), (&b_names[..], &b[..])],
            &a_names,
        );
        assert_abs_diff_eq!(avg[0], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(avg[1], 0.4, epsilon = 1e-12);
    }
}
