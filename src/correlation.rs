//! Feature × property correlation over the full dataset, significance
//! filtering and importance rankings.

use indexmap::IndexSet;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::stats::{complete_count, correlation_p_value, pearson, spearman};
use crate::training::TrainingResults;
use crate::utils::{validate_level, AnalysisError, Diagnostics, Warning, WarningKind};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationType {
    #[default]
    Spearman,
    Pearson,
}

impl CorrelationType {
    pub fn coefficient(self, x: &[f64], y: &[f64]) -> f64 {
        match self {
            CorrelationType::Spearman => spearman(x, y),
            CorrelationType::Pearson => pearson(x, y),
        }
    }
}

impl fmt::Display for CorrelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationType::Spearman => f.write_str("spearman"),
            CorrelationType::Pearson => f.write_str("pearson"),
        }
    }
}

impl FromStr for CorrelationType {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spearman" => Ok(CorrelationType::Spearman),
            "pearson" => Ok(CorrelationType::Pearson),
            other => Err(AnalysisError::ArgumentError(format!(
                "unknown correlation type '{}'",
                other
            ))),
        }
    }
}

/// Correlation coefficients, rows = features, columns = properties
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub correlation_type: CorrelationType,
    pub feature_names: Vec<String>,
    pub property_names: Vec<String>,
    pub coefficients: Array2<f64>,
    /// Pairwise-complete row counts behind each coefficient
    pub counts: Array2<usize>,
}

/// Pairwise-complete correlation of every feature column with every
/// property column
pub fn correlation_matrix(
    features: ArrayView2<f64>,
    properties: ArrayView2<f64>,
    feature_names: &[String],
    property_names: &[String],
    correlation_type: CorrelationType,
) -> CorrelationMatrix {
    let feature_cols: Vec<Vec<f64>> = features.columns().into_iter().map(|c| c.to_vec()).collect();
    let property_cols: Vec<Vec<f64>> = properties.columns().into_iter().map(|c| c.to_vec()).collect();
    let shape = (feature_cols.len(), property_cols.len());

    let coefficients = Array2::from_shape_fn(shape, |(i, j)| {
        correlation_type.coefficient(&feature_cols[i], &property_cols[j])
    });
    let counts = Array2::from_shape_fn(shape, |(i, j)| {
        complete_count(&feature_cols[i], &property_cols[j])
    });

    CorrelationMatrix {
        correlation_type,
        feature_names: feature_names.to_vec(),
        property_names: property_names.to_vec(),
        coefficients,
        counts,
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignificantPair {
    pub feature: String,
    pub property: String,
    pub coefficient: f64,
    pub p_value: f64,
}

/// Filtered correlation table with p-values
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrelationView {
    pub correlation_type: CorrelationType,
    pub feature_names: Vec<String>,
    pub property_names: Vec<String>,
    pub coefficients: Array2<f64>,
    pub p_values: Array2<f64>,
    /// Pairs with p below the significance level, strongest first
    pub significant: Vec<SignificantPair>,
    pub warnings: Vec<Warning>,
}

/// Recompute correlations on the stored matrices for a subset of names
///
/// Unknown names and an unknown correlation type warn; the type then falls
/// back to Spearman.
pub fn correlation_view(
    results: &TrainingResults,
    feature_filter: Option<&[String]>,
    property_filter: Option<&[String]>,
    correlation_type: &str,
    significance_level: f64,
) -> Result<CorrelationView, AnalysisError> {
    validate_level("significance_level", significance_level)?;
    let mut diag = Diagnostics::new();

    let kind = match correlation_type.parse::<CorrelationType>() {
        Ok(kind) => kind,
        Err(_) => {
            diag.warn(
                WarningKind::UnknownCorrelationType,
                format!("unknown correlation type '{}', using spearman", correlation_type),
            );
            CorrelationType::Spearman
        }
    };

    let features = select_names(&results.feature_names, feature_filter, "feature", &mut diag)?;
    let properties = select_names(&results.property_names, property_filter, "property", &mut diag)?;

    let x = results.features.select(ndarray::Axis(1), &features);
    let y = results.properties.select(ndarray::Axis(1), &properties);
    let feature_names: Vec<String> = features.iter().map(|&i| results.feature_names[i].clone()).collect();
    let property_names: Vec<String> = properties.iter().map(|&i| results.property_names[i].clone()).collect();

    let matrix = correlation_matrix(x.view(), y.view(), &feature_names, &property_names, kind);
    let p_values = Array2::from_shape_fn(matrix.coefficients.raw_dim(), |(i, j)| {
        correlation_p_value(matrix.coefficients[[i, j]], matrix.counts[[i, j]])
    });

    let mut significant: Vec<SignificantPair> = Vec::new();
    for ((i, j), &p) in p_values.indexed_iter() {
        if p.is_finite() && p < significance_level {
            significant.push(SignificantPair {
                feature: feature_names[i].clone(),
                property: property_names[j].clone(),
                coefficient: matrix.coefficients[[i, j]],
                p_value: p,
            });
        }
    }
    significant.sort_by(|a, b| b.coefficient.abs().total_cmp(&a.coefficient.abs()));

    Ok(CorrelationView {
        correlation_type: kind,
        feature_names,
        property_names,
        coefficients: matrix.coefficients,
        p_values,
        significant,
        warnings: diag.into_warnings(),
    })
}

/// Column indices of `names` kept by `filter`, in stored order
fn select_names(
    names: &[String],
    filter: Option<&[String]>,
    kind: &str,
    diag: &mut Diagnostics,
) -> Result<Vec<usize>, AnalysisError> {
    let Some(filter) = filter else {
        return Ok((0..names.len()).collect());
    };

    let wanted: IndexSet<&str> = filter.iter().map(String::as_str).collect();
    for name in &wanted {
        if !names.iter().any(|n| n == name) {
            diag.warn(WarningKind::UnknownName, format!("unknown {} name '{}' ignored", kind, name));
        }
    }

    let kept: Vec<usize> = names
        .iter()
        .enumerate()
        .filter(|(_, n)| wanted.contains(n.as_str()))
        .map(|(i, _)| i)
        .collect();
    if kept.is_empty() {
        return Err(AnalysisError::ArgumentError(format!(
            "no valid {} names left after filtering",
            kind
        )));
    }
    Ok(kept)
}

/// Top `n` features for a property by average importance, descending
pub fn top_features(results: &TrainingResults, property: &str, n: usize) -> Option<Vec<(String, f64)>> {
    let importance = results.feature_importance.get(property)?;
    let mut ranked: Vec<(String, f64)> = results
        .feature_names
        .iter()
        .cloned()
        .zip(importance.average.iter().copied())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(n);
    Some(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_matrix_shape_and_values() {
        let features = arr2(&[[1.0, 4.0], [2.0, 3.0], [3.0, 2.0], [4.0, 1.0]]);
        let properties = arr2(&[[10.0], [20.0], [30.0], [45.0]]);
        let m = correlation_matrix(
            features.view(),
            properties.view(),
            &names(&["a", "b"]),
            &names(&["p"]),
            CorrelationType::Spearman,
        );
        assert_eq!(m.coefficients.dim(), (2, 1));
        assert_abs_diff_eq!(m.coefficients[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.coefficients[[1, 0]], -1.0, epsilon = 1e-12);
        assert_eq!(m.counts[[0, 0]], 4);
    }

    #[test]
    fn test_pairwise_complete_skips_nan() {
        let features = arr2(&[[1.0], [2.0], [f64::NAN], [4.0]]);
        let properties = arr2(&[[2.0], [4.0], [100.0], [8.0]]);
        let m = correlation_matrix(
            features.view(),
            properties.view(),
            &names(&["a"]),
            &names(&["p"]),
            CorrelationType::Pearson,
        );
        assert_abs_diff_eq!(m.coefficients[[0, 0]], 1.0, epsilon = 1e-12);
        assert_eq!(m.counts[[0, 0]], 3);
    }

    #[test]
    fn test_type_parse() {
        assert_eq!("Pearson".parse::<CorrelationType>().unwrap(), CorrelationType::Pearson);
        assert!("kendall".parse::<CorrelationType>().is_err());
        assert_eq!(CorrelationType::default(), CorrelationType::Spearman);
    }

    #[test]
    fn test_select_names_keeps_stored_order() {
        let mut diag = Diagnostics::new();
        let stored = names(&["a", "b", "c"]);
        let filter = names(&["c", "a", "zzz"]);
        let kept = select_names(&stored, Some(&filter), "feature", &mut diag).unwrap();
        assert_eq!(kept, vec![0, 2]);
        assert_eq!(diag.count(WarningKind::UnknownName), 1);

        let none = names(&["zzz"]);
        assert!(select_names(&stored, Some(&none), "feature", &mut diag).is_err());
    }
}
