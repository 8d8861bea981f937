//! Property prediction for new samples with normal-theory intervals.

use indexmap::IndexMap;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::dataset::Sample;
use crate::features::extract_with_names;
use crate::models::{Model, ModelType};
use crate::stats::normal_critical_value;
use crate::training::{TrainedModels, TrainingResults};
use crate::utils::{validate_level, AnalysisError, Diagnostics, Warning, WarningKind};

/// Which family to predict with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSelection {
    /// Highest mean cross-validated R²
    #[default]
    Best,
    Family(ModelType),
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSelection::Best => f.write_str("best"),
            ModelSelection::Family(kind) => write!(f, "{}", kind),
        }
    }
}

impl FromStr for ModelSelection {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("best") {
            return Ok(ModelSelection::Best);
        }
        s.parse::<ModelType>().map(ModelSelection::Family)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictOptions {
    pub model_type: ModelSelection,
    pub confidence_interval: bool,
    pub confidence_level: f64,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            model_type: ModelSelection::Best,
            confidence_interval: true,
            confidence_level: 0.95,
        }
    }
}

/// Point predictions for one property, one value per sample
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PropertyPrediction {
    pub model_type: ModelType,
    pub values: Vec<f64>,
}

/// Two-sided interval around each prediction, in property units
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfidenceBand {
    pub level: f64,
    /// Standard error in the space the model was fit in
    pub std_error: f64,
    pub half_width: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PredictionOutput {
    pub sample_ids: Vec<String>,
    pub predictions: IndexMap<String, PropertyPrediction>,
    pub confidence: IndexMap<String, ConfidenceBand>,
    pub warnings: Vec<Warning>,
}

/// Predict every trained property for `samples`
///
/// # Returns
/// * `Ok(PredictionOutput)` - properties without a usable model are absent
///   and reported in `warnings`
/// * `Err(AnalysisError::ArgumentError)` - empty sample set or a confidence
///   level outside (0, 1)
pub fn predict_properties(
    samples: &[Sample],
    models: &TrainedModels,
    results: &TrainingResults,
    options: &PredictOptions,
) -> Result<PredictionOutput, AnalysisError> {
    if samples.is_empty() {
        return Err(AnalysisError::ArgumentError("sample set is empty".to_string()));
    }
    let z = if options.confidence_interval {
        validate_level("confidence_level", options.confidence_level)?;
        Some(normal_critical_value(options.confidence_level)?)
    } else {
        None
    };

    let mut diag = Diagnostics::new();
    let extraction = extract_with_names(samples, &results.feature_names, &[])?;
    diag.absorb(extraction.warnings);
    let x = scale_features(extraction.features, results, &mut diag);

    let mut predictions = IndexMap::new();
    let mut confidence = IndexMap::new();

    for (prop_idx, property) in results.property_names.iter().enumerate() {
        let Some(family_models) = models.get(property) else {
            diag.warn(WarningKind::MissingModel, format!("no trained model for '{}'", property));
            continue;
        };
        let Some(model) = select_model(property, family_models, results, options.model_type, &mut diag) else {
            continue;
        };

        let inputs = align_columns(&x, model, &results.feature_names, &mut diag);
        let fitted_space = predict_complete_rows(model, &inputs, property, &mut diag);
        let values = destandardize(&fitted_space, prop_idx, results);

        if let Some(z) = z {
            let std_error = results
                .metrics(property, model.model_type)
                .map_or(f64::NAN, |m| m.std_error(model.model_type == ModelType::Regression));
            let half = z * std_error;
            let lower = destandardize(&fitted_space.mapv(|v| v - half), prop_idx, results);
            let upper = destandardize(&fitted_space.mapv(|v| v + half), prop_idx, results);
            let half_width = lower
                .iter()
                .zip(upper.iter())
                .map(|(lo, hi)| (hi - lo) / 2.0)
                .collect();
            confidence.insert(
                property.clone(),
                ConfidenceBand {
                    level: options.confidence_level,
                    std_error,
                    half_width,
                    lower: lower.to_vec(),
                    upper: upper.to_vec(),
                },
            );
        }

        predictions.insert(
            property.clone(),
            PropertyPrediction {
                model_type: model.model_type,
                values: values.to_vec(),
            },
        );
    }

    info!(
        samples = samples.len(),
        "predicted {} properties for {} samples",
        predictions.len(),
        samples.len()
    );

    Ok(PredictionOutput {
        sample_ids: samples.iter().map(|s| s.id.clone()).collect(),
        predictions,
        confidence,
        warnings: diag.into_warnings(),
    })
}

/// Apply the recorded feature scaling column by column
fn scale_features(features: Array2<f64>, results: &TrainingResults, diag: &mut Diagnostics) -> Array2<f64> {
    let Some(standardization) = &results.standardization else {
        return features;
    };
    let scaler = &standardization.features;
    if scaler.len() != features.ncols() {
        diag.warn(
            WarningKind::FeatureMismatch,
            format!(
                "standardization covers {} features, expected {}",
                scaler.len(),
                features.ncols()
            ),
        );
    }

    let mut scaled = features;
    for (j, mut column) in scaled.axis_iter_mut(Axis(1)).enumerate() {
        if j < scaler.len() {
            let transformed = scaler.transform_column(j, column.view());
            column.assign(&transformed);
        }
    }
    scaled
}

/// Pick the family to predict with
fn select_model<'a>(
    property: &str,
    family_models: &'a IndexMap<ModelType, Model>,
    results: &TrainingResults,
    selection: ModelSelection,
    diag: &mut Diagnostics,
) -> Option<&'a Model> {
    match selection {
        ModelSelection::Family(kind) => {
            let model = family_models.get(&kind);
            if model.is_none() {
                diag.warn(
                    WarningKind::MissingModel,
                    format!("no {} model for '{}', property skipped", kind, property),
                );
            }
            model
        }
        ModelSelection::Best => {
            let mut best: Option<(&Model, f64)> = None;
            for (kind, model) in family_models {
                let r2 = results
                    .metrics(property, *kind)
                    .map(|m| m.r2_mean)
                    .filter(|r2| r2.is_finite())
                    .unwrap_or(f64::NEG_INFINITY);
                if best.map_or(true, |(_, b)| r2 > b) {
                    best = Some((model, r2));
                }
            }
            if best.is_none() {
                diag.warn(WarningKind::MissingModel, format!("no trained model for '{}'", property));
            }
            best.map(|(model, _)| model)
        }
    }
}

/// Reorder the extracted columns to the model's own feature list
fn align_columns(
    x: &Array2<f64>,
    model: &Model,
    feature_names: &[String],
    diag: &mut Diagnostics,
) -> Array2<f64> {
    if model.feature_names == feature_names {
        return x.clone();
    }
    diag.warn(
        WarningKind::FeatureMismatch,
        format!(
            "{} model for '{}' was trained on {} features, results list {}; matching by name",
            model.model_type,
            model.property_name,
            model.feature_names.len(),
            feature_names.len()
        ),
    );

    let mut aligned = Array2::from_elem((x.nrows(), model.feature_names.len()), f64::NAN);
    for (j, name) in model.feature_names.iter().enumerate() {
        if let Some(src) = feature_names.iter().position(|n| n == name) {
            aligned.column_mut(j).assign(&x.column(src));
        }
    }
    aligned
}

/// Predict rows whose inputs are all finite; others are NaN
fn predict_complete_rows(model: &Model, x: &Array2<f64>, property: &str, diag: &mut Diagnostics) -> Array1<f64> {
    let complete: Vec<usize> = (0..x.nrows())
        .filter(|&r| x.row(r).iter().all(|v| v.is_finite()))
        .collect();
    if complete.len() < x.nrows() {
        diag.warn(
            WarningKind::MissingValues,
            format!(
                "'{}': {} of {} samples have missing inputs and predict NaN",
                property,
                x.nrows() - complete.len(),
                x.nrows()
            ),
        );
    }

    let mut out = Array1::from_elem(x.nrows(), f64::NAN);
    if complete.is_empty() {
        return out;
    }
    let pred = model.predict(x.select(Axis(0), &complete).view());
    for (&row, &p) in complete.iter().zip(pred.iter()) {
        out[row] = p;
    }
    out
}

fn destandardize(values: &Array1<f64>, prop_idx: usize, results: &TrainingResults) -> Array1<f64> {
    match &results.standardization {
        Some(s) if prop_idx < s.properties.len() => s.properties.inverse_column(prop_idx, values.view()),
        _ => values.clone(),
    }
}
