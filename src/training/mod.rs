//! Cross-validated training of every requested model family for every
//! target property.
//!
//! Each (property, family) pair is an independent task on a rayon pool. A
//! task owns its copy of the property's partition, its own RNG stream and
//! its output slot; aggregation happens after all tasks have returned.

pub mod metrics;
pub mod partition;

use indexmap::IndexMap;
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, info};

use crate::correlation::{correlation_matrix, CorrelationMatrix, CorrelationType};
use crate::dataset::Sample;
use crate::features::extract_features;
use crate::models::importance::{average_importance, normalize_or_fallback};
use crate::models::{
    LinearModel, Model, ModelType, NeuralNet, Regressor, SvmModel, TreeEnsemble, TuneContext,
};
use crate::utils::{
    AnalysisError, CancellationToken, Diagnostics, Standardization, Warning, WarningKind,
};

pub use metrics::{score, FoldScore, Metrics};
pub use partition::{Partition, ValidationMethod};

/// Fewest samples (and usable rows per property) that can be cross-validated
pub const MIN_SAMPLES: usize = 3;

/// Training configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    pub target_properties: Option<Vec<String>>,
    pub input_features: Option<Vec<String>>,
    /// Family names; unknown names are skipped with a warning
    pub model_types: Vec<String>,
    pub validation_method: ValidationMethod,
    /// k for k-fold, held-out fraction for holdout; `None` uses 5 / 0.2
    pub validation_param: Option<f64>,
    pub standardize: bool,
    pub optimize_hyperparams: bool,
    pub search_evaluations: usize,
    pub correlation_type: CorrelationType,
    pub seed: u64,
    /// Worker threads; `None` lets rayon decide
    pub threads: Option<usize>,
    pub timeout_secs: Option<u64>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            target_properties: None,
            input_features: None,
            model_types: vec!["regression".into(), "svm".into(), "ann".into()],
            validation_method: ValidationMethod::KFold,
            validation_param: None,
            standardize: true,
            optimize_hyperparams: true,
            search_evaluations: 30,
            correlation_type: CorrelationType::Spearman,
            seed: 42,
            threads: None,
            timeout_secs: None,
        }
    }
}

impl TrainOptions {
    pub fn validation_param(&self) -> f64 {
        self.validation_param.unwrap_or(match self.validation_method {
            ValidationMethod::KFold => 5.0,
            ValidationMethod::Holdout => 0.2,
        })
    }
}

/// Fitted models keyed by property, then family
pub type TrainedModels = IndexMap<String, IndexMap<ModelType, Model>>;

/// Normalized importance per family plus the cross-family average
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PropertyImportance {
    pub by_model: IndexMap<ModelType, Vec<f64>>,
    pub average: Vec<f64>,
}

/// Everything a training run records besides the models themselves
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainingResults {
    pub feature_names: Vec<String>,
    pub property_names: Vec<String>,
    /// Unscaled extracted matrices
    pub features: Array2<f64>,
    pub properties: Array2<f64>,
    pub standardization: Option<Standardization>,
    pub model_metrics: IndexMap<String, IndexMap<ModelType, Metrics>>,
    pub feature_importance: IndexMap<String, PropertyImportance>,
    pub correlation: CorrelationMatrix,
    pub options: TrainOptions,
    pub warnings: Vec<Warning>,
}

impl TrainingResults {
    pub fn metrics(&self, property: &str, model_type: ModelType) -> Option<&Metrics> {
        self.model_metrics.get(property)?.get(&model_type)
    }

    pub fn property_index(&self, property: &str) -> Option<usize> {
        self.property_names.iter().position(|p| p == property)
    }
}

/// Complete rows of one property, ready for cross-validation
struct PropertyData {
    name: String,
    index: usize,
    x: Array2<f64>,
    y: Array1<f64>,
    partition: Partition,
}

struct FamilyOutcome {
    model: Model,
    metrics: Metrics,
    importance: Vec<f64>,
}

/// Train with the options' timeout (if any) as the only cancellation source
pub fn train_models(
    samples: &[Sample],
    options: &TrainOptions,
) -> Result<(TrainedModels, TrainingResults), AnalysisError> {
    let cancel = match options.timeout_secs {
        Some(secs) => CancellationToken::with_timeout(Duration::from_secs(secs)),
        None => CancellationToken::new(),
    };
    train_models_with_cancel(samples, options, &cancel)
}

/// Train every requested family for every target property
///
/// # Returns
/// * `Ok((models, results))` - families that failed are absent and reported
///   in `results.warnings`
/// * `Err(AnalysisError::ArgumentError)` - fewer than 3 samples, nothing to
///   train on, or invalid validation settings
/// * `Err(AnalysisError::Cancelled)` - the token tripped
pub fn train_models_with_cancel(
    samples: &[Sample],
    options: &TrainOptions,
    cancel: &CancellationToken,
) -> Result<(TrainedModels, TrainingResults), AnalysisError> {
    if samples.len() < MIN_SAMPLES {
        return Err(AnalysisError::ArgumentError(format!(
            "at least {} samples are required for training, got {}",
            MIN_SAMPLES,
            samples.len()
        )));
    }

    let mut diag = Diagnostics::new();
    let model_types = resolve_model_types(&options.model_types, &mut diag)?;

    let extraction = extract_features(
        samples,
        options.target_properties.as_deref(),
        options.input_features.as_deref(),
    )?;
    diag.absorb(extraction.warnings.clone());
    let feature_names = extraction.feature_names.clone();
    let property_names = extraction.property_names.clone();

    if feature_names.is_empty() {
        return Err(AnalysisError::ArgumentError("no features to train on".to_string()));
    }
    if property_names.is_empty() {
        return Err(AnalysisError::ArgumentError("no target properties to train".to_string()));
    }

    // fitted on the whole set before any fold split
    let standardization = options
        .standardize
        .then(|| Standardization::fit(extraction.features.view(), extraction.properties.view()));
    let (x_all, y_all) = match &standardization {
        Some(s) => (
            s.features.transform(extraction.features.view())?,
            s.properties.transform(extraction.properties.view())?,
        ),
        None => (extraction.features.clone(), extraction.properties.clone()),
    };

    let mut data = Vec::with_capacity(property_names.len());
    for (index, name) in property_names.iter().enumerate() {
        if let Some(prepared) = prepare_property(name, index, &x_all, &y_all, options, &mut diag)? {
            data.push(prepared);
        }
    }
    cancel.check("training setup")?;

    let tasks: Vec<(usize, ModelType)> = (0..data.len())
        .flat_map(|p| model_types.iter().map(move |&kind| (p, kind)))
        .collect();
    debug!(tasks = tasks.len(), "dispatching training tasks");

    let pool = build_pool(options.threads)?;
    let outcomes: Vec<Result<FamilyOutcome, AnalysisError>> = pool.install(|| {
        tasks
            .par_iter()
            .map(|&(p, kind)| run_task(&data[p], kind, &feature_names, options, cancel))
            .collect()
    });

    let names: Vec<&str> = data.iter().map(|d| d.name.as_str()).collect();
    let Aggregated {
        models,
        model_metrics,
        mut feature_importance,
    } = aggregate(&names, &tasks, outcomes, &mut diag)?;

    for importance in feature_importance.values_mut() {
        let entries: Vec<(&[String], &[f64])> = importance
            .by_model
            .values()
            .map(|scores| (feature_names.as_slice(), scores.as_slice()))
            .collect();
        importance.average = average_importance(&entries, &feature_names);
    }

    let correlation = correlation_matrix(
        extraction.features.view(),
        extraction.properties.view(),
        &feature_names,
        &property_names,
        options.correlation_type,
    );

    let trained: usize = models.values().map(|m| m.len()).sum();
    info!(
        warnings = diag.warnings().len(),
        "trained {} models for {} properties",
        trained,
        models.len()
    );

    let results = TrainingResults {
        feature_names,
        property_names,
        features: extraction.features,
        properties: extraction.properties,
        standardization,
        model_metrics,
        feature_importance,
        correlation,
        options: options.clone(),
        warnings: diag.into_warnings(),
    };
    Ok((models, results))
}

fn resolve_model_types(requested: &[String], diag: &mut Diagnostics) -> Result<Vec<ModelType>, AnalysisError> {
    let mut kinds = Vec::new();
    for name in requested {
        match name.parse::<ModelType>() {
            Ok(kind) if !kinds.contains(&kind) => kinds.push(kind),
            Ok(_) => {}
            Err(_) => diag.warn(
                WarningKind::UnknownModelType,
                format!("unknown model type '{}' skipped", name),
            ),
        }
    }
    if kinds.is_empty() {
        return Err(AnalysisError::ArgumentError(
            "no valid model types requested".to_string(),
        ));
    }
    Ok(kinds)
}

/// Keep rows with a finite target and finite features, then partition them
fn prepare_property(
    name: &str,
    index: usize,
    x_all: &Array2<f64>,
    y_all: &Array2<f64>,
    options: &TrainOptions,
    diag: &mut Diagnostics,
) -> Result<Option<PropertyData>, AnalysisError> {
    let target = y_all.column(index);
    let rows: Vec<usize> = (0..x_all.nrows())
        .filter(|&r| target[r].is_finite() && x_all.row(r).iter().all(|v| v.is_finite()))
        .collect();

    if rows.len() < x_all.nrows() {
        diag.warn(
            WarningKind::MissingValues,
            format!(
                "property '{}': {} of {} rows dropped for missing values",
                name,
                x_all.nrows() - rows.len(),
                x_all.nrows()
            ),
        );
    }
    if rows.len() < MIN_SAMPLES {
        diag.warn(
            WarningKind::PropertySkipped,
            format!("property '{}' skipped: only {} usable rows", name, rows.len()),
        );
        return Ok(None);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(task_seed(options.seed, index, None));
    let partition = Partition::build(
        options.validation_method,
        options.validation_param(),
        rows.len(),
        &mut rng,
        diag,
    )?;

    Ok(Some(PropertyData {
        name: name.to_string(),
        index,
        x: x_all.select(Axis(0), &rows),
        y: target.select(Axis(0), &rows),
        partition,
    }))
}

/// Independent RNG stream per (seed, property, family)
fn task_seed(seed: u64, property: usize, kind: Option<ModelType>) -> u64 {
    let family = kind.map_or(0, |k| k as u64 + 1);
    seed ^ (property as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ family.wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
}

fn build_pool(threads: Option<usize>) -> Result<rayon::ThreadPool, AnalysisError> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| AnalysisError::ModelError(format!("failed to start worker pool: {}", e)))
}

struct Aggregated {
    models: TrainedModels,
    model_metrics: IndexMap<String, IndexMap<ModelType, Metrics>>,
    feature_importance: IndexMap<String, PropertyImportance>,
}

/// Fold task outcomes into per-property maps
///
/// A failed family is dropped with a `FamilyFailed` warning; the other
/// families and properties are kept. Cancellation aborts the whole run.
fn aggregate(
    names: &[&str],
    tasks: &[(usize, ModelType)],
    outcomes: Vec<Result<FamilyOutcome, AnalysisError>>,
    diag: &mut Diagnostics,
) -> Result<Aggregated, AnalysisError> {
    let mut models: TrainedModels = IndexMap::new();
    let mut model_metrics: IndexMap<String, IndexMap<ModelType, Metrics>> = IndexMap::new();
    let mut feature_importance: IndexMap<String, PropertyImportance> = IndexMap::new();

    for (&(p, kind), outcome) in tasks.iter().zip(outcomes) {
        let name = names[p];
        match outcome {
            Ok(outcome) => {
                models.entry(name.to_string()).or_default().insert(kind, outcome.model);
                model_metrics.entry(name.to_string()).or_default().insert(kind, outcome.metrics);
                feature_importance
                    .entry(name.to_string())
                    .or_default()
                    .by_model
                    .insert(kind, outcome.importance);
            }
            Err(AnalysisError::Cancelled(msg)) => return Err(AnalysisError::Cancelled(msg)),
            Err(e) => diag.warn(
                WarningKind::FamilyFailed,
                format!("{} model for '{}' failed: {}", kind, name, e),
            ),
        }
    }

    Ok(Aggregated {
        models,
        model_metrics,
        feature_importance,
    })
}

/// Run one family on one property; panics become a `ModelError`
fn run_task(
    data: &PropertyData,
    kind: ModelType,
    feature_names: &[String],
    options: &TrainOptions,
    cancel: &CancellationToken,
) -> Result<FamilyOutcome, AnalysisError> {
    let seed = task_seed(options.seed, data.index, Some(kind));
    isolated(kind, || match kind {
        ModelType::Regression => train_family::<LinearModel>(data, feature_names, options, seed, cancel),
        ModelType::Svm => train_family::<SvmModel>(data, feature_names, options, seed, cancel),
        ModelType::Ann => train_family::<NeuralNet>(data, feature_names, options, seed, cancel),
        ModelType::Ensemble => train_family::<TreeEnsemble>(data, feature_names, options, seed, cancel),
    })
}

fn isolated<T>(
    kind: ModelType,
    task: impl FnOnce() -> Result<T, AnalysisError>,
) -> Result<T, AnalysisError> {
    catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|payload| {
        Err(AnalysisError::ModelError(format!(
            "{} training panicked: {}",
            kind,
            panic_message(payload.as_ref())
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Cross-validate one family on the shared partition, then refit on all rows
///
/// With tuning on, each fold searches on its own training rows and the final
/// model reuses the hyperparameters of the fold with the lowest held-out RMSE.
fn train_family<R: Regressor>(
    data: &PropertyData,
    feature_names: &[String],
    options: &TrainOptions,
    seed: u64,
    cancel: &CancellationToken,
) -> Result<FamilyOutcome, AnalysisError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut ctx = TuneContext::new(
        ChaCha8Rng::seed_from_u64(seed.wrapping_add(1)),
        options.search_evaluations,
        cancel.clone(),
    );
    let (x, y) = (data.x.view(), data.y.view());
    let folds = data.partition.num_folds();

    let mut fold_scores = Vec::with_capacity(folds);
    let mut fold_models = Vec::with_capacity(folds);
    let mut fold_hypers: Vec<R::Hyper> = Vec::with_capacity(folds);
    let mut out_of_fold = vec![f64::NAN; y.len()];

    for fold in 0..folds {
        cancel.check(&format!("{} fold {} for '{}'", R::KIND, fold + 1, data.name))?;
        let (train, test) = data.partition.split(fold);
        let (xtr, ytr) = (x.select(Axis(0), &train), y.select(Axis(0), &train));
        let (xte, yte) = (x.select(Axis(0), &test), y.select(Axis(0), &test));

        let hyper = if options.optimize_hyperparams {
            R::tune(xtr.view(), ytr.view(), &mut ctx)?
        } else {
            R::default_hyper(xtr.view(), ytr.view())
        };
        let model = R::fit(xtr.view(), ytr.view(), &hyper, &mut rng)?;
        let pred = model.predict(xte.view());
        for (&row, &p) in test.iter().zip(pred.iter()) {
            out_of_fold[row] = p;
        }

        let fold_score = score(yte.view(), pred.view());
        debug!(
            property = %data.name,
            family = %R::KIND,
            fold,
            rmse = fold_score.rmse,
            r2 = fold_score.r2,
            "fold scored"
        );
        fold_scores.push(fold_score);
        fold_hypers.push(hyper);
        fold_models.push(model.into_fitted());
    }

    let held_out: Vec<usize> = data.partition.test_sets.concat();
    let pooled_pred: Array1<f64> = held_out.iter().map(|&i| out_of_fold[i]).collect();
    let pooled_r2 = score(y.select(Axis(0), &held_out).view(), pooled_pred.view()).r2;

    let final_hyper = if options.optimize_hyperparams {
        let best = fold_scores
            .iter()
            .enumerate()
            .min_by(|a, b| rmse_key(a.1).total_cmp(&rmse_key(b.1)))
            .map_or(0, |(i, _)| i);
        fold_hypers.swap_remove(best)
    } else {
        R::default_hyper(x, y)
    };

    cancel.check(&format!("{} final fit for '{}'", R::KIND, data.name))?;
    let final_model = R::fit(x, y, &final_hyper, &mut rng)?;
    let importance = normalize_or_fallback(&final_model.importance(x, y), x, y);
    let metrics = Metrics::from_folds(
        fold_scores,
        pooled_r2,
        fold_models,
        data.partition.clone(),
        y.len(),
    );

    Ok(FamilyOutcome {
        model: Model {
            model_type: R::KIND,
            property_name: data.name.clone(),
            feature_names: feature_names.to_vec(),
            fitted: final_model.into_fitted(),
        },
        metrics,
        importance,
    })
}

fn rmse_key(s: &FoldScore) -> f64 {
    if s.rmse.is_finite() {
        s.rmse
    } else {
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn linear_samples(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                let temp = 100.0 + 10.0 * i as f64;
                let time = ((i * 7) % 5) as f64 + 1.0;
                let mut s = Sample::new(format!("S{}", i))
                    .with_synthesis("temp", temp)
                    .with_synthesis("time", time);
                s.properties.synthesis.insert("yield".to_string(), 2.0 * temp + 0.5 * time);
                s.properties.tga_derived.insert("t50".to_string(), 300.0 + temp - time);
                s
            })
            .collect()
    }

    fn quick_options(models: &[&str]) -> TrainOptions {
        TrainOptions {
            model_types: models.iter().map(|m| m.to_string()).collect(),
            optimize_hyperparams: false,
            threads: Some(2),
            ..TrainOptions::default()
        }
    }

    #[test]
    fn test_too_few_samples() {
        let err = train_models(&linear_samples(2), &TrainOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::ArgumentError(_)));
    }

    #[test]
    fn test_trains_every_property_and_family() {
        let (models, results) = train_models(&linear_samples(12), &quick_options(&["regression", "ensemble"])).unwrap();

        assert_eq!(results.property_names, vec!["tga_t50", "synthesis_yield"]);
        for property in &results.property_names {
            assert_eq!(models[property].len(), 2);
            let importance = &results.feature_importance[property];
            assert_eq!(importance.average.len(), 2);
            let total: f64 = importance.average.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }

        let m = results.metrics("synthesis_yield", ModelType::Regression).unwrap();
        assert_eq!(m.fold_scores.len(), 5);
        assert_eq!(m.fold_models.len(), 5);
        assert!(m.rmse_mean < 1e-6);
        assert_eq!(results.correlation.coefficients.dim(), (2, 2));
    }

    #[test]
    fn test_unknown_model_type_warns() {
        let (models, results) = train_models(&linear_samples(6), &quick_options(&["regression", "gaussian_process"])).unwrap();
        assert_eq!(models["synthesis_yield"].len(), 1);
        assert!(results
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::UnknownModelType));
    }

    #[test]
    fn test_only_unknown_model_types_is_error() {
        assert!(train_models(&linear_samples(6), &quick_options(&["nope"])).is_err());
    }

    #[test]
    fn test_property_with_too_few_rows_is_skipped() {
        let mut samples = linear_samples(6);
        for s in samples.iter_mut().skip(2) {
            s.properties.tga_derived.insert("t50".to_string(), f64::NAN);
        }
        let (models, results) = train_models(&samples, &quick_options(&["regression"])).unwrap();
        assert!(!models.contains_key("tga_t50"));
        assert!(models.contains_key("synthesis_yield"));
        assert!(results
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::PropertySkipped));
    }

    #[test]
    fn test_cancelled_run_returns_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = train_models_with_cancel(&linear_samples(6), &quick_options(&["regression"]), &cancel).unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled(_)));
    }

    #[test]
    fn test_same_seed_same_metrics() {
        let options = quick_options(&["ensemble"]);
        let (_, a) = train_models(&linear_samples(10), &options).unwrap();
        let (_, b) = train_models(&linear_samples(10), &options).unwrap();
        let ma = a.metrics("synthesis_yield", ModelType::Ensemble).unwrap();
        let mb = b.metrics("synthesis_yield", ModelType::Ensemble).unwrap();
        assert_eq!(ma.rmse_mean, mb.rmse_mean);
        assert_eq!(ma.partition, mb.partition);
    }

    #[test]
    fn test_task_seeds_differ() {
        let a = task_seed(42, 0, Some(ModelType::Svm));
        let b = task_seed(42, 0, Some(ModelType::Ann));
        let c = task_seed(42, 1, Some(ModelType::Svm));
        assert!(a != b && a != c && b != c);
    }

    fn property_data(name: &str, index: usize, x: Array2<f64>, y: Array1<f64>) -> PropertyData {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let partition =
            Partition::build(ValidationMethod::KFold, 3.0, y.len(), &mut rng, &mut Diagnostics::new()).unwrap();
        PropertyData {
            name: name.to_string(),
            index,
            x,
            y,
            partition,
        }
    }

    fn yield_rows() -> (Array2<f64>, Array1<f64>) {
        let x = arr2(&[
            [100.0, 1.0],
            [110.0, 3.0],
            [120.0, 5.0],
            [130.0, 2.0],
            [140.0, 4.0],
            [150.0, 1.0],
        ]);
        let y = x.map_axis(Axis(1), |r| 2.0 * r[0] + 0.5 * r[1]);
        (x, y)
    }

    #[test]
    fn test_panicking_family_becomes_model_error() {
        let literal: Result<(), AnalysisError> = isolated(ModelType::Svm, || panic!("kernel matrix blew up"));
        match literal {
            Err(AnalysisError::ModelError(msg)) => {
                assert!(msg.contains("panicked"));
                assert!(msg.ends_with("kernel matrix blew up"));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let formatted: Result<(), AnalysisError> =
            isolated(ModelType::Ann, || panic!("{} of {} weights are NaN", 3, 8));
        assert!(matches!(
            formatted,
            Err(AnalysisError::ModelError(msg)) if msg.ends_with("3 of 8 weights are NaN")
        ));

        let fine = isolated(ModelType::Regression, || Ok(5));
        assert!(matches!(fine, Ok(5)));
    }

    #[test]
    fn test_failed_family_is_dropped_and_the_rest_kept() {
        let feature_names = vec!["synthesis_temp".to_string(), "synthesis_time".to_string()];
        let options = quick_options(&["regression", "ensemble"]);
        let cancel = CancellationToken::new();

        let (x, y) = yield_rows();
        let good = property_data("synthesis_yield", 0, x.clone(), y.clone());
        let mut bad_x = x;
        bad_x[[1, 0]] = f64::NAN;
        let bad = property_data("tga_t50", 1, bad_x, y);

        let tasks = vec![
            (0, ModelType::Regression),
            (1, ModelType::Regression),
            (0, ModelType::Ensemble),
        ];
        let outcomes: Vec<Result<FamilyOutcome, AnalysisError>> = vec![
            run_task(&good, ModelType::Regression, &feature_names, &options, &cancel),
            run_task(&bad, ModelType::Regression, &feature_names, &options, &cancel),
            run_task(&good, ModelType::Ensemble, &feature_names, &options, &cancel),
        ];
        assert!(matches!(outcomes[1], Err(AnalysisError::ModelError(_))));

        let mut diag = Diagnostics::new();
        let agg = aggregate(&["synthesis_yield", "tga_t50"], &tasks, outcomes, &mut diag).unwrap();

        assert_eq!(agg.models["synthesis_yield"].len(), 2);
        assert_eq!(agg.model_metrics["synthesis_yield"].len(), 2);
        assert_eq!(agg.feature_importance["synthesis_yield"].by_model.len(), 2);
        assert!(!agg.models.contains_key("tga_t50"));
        assert_eq!(diag.count(WarningKind::FamilyFailed), 1);
        assert!(diag.warnings()[0].message.contains("'tga_t50'"));
    }

    #[test]
    fn test_cancelled_outcome_aborts_aggregation() {
        let outcomes = vec![Err(AnalysisError::Cancelled("deadline passed".to_string()))];
        let mut diag = Diagnostics::new();
        let result = aggregate(&["synthesis_yield"], &[(0, ModelType::Svm)], outcomes, &mut diag);
        assert!(matches!(result, Err(AnalysisError::Cancelled(_))));
        assert_eq!(diag.count(WarningKind::FamilyFailed), 0);
    }

    #[test]
    fn test_tuned_training_covers_every_family() {
        let mut samples = linear_samples(15);
        for (i, s) in samples.iter_mut().enumerate() {
            let e = if i % 2 == 0 { 0.3 } else { -0.3 };
            for value in s.properties.synthesis.values_mut().chain(s.properties.tga_derived.values_mut()) {
                *value += e;
            }
        }
        let options = TrainOptions {
            optimize_hyperparams: true,
            search_evaluations: 3,
            ..quick_options(&["regression", "svm", "ann", "ensemble"])
        };

        let (models, results) = train_models(&samples, &options).unwrap();
        assert!(results.warnings.iter().all(|w| w.kind != WarningKind::FamilyFailed));
        for property in ["tga_t50", "synthesis_yield"] {
            assert_eq!(models[property].len(), 4);
            for kind in [ModelType::Regression, ModelType::Svm, ModelType::Ann, ModelType::Ensemble] {
                let m = results.metrics(property, kind).unwrap();
                assert_eq!(m.fold_scores.len(), 5);
                assert!(m.rmse_mean.is_finite());
            }
            let prediction = models[property][&ModelType::Ensemble]
                .fitted
                .predict(results.features.view());
            assert_eq!(prediction.len(), 15);
        }
    }

    #[test]
    fn test_families_share_the_property_partition() {
        let options = quick_options(&["regression", "svm", "ensemble"]);
        let (_, results) = train_models(&linear_samples(11), &options).unwrap();

        for property in ["tga_t50", "synthesis_yield"] {
            let reference = &results.metrics(property, ModelType::Regression).unwrap().partition;
            for kind in [ModelType::Svm, ModelType::Ensemble] {
                assert_eq!(&results.metrics(property, kind).unwrap().partition, reference);
            }
            let mut held_out: Vec<usize> = reference.test_sets.concat();
            held_out.sort_unstable();
            assert_eq!(held_out, (0..11).collect::<Vec<_>>());
        }
    }
}
