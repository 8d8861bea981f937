use approx::assert_abs_diff_eq;
use polymer_insight_engine::dataset::{FtirMeasurement, FtirPeak};
use polymer_insight_engine::models::FittedModel;
use polymer_insight_engine::{
    correlation_view, extract_features, predict_properties, samples_from_json, train_models,
    AnalysisError, ModelBundle, ModelSelection, ModelType, PredictOptions, Sample, TrainOptions,
    WarningKind,
};

fn yield_samples(temps: &[f64], times: &[f64], noise: &[f64]) -> Vec<Sample> {
    temps
        .iter()
        .zip(times)
        .zip(noise)
        .enumerate()
        .map(|(i, ((&temp, &time), &e))| {
            let mut s = Sample::new(format!("PGCit-{:02}", i + 1))
                .with_synthesis("temp", temp)
                .with_synthesis("time", time);
            s.properties
                .synthesis
                .insert("yield".to_string(), 2.0 * temp + 0.5 * time + e);
            s
        })
        .collect()
}

fn larger_set() -> Vec<Sample> {
    let temps: Vec<f64> = (0..15).map(|i| 120.0 + 4.0 * i as f64).collect();
    let times: Vec<f64> = (0..15).map(|i| ((i * 7) % 6) as f64 + 1.0).collect();
    let noise: Vec<f64> = (0..15).map(|i| if i % 2 == 0 { 0.3 } else { -0.3 }).collect();
    yield_samples(&temps, &times, &noise)
}

fn options(models: &[&str]) -> TrainOptions {
    TrainOptions {
        model_types: models.iter().map(|m| m.to_string()).collect(),
        optimize_hyperparams: false,
        threads: Some(2),
        ..TrainOptions::default()
    }
}

#[test]
fn linear_relation_is_recovered_from_five_samples() {
    let samples = yield_samples(
        &[100.0, 110.0, 120.0, 130.0, 140.0],
        &[1.0, 3.0, 2.0, 5.0, 4.0],
        &[0.1, -0.1, 0.05, -0.05, 0.0],
    );
    let (models, results) = train_models(&samples, &options(&["regression"])).unwrap();

    assert_eq!(results.feature_names, vec!["synthesis_temp", "synthesis_time"]);
    assert_eq!(results.property_names, vec!["synthesis_yield"]);

    let model = &models["synthesis_yield"][&ModelType::Regression];
    let FittedModel::Regression(linear) = &model.fitted else {
        panic!("expected a linear model");
    };
    let standardization = results.standardization.as_ref().unwrap();
    let (_, coefficients) = linear.destandardized(
        &standardization.features,
        standardization.properties.mean[0],
        standardization.properties.std[0],
    );
    assert_abs_diff_eq!(coefficients[0], 2.0, epsilon = 0.05);
    assert_abs_diff_eq!(coefficients[1], 0.5, epsilon = 0.2);

    let metrics = results.metrics("synthesis_yield", ModelType::Regression).unwrap();
    assert_eq!(metrics.fold_scores.len(), 5);
    assert!(metrics.r2_mean > 0.8, "r2 = {}", metrics.r2_mean);
}

#[test]
fn missing_ftir_section_extracts_nan() {
    let mut first = Sample::new("A").with_synthesis("temp", 150.0);
    first.measurements.ftir = Some(FtirMeasurement {
        processed: true,
        peaks: vec![FtirPeak {
            wavenumber: 1730.2,
            intensity: 0.8,
            area: None,
        }],
        indices: Default::default(),
    });
    first.properties.synthesis.insert("yield".to_string(), 70.0);
    let mut second = Sample::new("B").with_synthesis("temp", 160.0);
    second.properties.synthesis.insert("yield".to_string(), 75.0);

    let extraction = extract_features(&[first, second], None, None).unwrap();
    let col = extraction
        .feature_names
        .iter()
        .position(|n| n == "ftir_peak_1730")
        .unwrap();
    assert_eq!(extraction.features[[0, col]], 0.8);
    assert!(extraction.features[[1, col]].is_nan());
    assert!(extraction
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::MissingValues));
}

#[test]
fn best_selection_prefers_highest_r2() {
    let samples = larger_set();
    let (models, mut results) = train_models(&samples, &options(&["regression", "svm"])).unwrap();

    let by_model = results.model_metrics.get_mut("synthesis_yield").unwrap();
    by_model.get_mut(&ModelType::Regression).unwrap().r2_mean = 0.6;
    by_model.get_mut(&ModelType::Svm).unwrap().r2_mean = 0.9;

    let output = predict_properties(&samples[..3], &models, &results, &PredictOptions::default()).unwrap();
    assert_eq!(output.predictions["synthesis_yield"].model_type, ModelType::Svm);
    assert_eq!(output.predictions["synthesis_yield"].values.len(), 3);
}

#[test]
fn confidence_half_width_is_normal_quantile_times_sigma() {
    let samples = larger_set();
    let train = TrainOptions {
        standardize: false,
        ..options(&["regression"])
    };
    let (models, mut results) = train_models(&samples, &train).unwrap();
    let metrics = results
        .model_metrics
        .get_mut("synthesis_yield")
        .unwrap()
        .get_mut(&ModelType::Regression)
        .unwrap();
    metrics.rmse_std = 2.0;

    let output = predict_properties(&samples, &models, &results, &PredictOptions::default()).unwrap();
    let band = &output.confidence["synthesis_yield"];
    let values = &output.predictions["synthesis_yield"].values;
    for (i, hw) in band.half_width.iter().enumerate() {
        assert_abs_diff_eq!(*hw, 1.959964 * 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(band.upper[i] - values[i], *hw, epsilon = 1e-9);
        assert_abs_diff_eq!(values[i] - band.lower[i], *hw, epsilon = 1e-9);
    }
}

#[test]
fn standardized_intervals_are_rescaled() {
    let samples = larger_set();
    let (models, results) = train_models(&samples, &options(&["regression"])).unwrap();
    let output = predict_properties(&samples, &models, &results, &PredictOptions::default()).unwrap();

    let band = &output.confidence["synthesis_yield"];
    let scale = results.standardization.as_ref().unwrap().properties.std[0];
    assert_abs_diff_eq!(band.half_width[0], 1.959964 * band.std_error * scale, epsilon = 1e-5);
}

#[test]
fn predictions_on_training_samples_match_recorded_fit() {
    let samples = larger_set();
    let (models, results) = train_models(&samples, &options(&["regression", "ensemble"])).unwrap();
    let output = predict_properties(&samples, &models, &results, &PredictOptions::default()).unwrap();

    let prediction = &output.predictions["synthesis_yield"];
    let recorded = results.metrics("synthesis_yield", prediction.model_type).unwrap();

    let truth: Vec<f64> = samples.iter().map(|s| s.properties.synthesis["yield"]).collect();
    let mean = truth.iter().sum::<f64>() / truth.len() as f64;
    let ss_tot: f64 = truth.iter().map(|t| (t - mean).powi(2)).sum();
    let ss_res: f64 = truth
        .iter()
        .zip(&prediction.values)
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let r2 = 1.0 - ss_res / ss_tot;

    assert!(recorded.r2_mean > 0.9);
    assert!(r2 >= recorded.r2_mean - 0.1, "in-sample {} vs cv {}", r2, recorded.r2_mean);
}

#[test]
fn explicit_missing_family_skips_property() {
    let samples = larger_set();
    let (models, results) = train_models(&samples, &options(&["regression"])).unwrap();
    let opts = PredictOptions {
        model_type: ModelSelection::Family(ModelType::Ann),
        ..PredictOptions::default()
    };
    let output = predict_properties(&samples, &models, &results, &opts).unwrap();
    assert!(output.predictions.is_empty());
    assert!(output.warnings.iter().any(|w| w.kind == WarningKind::MissingModel));
}

#[test]
fn prediction_argument_errors() {
    let samples = larger_set();
    let (models, results) = train_models(&samples, &options(&["regression"])).unwrap();

    let err = predict_properties(&[], &models, &results, &PredictOptions::default()).unwrap_err();
    assert!(matches!(err, AnalysisError::ArgumentError(_)));

    let bad_level = PredictOptions {
        confidence_level: 1.5,
        ..PredictOptions::default()
    };
    assert!(predict_properties(&samples, &models, &results, &bad_level).is_err());
}

#[test]
fn new_sample_without_inputs_predicts_nan() {
    let samples = larger_set();
    let (models, results) = train_models(&samples, &options(&["regression"])).unwrap();
    let blank = Sample::new("blank").with_synthesis("temp", 150.0);

    let output = predict_properties(&[blank], &models, &results, &PredictOptions::default()).unwrap();
    assert!(output.predictions["synthesis_yield"].values[0].is_nan());
    assert!(output.warnings.iter().any(|w| w.kind == WarningKind::MissingValues));
}

#[test]
fn bundle_round_trip_preserves_predictions() {
    let samples = larger_set();
    let (models, results) = train_models(&samples, &options(&["regression", "svm", "ensemble"])).unwrap();
    let before = predict_properties(&samples, &models, &results, &PredictOptions::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models.bin");
    ModelBundle::new(models, results).save(&path).unwrap();
    let loaded = ModelBundle::load(&path).unwrap();

    let after = predict_properties(&samples, &loaded.models, &loaded.results, &PredictOptions::default()).unwrap();
    assert_eq!(
        before.predictions["synthesis_yield"].values,
        after.predictions["synthesis_yield"].values
    );
    assert_eq!(loaded.results.feature_names, vec!["synthesis_temp", "synthesis_time"]);
}

#[test]
fn extraction_order_is_stable_and_filters_warn() {
    let samples = larger_set();
    let a = extract_features(&samples, None, None).unwrap();
    let b = extract_features(&samples, None, None).unwrap();
    assert_eq!(a.feature_names, b.feature_names);
    assert_eq!(a.property_names, b.property_names);

    let allow = vec!["synthesis_time".to_string(), "synthesis_pressure".to_string()];
    let filtered = extract_features(&samples, None, Some(&allow)).unwrap();
    assert_eq!(filtered.feature_names, vec!["synthesis_time"]);
    assert!(filtered.warnings.iter().any(|w| w.kind == WarningKind::UnknownName));

    let none = vec!["synthesis_pressure".to_string()];
    let err = extract_features(&samples, None, Some(&none)).unwrap_err();
    assert!(matches!(err, AnalysisError::ArgumentError(_)));
}

#[test]
fn correlation_view_flags_significant_pairs() {
    let samples = larger_set();
    let (_, results) = train_models(&samples, &options(&["regression"])).unwrap();

    let view = correlation_view(&results, None, None, "pearson", 0.05).unwrap();
    assert_eq!(view.coefficients.dim(), (2, 1));
    let strongest = &view.significant[0];
    assert_eq!(strongest.feature, "synthesis_temp");
    assert!(strongest.coefficient > 0.9);

    let fallback = correlation_view(&results, None, None, "kendall", 0.05).unwrap();
    assert!(fallback
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::UnknownCorrelationType));
}

#[test]
fn expired_deadline_cancels_training() {
    let samples = larger_set();
    let opts = TrainOptions {
        timeout_secs: Some(0),
        ..options(&["regression"])
    };
    let err = train_models(&samples, &opts).unwrap_err();
    assert!(matches!(err, AnalysisError::Cancelled(_)));
}

#[test]
fn samples_load_from_nested_json() {
    let json = r#"[
        {
            "id": "S1",
            "synthesis": {"temp": 150.0, "ratio": 1.2},
            "measurements": {
                "tga": {"processed": true, "stages": [{"onset": 210.0, "peak": 250.0, "endset": 290.0, "mass_loss": 35.0}]}
            },
            "properties": {"tga_derived": {"t50": 320.0}}
        },
        {
            "id": "S2",
            "synthesis": {"temp": 160.0, "ratio": 1.0},
            "properties": {"tga_derived": {"t50": 330.0}}
        }
    ]"#;
    let samples = samples_from_json(json).unwrap();
    let extraction = extract_features(&samples, None, None).unwrap();

    assert_eq!(
        extraction.feature_names,
        vec![
            "synthesis_temp",
            "synthesis_ratio",
            "tga_stage1_onset",
            "tga_stage1_peak",
            "tga_stage1_endset",
            "tga_stage1_mass_loss"
        ]
    );
    assert_eq!(extraction.property_names, vec!["tga_t50"]);
    assert_eq!(extraction.features[[0, 2]], 210.0);
    assert!(extraction.features[[1, 2]].is_nan());
}
