use anyhow::Context;
use clap::{Parser, Subcommand};
use polymer_insight_engine::{
    correlation_view, extract_features, predict_properties, samples_from_json, top_features,
    train_models, Extraction, ModelBundle, PredictOptions, Sample, Statistics, TrainOptions,
};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "polymer-insight")]
#[command(author = "Hummer Team")]
#[command(version = "0.1.0")]
#[command(about = "Feature extraction and property prediction for PGCit polymer samples", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract feature/property matrices from a sample file
    Extract {
        /// Path to JSON sample file (one record or an array)
        #[arg(short, long)]
        samples: PathBuf,

        /// Property allow-list (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        properties: Option<Vec<String>>,

        /// Feature allow-list (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        features: Option<Vec<String>>,

        /// Write the matrices as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Train models and write a model bundle
    Train {
        /// Path to JSON sample file
        #[arg(short, long)]
        samples: PathBuf,

        /// Output model bundle
        #[arg(short, long)]
        bundle: PathBuf,

        /// JSON file with training options; flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Model families (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        models: Option<Vec<String>>,

        /// kfold or holdout
        #[arg(long)]
        validation: Option<String>,

        /// k for kfold, held-out fraction for holdout
        #[arg(long)]
        param: Option<f64>,

        #[arg(long)]
        no_standardize: bool,

        #[arg(long)]
        no_optimize: bool,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        threads: Option<usize>,

        /// Abort training after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write the training report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Predict properties for new samples
    Predict {
        #[arg(short, long)]
        samples: PathBuf,

        #[arg(short, long)]
        bundle: PathBuf,

        /// "best" or a family name
        #[arg(short, long, default_value = "best")]
        model: String,

        #[arg(long)]
        no_ci: bool,

        #[arg(long, default_value_t = 0.95)]
        level: f64,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Feature/property correlations from a trained bundle
    Correlate {
        #[arg(short, long)]
        bundle: PathBuf,

        /// spearman or pearson
        #[arg(short = 't', long = "type", default_value = "spearman")]
        kind: String,

        #[arg(short, long, default_value_t = 0.05)]
        alpha: f64,

        #[arg(short, long, value_delimiter = ',')]
        features: Option<Vec<String>>,

        #[arg(short, long, value_delimiter = ',')]
        properties: Option<Vec<String>>,

        /// Also list the top N features per property by average importance
        #[arg(long)]
        top: Option<usize>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> polymer_insight_engine::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract {
            samples,
            properties,
            features,
            csv,
        } => {
            let samples = load_samples(&samples)?;
            let extraction = extract_features(&samples, properties.as_deref(), features.as_deref())?;

            println!(
                "Extracted {} samples x {} features, {} properties",
                samples.len(),
                extraction.feature_names.len(),
                extraction.property_names.len()
            );
            for (j, name) in extraction.feature_names.iter().enumerate() {
                match Statistics::compute(name, extraction.features.column(j)) {
                    Some(stats) => print_stats(&stats),
                    None => println!("{:<40} no values", name),
                }
            }

            if let Some(path) = csv {
                write_csv(&path, &samples, &extraction)?;
                println!("Matrices written to {}", path.display());
            }
        }

        Commands::Train {
            samples,
            bundle,
            config,
            models,
            validation,
            param,
            no_standardize,
            no_optimize,
            seed,
            threads,
            timeout_secs,
            output,
        } => {
            let mut options: TrainOptions = match config {
                Some(path) => {
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("reading config {}", path.display()))?;
                    serde_json::from_str(&text)?
                }
                None => TrainOptions::default(),
            };
            if let Some(models) = models {
                options.model_types = models;
            }
            if let Some(method) = validation {
                options.validation_method = method.parse()?;
            }
            if param.is_some() {
                options.validation_param = param;
            }
            if no_standardize {
                options.standardize = false;
            }
            if no_optimize {
                options.optimize_hyperparams = false;
            }
            if let Some(seed) = seed {
                options.seed = seed;
            }
            if threads.is_some() {
                options.threads = threads;
            }
            if timeout_secs.is_some() {
                options.timeout_secs = timeout_secs;
            }

            let samples = load_samples(&samples)?;
            let (models, results) = train_models(&samples, &options)?;

            let mut metrics = serde_json::Map::new();
            for (property, by_model) in &results.model_metrics {
                let mut summary = serde_json::Map::new();
                for (kind, m) in by_model {
                    summary.insert(
                        kind.to_string(),
                        json!({
                            "rmse_mean": m.rmse_mean,
                            "rmse_std": m.rmse_std,
                            "r2_mean": m.r2_mean,
                            "r2_std": m.r2_std,
                            "mae_mean": m.mae_mean,
                            "mae_std": m.mae_std,
                        }),
                    );
                }
                metrics.insert(property.clone(), serde_json::Value::Object(summary));
            }
            let report = json!({
                "properties": results.property_names,
                "features": results.feature_names,
                "metrics": metrics,
                "importance": results.feature_importance,
                "warnings": results.warnings,
            });

            ModelBundle::new(models, results).save(&bundle)?;
            write_report(output.as_deref(), &report)?;
        }

        Commands::Predict {
            samples,
            bundle,
            model,
            no_ci,
            level,
            output,
        } => {
            let bundle = ModelBundle::load(&bundle)?;
            let samples = load_samples(&samples)?;
            let options = PredictOptions {
                model_type: model.parse()?,
                confidence_interval: !no_ci,
                confidence_level: level,
            };

            let prediction = predict_properties(&samples, &bundle.models, &bundle.results, &options)?;
            write_report(output.as_deref(), &prediction)?;
        }

        Commands::Correlate {
            bundle,
            kind,
            alpha,
            features,
            properties,
            top,
            output,
        } => {
            let bundle = ModelBundle::load(&bundle)?;
            let view = correlation_view(
                &bundle.results,
                features.as_deref(),
                properties.as_deref(),
                &kind,
                alpha,
            )?;

            match top {
                Some(n) => {
                    let ranking: serde_json::Map<String, serde_json::Value> = view
                        .property_names
                        .iter()
                        .filter_map(|p| {
                            top_features(&bundle.results, p, n).map(|list| (p.clone(), json!(list)))
                        })
                        .collect();
                    write_report(output.as_deref(), &json!({ "correlation": view, "top_features": ranking }))?;
                }
                None => write_report(output.as_deref(), &view)?,
            }
        }
    }

    Ok(())
}

fn load_samples(path: &Path) -> anyhow::Result<Vec<Sample>> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(samples_from_json(&content)?)
}

fn write_report<T: Serialize>(output: Option<&Path>, value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn write_csv(path: &Path, samples: &[Sample], extraction: &Extraction) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["sample_id".to_string()];
    header.extend(extraction.feature_names.iter().cloned());
    header.extend(extraction.property_names.iter().cloned());
    writer.write_record(&header)?;

    let cell = |v: f64| if v.is_finite() { v.to_string() } else { String::new() };
    for (i, sample) in samples.iter().enumerate() {
        let mut record = vec![sample.id.clone()];
        record.extend(extraction.features.row(i).iter().map(|&v| cell(v)));
        record.extend(extraction.properties.row(i).iter().map(|&v| cell(v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn print_stats(stats: &Statistics) {
    println!(
        "{:<40} n={:<4} missing={:<4} mean={:<12.4} std={:<12.4} min={:<12.4} max={:.4}",
        stats.field, stats.count, stats.missing, stats.mean, stats.std, stats.min, stats.max
    );
}
