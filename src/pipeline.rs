//! End-to-end generation and training runs

use crate::config::AppConfig;
use crate::dataset::{read_telemetry, ReadOptions};
use crate::features::FeatureEngineer;
use crate::generator::{generate_to_csv, GenerationSummary};
use crate::models::loader::{write_json_atomic, TrainingMetadata};
use crate::models::{LearnerType, ModelArtifact, PreprocessingBundle};
use crate::predictor::{MODEL_FILE, PREPROCESSING_FILE};
use crate::training::{select_best, EvaluationMetrics, ModelTrainer, TrainedCandidate};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Instant;
use tracing::{info, warn};

pub const REPORT_FILE: &str = "model_evaluation_report.json";
pub const IMPORTANCE_FILE: &str = "feature_importance.csv";

/// Features logged after training
const TOP_FEATURES: usize = 20;

/// Evaluation report written next to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub artifact_id: String,
    pub best_model: LearnerType,
    pub best_model_metrics: EvaluationMetrics,
    pub all_models_comparison: BTreeMap<String, EvaluationMetrics>,
    /// Decision threshold per class label
    pub thresholds: BTreeMap<String, f64>,
    pub classes: Vec<String>,
    pub feature_count: usize,
    pub degraded_features: Vec<String>,
    pub training_rows: usize,
    pub validation_rows: usize,
    pub test_rows: usize,
    pub training_timestamp: DateTime<Utc>,
}

/// Paths and summary of a finished training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model_path: PathBuf,
    pub preprocessing_path: PathBuf,
    pub report_path: PathBuf,
    pub importance_path: Option<PathBuf>,
    pub report: EvaluationReport,
}

/// Stream synthetic telemetry to `output`
pub fn run_generation(
    config: &AppConfig,
    output: &Path,
    cancel: &AtomicBool,
) -> Result<GenerationSummary> {
    let generator = &config.generator;
    info!(
        records = generator.records,
        batch_size = generator.batch_size,
        seed = generator.seed,
        output = %output.display(),
        "Generating synthetic telemetry"
    );
    let started = Instant::now();

    let summary = generate_to_csv(
        output,
        generator.records,
        generator.batch_size,
        generator.seed,
        Utc::now(),
        cancel,
    )
    .with_context(|| format!("Generation failed writing {}", output.display()))?;

    info!(
        records = summary.records_written,
        labels = ?summary.label_counts,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "Dataset generated"
    );
    Ok(summary)
}

/// Train every configured learner on `input` and persist the best one,
/// its preprocessing bundle, the evaluation report and feature importances
pub fn run_training(config: &AppConfig, input: &Path, output_dir: &Path) -> Result<TrainingOutcome> {
    let training = &config.training;
    if training.learners.is_empty() {
        bail!("no learners configured");
    }
    let started = Instant::now();
    info!(
        input = %input.display(),
        output_dir = %output_dir.display(),
        sample_size = ?training.sample_size,
        "Starting training pipeline"
    );

    let records = read_telemetry(
        input,
        &ReadOptions {
            require_labels: true,
            sample_size: training.sample_size,
            seed: training.seed,
        },
    )
    .context("Training failed while loading data")?;

    let mut engineer = FeatureEngineer::new(&config.features);
    let frame = engineer
        .fit_transform(&records)
        .context("Training failed during feature engineering")?;
    drop(records);

    let degraded_features = engineer.degraded_features();
    if !degraded_features.is_empty() {
        warn!(
            degraded = ?engineer.degraded_groups(),
            "Training with degraded aggregation features"
        );
    }

    let trainer = ModelTrainer::new(training.clone());
    let data = trainer
        .prepare_data(frame, engineer.feature_columns())
        .context("Training failed while preparing data")?;
    let splits = trainer.split(&data.y);

    let artifact_id = uuid::Uuid::new_v4().to_string();
    let mut candidates: Vec<TrainedCandidate> = Vec::with_capacity(training.learners.len());
    for &kind in &training.learners {
        let candidate = trainer
            .train_candidate(kind, &data, &splits)
            .with_context(|| format!("Training failed while fitting {kind}"))?;

        // persist immediately so a later failure keeps this model
        let candidate_path = output_dir.join(format!("model_{kind}.json"));
        ModelArtifact::new(artifact_id.clone(), candidate.learner.clone())
            .save(&candidate_path)
            .with_context(|| format!("Training failed while saving {kind}"))?;
        candidates.push(candidate);
    }

    let all_models_comparison: BTreeMap<String, EvaluationMetrics> = candidates
        .iter()
        .map(|c| (c.kind().to_string(), c.metrics.clone()))
        .collect();
    let best_index = select_best(&candidates).context("Training produced no model")?;
    let best = candidates.swap_remove(best_index);
    let best_kind = best.kind();

    let classes = data.classes().to_vec();
    let thresholds: BTreeMap<String, f64> = best
        .thresholds
        .iter()
        .filter_map(|(&class, &t)| classes.get(class).map(|label| (label.clone(), t)))
        .collect();
    for (label, threshold) in &thresholds {
        info!(class = %label, threshold = threshold, "Optimal threshold");
    }

    let importances = best.learner.as_learner().feature_importances();
    let training_timestamp = Utc::now();

    let model_path = output_dir.join(MODEL_FILE);
    ModelArtifact::new(artifact_id.clone(), best.learner)
        .save(&model_path)
        .context("Training failed while saving the model")?;

    let preprocessing_path = output_dir.join(PREPROCESSING_FILE);
    let bundle = PreprocessingBundle {
        artifact_id: artifact_id.clone(),
        feature_engineer: engineer,
        scaler: data.scaler.clone(),
        target_encoder: data.target_encoder.clone(),
        feature_columns: data.feature_columns.clone(),
        thresholds: best.thresholds.clone(),
        metadata: TrainingMetadata {
            training_timestamp,
            feature_count: data.feature_columns.len(),
            best_model: best_kind,
            evaluation_metrics: best.metrics.clone(),
            degraded_features: degraded_features.clone(),
        },
    };
    bundle
        .save(&preprocessing_path)
        .context("Training failed while saving the preprocessing bundle")?;

    let report = EvaluationReport {
        artifact_id,
        best_model: best_kind,
        best_model_metrics: best.metrics,
        all_models_comparison,
        thresholds,
        classes,
        feature_count: data.feature_columns.len(),
        degraded_features,
        training_rows: splits.train.len(),
        validation_rows: splits.validation.len(),
        test_rows: splits.test.len(),
        training_timestamp,
    };
    let report_path = output_dir.join(REPORT_FILE);
    write_json_atomic(&report_path, &report, true)
        .context("Training failed while writing the evaluation report")?;

    let importance_path = match importances {
        Some(importances) => {
            let path = output_dir.join(IMPORTANCE_FILE);
            write_feature_importance(&path, &data.feature_columns, &importances)
                .context("Training failed while writing feature importances")?;
            Some(path)
        }
        None => {
            warn!(model = %best_kind, "Model provides no feature importances");
            None
        }
    };

    info!(
        best_model = %best_kind,
        macro_pr_auc = ?report.best_model_metrics.macro_pr_auc,
        macro_f1 = ?report.best_model_metrics.macro_f1,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "Training pipeline completed"
    );

    Ok(TrainingOutcome {
        model_path,
        preprocessing_path,
        report_path,
        importance_path,
        report,
    })
}

/// Write `feature,importance` rows sorted by descending importance and log
/// the leading features
fn write_feature_importance(path: &Path, features: &[String], importances: &[f64]) -> Result<()> {
    let mut ranked: Vec<(&String, f64)> = features.iter().zip(importances.iter().copied()).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["feature", "importance"])?;
    for (feature, importance) in &ranked {
        writer.write_record([feature.as_str(), importance.to_string().as_str()])?;
    }
    writer.flush()?;

    info!("Top {} most important features:", TOP_FEATURES.min(ranked.len()));
    for (rank, (feature, importance)) in ranked.iter().take(TOP_FEATURES).enumerate() {
        info!("  {:>2}. {:<40} {:.4}", rank + 1, feature, importance);
    }
    Ok(())
}
