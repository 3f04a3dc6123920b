//! Device Failure Prediction Pipeline - Main Entry Point
//!
//! `generate` streams synthetic telemetry to CSV, `train` fits and persists
//! the failure classifier, `predict` scores JSON telemetry requests in
//! parallel and prints one JSON prediction per request.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use device_failure_pipeline::config::{AppConfig, LoggingConfig};
use device_failure_pipeline::monitor::{DriftBaseline, ModelMonitor};
use device_failure_pipeline::pipeline::{run_generation, run_training};
use device_failure_pipeline::predictor::{score_requests, Request};
use device_failure_pipeline::{PipelineError, Predictor, TelemetryRecord};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

/// Device failure prediction: synthesize, train, serve
#[derive(Parser)]
#[command(name = "device-failure-pipeline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: config/config.toml when present)
    #[arg(long, global = true, env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic telemetry CSV
    Generate(GenerateArgs),

    /// Train models on a labelled telemetry CSV
    Train(TrainArgs),

    /// Score JSON telemetry records with a trained model
    Predict(PredictArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Destination CSV file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Number of records
    #[arg(long)]
    count: Option<u64>,

    /// Records generated per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Labelled telemetry CSV
    #[arg(long)]
    input: PathBuf,

    /// Directory receiving the model artifacts
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Rows sampled from the input (0 reads every row)
    #[arg(long)]
    sample_size: Option<usize>,

    /// Seed for sampling, splitting and learners
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// Directory holding model.json and preprocessing_pipeline.json
    #[arg(long, env = "MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// JSON object or JSON-lines file (default: stdin)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Append every prediction to this JSON-lines log
    #[arg(long)]
    log_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialise logging: {e:#}");
        return ExitCode::FAILURE;
    }

    info!("Starting Device Failure Prediction Pipeline");

    let result = match cli.command {
        Commands::Generate(args) => generate(config, args).await,
        Commands::Train(args) => train(config, args).await,
        Commands::Predict(args) => predict(config, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Pipeline failed");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from_path(path),
        None => AppConfig::load(),
    }
}

/// Logs go to stderr; stdout carries command output
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("device_failure_pipeline={}", logging.level).parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
    Ok(())
}

/// 2 for missing or invalid input, 3 for out-of-memory, 1 otherwise
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map_or(1, PipelineError::exit_code)
}

/// Set `cancel` on Ctrl-C
fn cancel_on_interrupt(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            cancel.store(true, Ordering::Relaxed);
        }
    });
}

async fn generate(mut config: AppConfig, args: GenerateArgs) -> Result<()> {
    if let Some(count) = args.count {
        config.generator.records = count;
    }
    if let Some(batch_size) = args.batch_size {
        config.generator.batch_size = batch_size.max(1);
    }
    if let Some(seed) = args.seed {
        config.generator.seed = seed;
    }
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(&config.generator.output_path));

    let cancel = Arc::new(AtomicBool::new(false));
    cancel_on_interrupt(cancel.clone());

    let summary =
        tokio::task::spawn_blocking(move || run_generation(&config, &output, &cancel)).await??;
    info!(records = summary.records_written, "Generation finished");
    Ok(())
}

async fn train(mut config: AppConfig, args: TrainArgs) -> Result<()> {
    if let Some(sample_size) = args.sample_size {
        config.training.sample_size = (sample_size > 0).then_some(sample_size);
    }
    if let Some(seed) = args.seed {
        config.training.seed = seed;
    }
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| PathBuf::from(&config.training.output_dir));

    let outcome =
        tokio::task::spawn_blocking(move || run_training(&config, &args.input, &output_dir))
            .await??;

    info!(
        model = %outcome.model_path.display(),
        preprocessing = %outcome.preprocessing_path.display(),
        report = %outcome.report_path.display(),
        best_model = %outcome.report.best_model,
        "Artifacts written"
    );
    Ok(())
}

/// Accept a single JSON object, a JSON array of objects, or JSON lines
fn parse_requests(input: &str) -> Vec<Request> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Array(values)) => values.into_iter().map(Ok).collect(),
        Ok(value) => vec![Ok(value)],
        Err(_) => trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| format!("invalid JSON: {e}")))
            .collect(),
    }
}

async fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
            PipelineError::InvalidInput {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        }),
        None => {
            let mut buffer = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buffer)
                .await
                .context("Failed to read stdin")?;
            Ok(buffer)
        }
    }
}

async fn predict(config: AppConfig, args: PredictArgs) -> Result<()> {
    let model_dir = args
        .model_dir
        .unwrap_or_else(|| PathBuf::from(&config.serving.model_dir));
    let predictor = Arc::new(
        Predictor::from_dir(&model_dir)
            .with_context(|| format!("Failed to load model from {}", model_dir.display()))?,
    );

    let mut monitor = ModelMonitor::new().with_baseline(DriftBaseline::from_scaler(
        predictor.feature_columns(),
        predictor.scaler(),
        config.monitoring.drift_threshold,
    ));
    let log_path = args
        .log_path
        .or_else(|| config.monitoring.log_path.as_ref().map(PathBuf::from));
    if let Some(path) = log_path {
        monitor = monitor.with_log_file(path)?;
    }

    let requests = parse_requests(&read_input(args.input.as_deref()).await?);
    let records: Vec<TelemetryRecord> = requests
        .iter()
        .filter_map(|request| request.as_ref().ok())
        .filter_map(|value| serde_json::from_value(value.clone()).ok())
        .collect();

    let num_workers = config.serving.workers.max(1);
    info!(
        requests = requests.len(),
        workers = num_workers,
        "Scoring requests"
    );

    let cancel = Arc::new(AtomicBool::new(false));
    cancel_on_interrupt(cancel.clone());

    let started = Instant::now();
    let results = score_requests(predictor.clone(), requests, num_workers, cancel).await;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for scored in &results {
        serde_json::to_writer(&mut out, &scored.prediction)?;
        writeln!(out)?;
    }
    out.flush()?;

    info!(
        scored = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Scoring finished"
    );

    for scored in &results {
        if let Err(e) = monitor.log(&scored.prediction, scored.actual.as_deref()) {
            warn!(error = %e, "Failed to log prediction");
        }
    }

    if !records.is_empty() {
        match predictor.transform(&records) {
            Ok(frame) => match monitor.drift(&frame) {
                Ok(report) => info!(
                    rows = report.rows,
                    drifted = report.drifted_features.len(),
                    threshold = report.threshold,
                    "Drift check complete"
                ),
                Err(e) => warn!(error = %e, "Drift check failed"),
            },
            Err(e) => warn!(error = %e, "Drift check skipped"),
        }
    }

    monitor.flush()?;
    monitor.print_summary();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_object() {
        let requests = parse_requests("{\"device_id\": \"dev_1\"}\n");
        assert_eq!(requests.len(), 1);
        assert!(requests[0].is_ok());
    }

    #[test]
    fn test_parse_json_lines_with_bad_line() {
        let requests = parse_requests("{\"device_id\": \"a\"}\nnot json\n\n{\"device_id\": \"b\"}\n");
        assert_eq!(requests.len(), 3);
        assert!(requests[0].is_ok());
        assert!(requests[1].is_err());
        assert!(requests[2].is_ok());
    }

    #[test]
    fn test_exit_code_from_context_chain() {
        let err = anyhow::Error::from(PipelineError::OutOfMemory {
            stage: "preparing data",
            detail: "capacity".to_string(),
        })
        .context("Training failed while preparing data");
        assert_eq!(exit_code(&err), 3);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}
