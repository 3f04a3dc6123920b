//! Configuration management for the failure prediction pipeline

use crate::models::boosting::BoostingParams;
use crate::models::softmax::SoftmaxParams;
use crate::models::LearnerType;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub generator: GeneratorConfig,
    pub features: FeaturesConfig,
    pub training: TrainingConfig,
    pub serving: ServingConfig,
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
}

/// Synthetic data generation configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Number of records to generate
    pub records: u64,
    /// Records held in memory at once
    pub batch_size: usize,
    /// RNG seed
    pub seed: u64,
    /// Destination CSV path
    pub output_path: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            records: 1_000_000,
            batch_size: 50_000,
            seed: 42,
            output_path: "data/data.csv".to_string(),
        }
    }
}

/// Feature engineering configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Distinct user/device keys tolerated before an aggregation falls back
    /// to sentinel columns
    pub max_aggregation_groups: usize,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            max_aggregation_groups: 5_000_000,
        }
    }
}

/// Training configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Rows sampled from the input file (all rows when unset)
    pub sample_size: Option<usize>,
    /// Seed for sampling, splitting and learners
    pub seed: u64,
    /// Outer hold-out fraction (test)
    pub test_size: f64,
    /// Inner hold-out fraction (validation)
    pub validation_size: f64,
    /// Row count above which the scaler is fitted on a prefix only
    pub partial_scaler_threshold: usize,
    /// Prefix length used for partial scaler fits
    pub scaler_fit_rows: usize,
    /// Learners trained and compared
    pub learners: Vec<LearnerType>,
    /// Gradient boosting hyper-parameters
    pub boosting: BoostingParams,
    /// Softmax regression hyper-parameters
    pub softmax: SoftmaxParams,
    /// Artifact output directory
    pub output_dir: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            sample_size: Some(1_000_000),
            seed: 42,
            test_size: 0.2,
            validation_size: 0.2,
            partial_scaler_threshold: 500_000,
            scaler_fit_rows: 100_000,
            learners: vec![LearnerType::GradientBoosting, LearnerType::SoftmaxRegression],
            boosting: BoostingParams::default(),
            softmax: SoftmaxParams::default(),
            output_dir: "model".to_string(),
        }
    }
}

/// Prediction serving configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Directory holding the model and preprocessing artifacts
    pub model_dir: String,
    /// Concurrent prediction workers
    pub workers: usize,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            model_dir: "model".to_string(),
            workers: 4,
        }
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Median shift, in scaler units, above which a feature counts as drifted
    pub drift_threshold: f64,
    /// Optional JSON-lines file receiving every logged prediction
    pub log_path: Option<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            drift_threshold: 1.0,
            log_path: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, falling back to
    /// defaults when the file does not exist
    pub fn load() -> Result<Self> {
        let path = Path::new("config/config.toml");
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.generator.seed, 42);
        assert_eq!(config.generator.batch_size, 50_000);
        assert_eq!(config.training.partial_scaler_threshold, 500_000);
        assert_eq!(config.training.scaler_fit_rows, 100_000);
        assert_eq!(config.training.learners.len(), 2);
        assert_eq!(config.monitoring.drift_threshold, 1.0);
    }

    #[test]
    fn test_partial_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[training]\nseed = 7\nlearners = [\"softmax_regression\"]\n\n[serving]\nworkers = 2"
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.training.seed, 7);
        assert_eq!(config.training.learners, vec![LearnerType::SoftmaxRegression]);
        assert_eq!(config.training.test_size, 0.2);
        assert_eq!(config.serving.workers, 2);
        assert_eq!(config.logging.level, "info");
    }
}
