//! Device Failure Prediction Pipeline Library
//!
//! Synthesizes device telemetry, engineers features, trains multi-class
//! failure classifiers and serves calibrated per-device predictions.

pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod generator;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod predictor;
pub mod training;
pub mod types;

pub use config::AppConfig;
pub use error::PipelineError;
pub use features::FeatureEngineer;
pub use generator::RecordGenerator;
pub use monitor::ModelMonitor;
pub use predictor::Predictor;
pub use training::ModelTrainer;
pub use types::{PredictionRecord, TelemetryRecord};
