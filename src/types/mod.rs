//! Type definitions for the failure prediction pipeline

pub mod prediction;
pub mod telemetry;

pub use prediction::{PredictionOutcome, PredictionRecord};
pub use telemetry::{FailureType, TelemetryRecord};
