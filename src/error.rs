//! Error types for the failure prediction pipeline

use thiserror::Error;

/// Errors raised by the pipeline components.
///
/// Degraded aggregations and unseen categories are recovered locally and
/// never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required raw column is absent from the input
    #[error("schema mismatch: missing required column(s): {}", missing.join(", "))]
    SchemaMismatch { missing: Vec<String> },

    /// `transform` called before `fit_transform`
    #[error("feature engineer has not been fitted")]
    Unfitted,

    /// An allocation for the training matrix could not be satisfied
    #[error("out of memory while {stage}: {detail}")]
    OutOfMemory { stage: &'static str, detail: String },

    /// Input file missing or unreadable as telemetry
    #[error("invalid input {path}: {reason}")]
    InvalidInput { path: String, reason: String },

    /// A model or preprocessing artifact failed validation on load
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),

    /// Training could not proceed with the given data
    #[error("training error: {0}")]
    Training(String),

    /// Generation or batch prediction was cancelled
    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::SchemaMismatch { .. } | PipelineError::InvalidInput { .. } => 2,
            PipelineError::OutOfMemory { .. } => 3,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let schema = PipelineError::SchemaMismatch {
            missing: vec!["timestamp".to_string()],
        };
        assert_eq!(schema.exit_code(), 2);
        assert!(schema.to_string().contains("timestamp"));

        let oom = PipelineError::OutOfMemory {
            stage: "preparing data",
            detail: "capacity overflow".to_string(),
        };
        assert_eq!(oom.exit_code(), 3);
        assert_eq!(PipelineError::Unfitted.exit_code(), 1);
    }
}
