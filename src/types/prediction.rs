//! Prediction result data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of scoring one telemetry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionOutcome {
    /// Record was scored successfully
    Scored {
        /// True iff any predicted class is not `none`
        failure_predicted: bool,
        /// Classes whose probability met their threshold (argmax if none did)
        failure_types: Vec<String>,
        /// Probability per class label, every class present
        failure_probabilities: BTreeMap<String, f64>,
        /// Highest class probability
        max_confidence: f64,
    },
    /// Transform or inference failed for this record
    Failed { error: String },
}

/// Structured prediction emitted by the predictor for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Unique prediction identifier
    pub prediction_id: String,

    /// Device the record belongs to (`unknown` when absent)
    pub device_id: String,

    /// Telemetry timestamp as received
    pub timestamp: String,

    #[serde(flatten)]
    pub outcome: PredictionOutcome,

    /// When the prediction was produced
    pub prediction_timestamp: DateTime<Utc>,
}

impl PredictionRecord {
    /// Create a scored prediction
    pub fn scored(
        device_id: String,
        timestamp: String,
        failure_types: Vec<String>,
        failure_probabilities: BTreeMap<String, f64>,
        none_label: &str,
    ) -> Self {
        let max_confidence = failure_probabilities
            .values()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let failure_predicted = failure_types.iter().any(|label| label != none_label);

        Self {
            prediction_id: uuid::Uuid::new_v4().to_string(),
            device_id,
            timestamp,
            outcome: PredictionOutcome::Scored {
                failure_predicted,
                failure_types,
                failure_probabilities,
                max_confidence,
            },
            prediction_timestamp: Utc::now(),
        }
    }

    /// Create a failed prediction carrying the error message
    pub fn failed(device_id: String, timestamp: String, error: String) -> Self {
        Self {
            prediction_id: uuid::Uuid::new_v4().to_string(),
            device_id,
            timestamp,
            outcome: PredictionOutcome::Failed { error },
            prediction_timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, PredictionOutcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            PredictionOutcome::Failed { error } => Some(error),
            PredictionOutcome::Scored { .. } => None,
        }
    }

    /// False for failed predictions.
    pub fn failure_predicted(&self) -> bool {
        match &self.outcome {
            PredictionOutcome::Scored {
                failure_predicted, ..
            } => *failure_predicted,
            PredictionOutcome::Failed { .. } => false,
        }
    }

    pub fn failure_types(&self) -> &[String] {
        match &self.outcome {
            PredictionOutcome::Scored { failure_types, .. } => failure_types,
            PredictionOutcome::Failed { .. } => &[],
        }
    }

    pub fn max_confidence(&self) -> Option<f64> {
        match &self.outcome {
            PredictionOutcome::Scored { max_confidence, .. } => Some(*max_confidence),
            PredictionOutcome::Failed { .. } => None,
        }
    }

    pub fn probabilities(&self) -> Option<&BTreeMap<String, f64>> {
        match &self.outcome {
            PredictionOutcome::Scored {
                failure_probabilities,
                ..
            } => Some(failure_probabilities),
            PredictionOutcome::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scored_prediction_fields() {
        let mut probabilities = BTreeMap::new();
        probabilities.insert("battery".to_string(), 0.7);
        probabilities.insert("none".to_string(), 0.3);

        let prediction = PredictionRecord::scored(
            "dev_1".to_string(),
            "2025-08-19T10:30:00".to_string(),
            vec!["battery".to_string()],
            probabilities,
            "none",
        );

        assert!(prediction.failure_predicted());
        assert_eq!(prediction.max_confidence(), Some(0.7));
        assert!(!prediction.is_error());
    }

    #[test]
    fn test_failed_prediction_serialization() {
        let prediction = PredictionRecord::failed(
            "dev_9".to_string(),
            "2025-08-19T10:30:00".to_string(),
            "missing field `timestamp`".to_string(),
        );

        let json = serde_json::to_value(&prediction).unwrap();
        assert_eq!(json["device_id"], "dev_9");
        assert!(json.get("error").is_some());
        assert!(json.get("failure_probabilities").is_none());

        let deserialized: PredictionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(deserialized.error(), Some("missing field `timestamp`"));
        assert!(!deserialized.failure_predicted());
    }

    #[test]
    fn test_every_prediction_gets_its_own_id() {
        let first = PredictionRecord::failed("d".to_string(), "t".to_string(), "e".to_string());
        let second = PredictionRecord::failed("d".to_string(), "t".to_string(), "e".to_string());
        assert_ne!(first.prediction_id, second.prediction_id);
        assert!(uuid::Uuid::parse_str(&first.prediction_id).is_ok());

        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["prediction_id"], first.prediction_id.as_str());
    }
}
