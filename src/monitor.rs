//! Prediction monitoring and feature drift detection

use crate::error::{PipelineError, Result};
use crate::features::aggregates::quantile;
use crate::features::FeatureFrame;
use crate::training::RobustScaler;
use crate::types::PredictionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// One logged prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEntry {
    pub logged_at: DateTime<Utc>,
    pub device_id: String,
    pub predicted_failure: bool,
    pub predicted_types: Vec<String>,
    pub max_confidence: Option<f64>,
    pub error: Option<String>,
    pub actual_failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringStatus {
    NoPredictions,
    Active,
}

/// Aggregate view over the prediction log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringReport {
    pub status: MonitoringStatus,
    pub total_predictions: usize,
    pub labeled_predictions: usize,
    pub failed_predictions: usize,
    /// `failure_predicted` against `actual != none`, over labelled entries
    pub accuracy: Option<f64>,
    pub average_confidence: Option<f64>,
    pub failure_prediction_rate: Option<f64>,
    pub report_timestamp: DateTime<Utc>,
}

/// Training-time reference point for drift checks
#[derive(Debug, Clone, PartialEq)]
pub struct DriftBaseline {
    pub feature_columns: Vec<String>,
    pub center: Vec<f64>,
    pub scale: Vec<f64>,
    pub threshold: f64,
}

impl DriftBaseline {
    pub fn from_scaler(feature_columns: &[String], scaler: &RobustScaler, threshold: f64) -> Self {
        Self {
            feature_columns: feature_columns.to_vec(),
            center: scaler.center().to_vec(),
            scale: scaler.scale().to_vec(),
            threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub feature: String,
    pub baseline_median: f64,
    pub recent_median: f64,
    /// `|recent - baseline| / scale`
    pub shift: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub rows: usize,
    pub features_checked: usize,
    pub threshold: f64,
    /// Drifted features, largest shift first
    pub drifted_features: Vec<FeatureDrift>,
}

impl DriftReport {
    pub fn drift_detected(&self) -> bool {
        !self.drifted_features.is_empty()
    }
}

/// Append-only prediction log with an optional JSON-lines sink
#[derive(Debug, Default)]
pub struct ModelMonitor {
    entries: Vec<MonitorEntry>,
    sink: Option<BufWriter<File>>,
    baseline: Option<DriftBaseline>,
}

impl ModelMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also append every logged entry to `path` as one JSON line
    pub fn with_log_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "Prediction log opened");
        self.sink = Some(BufWriter::new(file));
        Ok(self)
    }

    pub fn with_baseline(mut self, baseline: DriftBaseline) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MonitorEntry] {
        &self.entries
    }

    /// Record a prediction and, when known, the actual failure type
    pub fn log(&mut self, prediction: &PredictionRecord, actual: Option<&str>) -> Result<()> {
        let entry = MonitorEntry {
            logged_at: Utc::now(),
            device_id: prediction.device_id.clone(),
            predicted_failure: prediction.failure_predicted(),
            predicted_types: prediction.failure_types().to_vec(),
            max_confidence: prediction.max_confidence(),
            error: prediction.error().map(str::to_string),
            actual_failure: actual.map(str::to_string),
        };

        if let Some(sink) = self.sink.as_mut() {
            serde_json::to_writer(&mut *sink, &entry)?;
            sink.write_all(b"\n")?;
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Flush the JSON-lines sink, if any
    pub fn flush(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.flush()?;
        }
        Ok(())
    }

    pub fn report(&self) -> MonitoringReport {
        let total = self.entries.len();
        let fraction = |count: usize, of: usize| (of > 0).then(|| count as f64 / of as f64);

        let labeled: Vec<&MonitorEntry> = self
            .entries
            .iter()
            .filter(|e| e.actual_failure.is_some())
            .collect();
        // failed predictions count as wrong
        let correct = labeled
            .iter()
            .filter(|e| e.error.is_none())
            .filter(|e| e.predicted_failure == (e.actual_failure.as_deref() != Some("none")))
            .count();

        let confidences: Vec<f64> = self.entries.iter().filter_map(|e| e.max_confidence).collect();
        let average_confidence = (!confidences.is_empty())
            .then(|| confidences.iter().sum::<f64>() / confidences.len() as f64);

        let predicted = self.entries.iter().filter(|e| e.predicted_failure).count();
        let failed = self.entries.iter().filter(|e| e.error.is_some()).count();

        MonitoringReport {
            status: if total == 0 {
                MonitoringStatus::NoPredictions
            } else {
                MonitoringStatus::Active
            },
            total_predictions: total,
            labeled_predictions: labeled.len(),
            failed_predictions: failed,
            accuracy: fraction(correct, labeled.len()),
            average_confidence,
            failure_prediction_rate: fraction(predicted, total),
            report_timestamp: Utc::now(),
        }
    }

    /// Compare per-feature medians of `recent` against the baseline
    pub fn drift(&self, recent: &FeatureFrame) -> Result<DriftReport> {
        let baseline = self.baseline.as_ref().ok_or_else(|| {
            PipelineError::InvalidArtifact("no drift baseline configured".to_string())
        })?;

        let missing: Vec<String> = baseline
            .feature_columns
            .iter()
            .filter(|name| recent.column(name).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::SchemaMismatch { missing });
        }

        let mut drifted = Vec::new();
        for (i, name) in baseline.feature_columns.iter().enumerate() {
            let Some(column) = recent.column(name) else {
                continue;
            };
            let mut values: Vec<f64> = column.values.iter().flatten().copied().collect();
            let Some(recent_median) = quantile(&mut values, 0.5) else {
                continue;
            };

            let shift = (recent_median - baseline.center[i]).abs() / baseline.scale[i];
            if shift > baseline.threshold {
                drifted.push(FeatureDrift {
                    feature: name.clone(),
                    baseline_median: baseline.center[i],
                    recent_median,
                    shift,
                });
            }
        }
        drifted.sort_by(|a, b| b.shift.total_cmp(&a.shift));

        let report = DriftReport {
            rows: recent.n_rows(),
            features_checked: baseline.feature_columns.len(),
            threshold: baseline.threshold,
            drifted_features: drifted,
        };
        if report.drift_detected() {
            warn!(
                drifted = report.drifted_features.len(),
                top_feature = %report.drifted_features[0].feature,
                top_shift = report.drifted_features[0].shift,
                "Feature drift detected"
            );
        }
        Ok(report)
    }

    /// Log a boxed summary of the prediction log
    pub fn print_summary(&self) {
        let report = self.report();
        let percent = |value: Option<f64>| value.map_or("n/a".to_string(), |v| format!("{:.1}%", v * 100.0));

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║           DEVICE FAILURE PREDICTOR - MONITOR SUMMARY         ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Predictions: {:>8}  │  Labeled: {:>8}  │  Errors: {:>6} ║",
            report.total_predictions, report.labeled_predictions, report.failed_predictions
        );
        info!(
            "║ Failure Rate: {:>7}  │  Accuracy: {:>7}                  ║",
            percent(report.failure_prediction_rate),
            percent(report.accuracy)
        );
        info!(
            "║ Avg Confidence: {:>7}                                      ║",
            percent(report.average_confidence)
        );
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}
