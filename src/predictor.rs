//! Production predictor: loads a trained artifact pair and scores
//! telemetry records one at a time or in batches.

use crate::error::{PipelineError, Result};
use crate::features::{FeatureEngineer, FeatureFrame, LabelEncoder};
use crate::models::loader::check_pair;
use crate::models::{argmax, ModelArtifact, PreprocessingBundle, TrainedLearner};
use crate::training::thresholds::DEFAULT_THRESHOLD;
use crate::training::RobustScaler;
use crate::types::{PredictionRecord, TelemetryRecord};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

pub const MODEL_FILE: &str = "model.json";
pub const PREPROCESSING_FILE: &str = "preprocessing_pipeline.json";

/// Label of the healthy class
const NONE_LABEL: &str = "none";

const UNKNOWN: &str = "unknown";

/// One raw request: a JSON value, or the reason its input line failed to parse
pub type Request = std::result::Result<serde_json::Value, String>;

/// Prediction for one request, with the label the request carried if any
#[derive(Debug, Clone)]
pub struct ScoredRequest {
    pub prediction: PredictionRecord,
    pub actual: Option<String>,
}

/// Read-only scorer shared across requests
#[derive(Debug)]
pub struct Predictor {
    artifact_id: String,
    learner: TrainedLearner,
    engineer: FeatureEngineer,
    scaler: RobustScaler,
    target_encoder: LabelEncoder,
    /// Threshold per class index
    thresholds: Vec<f64>,
}

impl Predictor {
    /// Load and cross-check a model and its preprocessing bundle
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(model_path: P, preprocessing_path: Q) -> Result<Self> {
        let model = ModelArtifact::load(model_path.as_ref())?;
        let bundle = PreprocessingBundle::load(preprocessing_path.as_ref())?;
        let predictor = Self::from_artifacts(model, bundle)?;

        info!(
            model_path = %model_path.as_ref().display(),
            artifact_id = %predictor.artifact_id,
            model = %predictor.learner.as_learner().kind(),
            features = predictor.engineer.feature_columns().len(),
            classes = ?predictor.classes(),
            "Model loaded successfully"
        );
        Ok(predictor)
    }

    /// Load `model.json` and `preprocessing_pipeline.json` from a directory
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        Self::load(dir.join(MODEL_FILE), dir.join(PREPROCESSING_FILE))
    }

    pub fn from_artifacts(model: ModelArtifact, bundle: PreprocessingBundle) -> Result<Self> {
        check_pair(&model, &bundle)?;

        let thresholds = (0..bundle.target_encoder.len())
            .map(|class| {
                bundle
                    .thresholds
                    .get(&class)
                    .copied()
                    .unwrap_or(DEFAULT_THRESHOLD)
            })
            .collect();

        Ok(Self {
            artifact_id: model.artifact_id,
            learner: model.learner,
            engineer: bundle.feature_engineer,
            scaler: bundle.scaler,
            target_encoder: bundle.target_encoder,
            thresholds,
        })
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn classes(&self) -> &[String] {
        self.target_encoder.classes()
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn feature_columns(&self) -> &[String] {
        self.engineer.feature_columns()
    }

    pub fn scaler(&self) -> &RobustScaler {
        &self.scaler
    }

    /// Engineer features for `records` with the fitted state, unscaled
    pub fn transform(&self, records: &[TelemetryRecord]) -> Result<FeatureFrame> {
        self.engineer.transform(records)
    }

    /// Score one record. Failures are captured in the returned record.
    pub fn predict(&self, record: &TelemetryRecord) -> PredictionRecord {
        match self.score(record) {
            Ok(prediction) => prediction,
            Err(e) => {
                warn!(device_id = %record.device_id, error = %e, "Prediction failed");
                PredictionRecord::failed(
                    record.device_id.clone(),
                    record.timestamp.clone(),
                    e.to_string(),
                )
            }
        }
    }

    /// Score a raw JSON request. Records that do not deserialize yield an
    /// error record with whatever identity fields are present.
    pub fn predict_value(&self, value: &serde_json::Value) -> PredictionRecord {
        match serde_json::from_value::<TelemetryRecord>(value.clone()) {
            Ok(record) => self.predict(&record),
            Err(e) => {
                let field = |name: &str| {
                    value
                        .get(name)
                        .and_then(|v| v.as_str())
                        .unwrap_or(UNKNOWN)
                        .to_string()
                };
                warn!(error = %e, "Invalid telemetry record");
                PredictionRecord::failed(field("device_id"), field("timestamp"), e.to_string())
            }
        }
    }

    /// Score one raw request; unparsable input becomes an error record
    pub fn predict_request(&self, request: &Request) -> ScoredRequest {
        match request {
            Ok(value) => ScoredRequest {
                prediction: self.predict_value(value),
                actual: value
                    .get("failure_type")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            },
            Err(reason) => ScoredRequest {
                prediction: PredictionRecord::failed(
                    UNKNOWN.to_string(),
                    UNKNOWN.to_string(),
                    reason.clone(),
                ),
                actual: None,
            },
        }
    }

    /// Score every record in order; one failure does not affect the others
    pub fn batch_predict(&self, records: &[TelemetryRecord]) -> Vec<PredictionRecord> {
        self.batch_predict_cancellable(records, &AtomicBool::new(false))
    }

    /// Like [`Predictor::batch_predict`], stopping between records once
    /// `cancel` is set and returning the results produced so far
    pub fn batch_predict_cancellable(
        &self,
        records: &[TelemetryRecord],
        cancel: &AtomicBool,
    ) -> Vec<PredictionRecord> {
        let mut predictions = Vec::with_capacity(records.len());
        for record in records {
            if cancel.load(Ordering::Relaxed) {
                info!(
                    completed = predictions.len(),
                    total = records.len(),
                    "Batch prediction cancelled"
                );
                break;
            }
            predictions.push(self.predict(record));
        }
        predictions
    }

    fn score(&self, record: &TelemetryRecord) -> Result<PredictionRecord> {
        let frame = self.engineer.transform(std::slice::from_ref(record))?;
        let mut x = frame.to_matrix()?;
        self.scaler.transform(&mut x)?;

        let proba = self.learner.as_learner().predict_proba(x.view())?;
        let row: Vec<f64> = proba.row(0).to_vec();
        if row.len() != self.classes().len() {
            return Err(PipelineError::InvalidArtifact(format!(
                "model returned {} probabilities for {} classes",
                row.len(),
                self.classes().len()
            )));
        }

        let mut failure_types: Vec<String> = self
            .classes()
            .iter()
            .zip(&row)
            .zip(&self.thresholds)
            .filter(|((_, &p), &threshold)| p >= threshold)
            .map(|((label, _), _)| label.clone())
            .collect();
        if failure_types.is_empty() {
            failure_types.push(self.classes()[argmax(row.iter().copied())].clone());
        }

        let probabilities: BTreeMap<String, f64> =
            self.classes().iter().cloned().zip(row).collect();

        debug!(
            device_id = %record.device_id,
            failure_types = ?failure_types,
            "Record scored"
        );

        Ok(PredictionRecord::scored(
            record.device_id.clone(),
            record.timestamp.clone(),
            failure_types,
            probabilities,
            NONE_LABEL,
        ))
    }
}

/// Score `requests` on at most `workers` concurrent tasks.
///
/// Results keep request order and a failing request only fills its own
/// slot with an error record. Once `cancel` is set no new request starts
/// and the results produced so far are returned.
pub async fn score_requests(
    predictor: Arc<Predictor>,
    requests: Vec<Request>,
    workers: usize,
    cancel: Arc<AtomicBool>,
) -> Vec<ScoredRequest> {
    let total = requests.len();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(total);

    for request in requests {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        if cancel.load(Ordering::Relaxed) {
            info!(started = handles.len(), total = total, "Scoring cancelled");
            break;
        }

        let predictor = predictor.clone();
        handles.push(tokio::spawn(async move {
            let scored = predictor.predict_request(&request);
            drop(permit);
            scored
        }));
    }

    futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|result| match result {
            Ok(scored) => scored,
            Err(e) => {
                error!(error = %e, "Prediction task failed");
                ScoredRequest {
                    prediction: PredictionRecord::failed(
                        UNKNOWN.to_string(),
                        UNKNOWN.to_string(),
                        e.to_string(),
                    ),
                    actual: None,
                }
            }
        })
        .collect()
}
