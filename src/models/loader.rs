//! Model and preprocessing artifact store

use crate::error::{PipelineError, Result};
use crate::features::{FeatureEngineer, LabelEncoder};
use crate::models::{LearnerType, TrainedLearner};
use crate::training::evaluation::EvaluationMetrics;
use crate::training::scaler::RobustScaler;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufReader, Write};
use std::path::Path;
use tracing::info;

/// Serialized learner, tagged with the id of the training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub artifact_id: String,
    pub created_at: DateTime<Utc>,
    pub n_features: usize,
    pub learner: TrainedLearner,
}

impl ModelArtifact {
    pub fn new(artifact_id: impl Into<String>, learner: TrainedLearner) -> Self {
        let n_features = learner.as_learner().n_features();
        Self {
            artifact_id: artifact_id.into(),
            created_at: Utc::now(),
            n_features,
            learner,
        }
    }

    pub fn kind(&self) -> LearnerType {
        self.learner.as_learner().kind()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json_atomic(path.as_ref(), self, false)?;
        info!(
            path = %path.as_ref().display(),
            model = %self.kind(),
            artifact_id = %self.artifact_id,
            "Model saved"
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let artifact: Self = read_json(path.as_ref())?;
        if artifact.learner.as_learner().n_features() != artifact.n_features {
            return Err(PipelineError::InvalidArtifact(format!(
                "{}: learner width {} disagrees with recorded width {}",
                path.as_ref().display(),
                artifact.learner.as_learner().n_features(),
                artifact.n_features
            )));
        }
        Ok(artifact)
    }
}

/// Training metadata carried inside the preprocessing bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMetadata {
    pub training_timestamp: DateTime<Utc>,
    pub feature_count: usize,
    pub best_model: LearnerType,
    pub evaluation_metrics: EvaluationMetrics,
    pub degraded_features: Vec<String>,
}

/// Everything needed to turn raw telemetry into model input and model
/// output into labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessingBundle {
    pub artifact_id: String,
    pub feature_engineer: FeatureEngineer,
    pub scaler: RobustScaler,
    pub target_encoder: LabelEncoder,
    pub feature_columns: Vec<String>,
    /// Decision threshold per class index
    pub thresholds: BTreeMap<usize, f64>,
    pub metadata: TrainingMetadata,
}

impl PreprocessingBundle {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json_atomic(path.as_ref(), self, false)?;
        info!(
            path = %path.as_ref().display(),
            features = self.feature_columns.len(),
            classes = self.target_encoder.len(),
            "Preprocessing bundle saved"
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bundle: Self = read_json(path.as_ref())?;
        bundle.validate()?;
        Ok(bundle)
    }

    fn validate(&self) -> Result<()> {
        if !self.feature_engineer.is_fitted() {
            return Err(PipelineError::InvalidArtifact(
                "feature engineer in bundle is not fitted".to_string(),
            ));
        }
        if self.feature_engineer.feature_columns() != self.feature_columns.as_slice() {
            return Err(PipelineError::InvalidArtifact(
                "feature engineer columns disagree with bundle column order".to_string(),
            ));
        }
        if self.scaler.n_features() != self.feature_columns.len() {
            return Err(PipelineError::InvalidArtifact(format!(
                "scaler width {} disagrees with {} feature columns",
                self.scaler.n_features(),
                self.feature_columns.len()
            )));
        }
        if let Some(class) = self.thresholds.keys().find(|&&c| c >= self.target_encoder.len()) {
            return Err(PipelineError::InvalidArtifact(format!(
                "threshold for unknown class index {class}"
            )));
        }
        Ok(())
    }
}

/// Check that a model and a bundle were written by the same training run
pub fn check_pair(model: &ModelArtifact, bundle: &PreprocessingBundle) -> Result<()> {
    if model.artifact_id != bundle.artifact_id {
        return Err(PipelineError::InvalidArtifact(format!(
            "artifact id mismatch: model {} vs preprocessing {}",
            model.artifact_id, bundle.artifact_id
        )));
    }
    if model.n_features != bundle.feature_columns.len() {
        return Err(PipelineError::InvalidArtifact(format!(
            "model expects {} features, preprocessing produces {}",
            model.n_features,
            bundle.feature_columns.len()
        )));
    }
    let n_classes = model.learner.as_learner().n_classes();
    if n_classes != bundle.target_encoder.len() {
        return Err(PipelineError::InvalidArtifact(format!(
            "model has {} classes, target encoder has {}",
            n_classes,
            bundle.target_encoder.len()
        )));
    }
    Ok(())
}

/// Write JSON to `<path>.tmp`, then rename over `path`
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T, pretty: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let json = if pretty {
        serde_json::to_vec_pretty(value)?
    } else {
        serde_json::to_vec(value)?
    };
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&json)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = fs::File::open(path).map_err(|e| {
        PipelineError::InvalidArtifact(format!("cannot open {}: {}", path.display(), e))
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        PipelineError::InvalidArtifact(format!("cannot parse {}: {}", path.display(), e))
    })
}
