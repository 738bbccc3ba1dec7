use crate::best::BestCheckpoint;
use crate::checkpoint::CheckpointId;
use crate::config::{HyperParams, JobId};
use crate::dataset::DatasetId;
use crate::error::{JobError, JobResult};
use crate::metrics::EpochLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Model,
    TrainerState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

/// Record of a finished job, written into the final model directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingManifest {
    pub job_id: JobId,
    pub created_at: DateTime<Utc>,
    pub trainer: String,
    pub hyperparams: HyperParams,
    pub train_dataset_id: DatasetId,
    pub validation_dataset_id: DatasetId,
    pub global_step: u64,
    pub resumed_from: Option<CheckpointId>,
    /// Checkpoint the final model was taken from.
    pub source_checkpoint: CheckpointId,
    pub best: Option<BestCheckpoint>,
    pub metric_for_best_model: String,
    #[serde(default)]
    pub log_history: Vec<EpochLog>,
    pub artifacts: Vec<TrainingArtifact>,
}

impl TrainingManifest {
    pub fn write(&self, path: &Path) -> JobResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> JobResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub fn sha256_file(path: &Path) -> JobResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> JobResult<TrainingArtifact> {
    if !path.exists() {
        return Err(JobError::Trainer(format!("artifact path does not exist: {}", path.display())));
    }

    let hash = sha256_file(&path)?;
    Ok(TrainingArtifact { kind, path, sha256: hash })
}
