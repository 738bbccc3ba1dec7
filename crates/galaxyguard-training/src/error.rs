use std::path::PathBuf;
use thiserror::Error;

pub type JobResult<T> = std::result::Result<T, JobError>;

/// Exit code used when the job stopped at an epoch boundary because of preemption.
///
/// Matches `EX_TEMPFAIL` from `sysexits.h`: the scheduler should run the job again.
pub const EXIT_PREEMPTED: i32 = 75;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("artifact not found: {bucket}/{key}")]
    ArtifactNotFound { bucket: String, key: String },

    #[error("transient storage error: {0}")]
    TransientStorage(String),

    #[error("corrupt checkpoint {}: {reason}", path.display())]
    CheckpointCorruption { path: PathBuf, reason: String },

    #[error("trainer error: {0}")]
    Trainer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    pub fn corrupt_checkpoint(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::CheckpointCorruption { path: path.into(), reason: reason.to_string() }
    }

    /// Whether the failure may go away if the same operation is attempted again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStorage(_))
    }

    /// Process exit code for a job that failed with this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::ArtifactNotFound { .. } => 2,
            Self::CheckpointCorruption { .. } => 3,
            Self::TransientStorage(_) => 4,
            Self::Trainer(_) | Self::Io(_) | Self::Json(_) | Self::Other(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_errors_are_transient() {
        assert!(JobError::TransientStorage("timeout".to_string()).is_transient());
        assert!(!JobError::Configuration("bad".to_string()).is_transient());
        assert!(!JobError::corrupt_checkpoint("checkpoint-3", "truncated").is_transient());
        assert!(!JobError::ArtifactNotFound { bucket: "b".to_string(), key: "k".to_string() }.is_transient());
    }

    #[test]
    fn test_exit_codes_by_kind() {
        assert_eq!(JobError::Configuration("x".to_string()).exit_code(), 2);
        assert_eq!(JobError::ArtifactNotFound { bucket: "b".to_string(), key: "k".to_string() }.exit_code(), 2);
        assert_eq!(JobError::corrupt_checkpoint("c", "r").exit_code(), 3);
        assert_eq!(JobError::TransientStorage("x".to_string()).exit_code(), 4);
        assert_eq!(JobError::Trainer("x".to_string()).exit_code(), 1);
    }

    #[test]
    fn test_checkpoint_corruption_display() {
        let err = JobError::corrupt_checkpoint("out/checkpoint-12", "missing trainer_state.json");
        assert_eq!(err.to_string(), "corrupt checkpoint out/checkpoint-12: missing trainer_state.json");
    }
}
