use crate::checkpoint::CheckpointId;
use crate::error::JobResult;
use std::path::{Path, PathBuf};

pub const TRAINER_STATE_FILE: &str = "trainer_state.json";
pub const MANIFEST_FILE: &str = "training_manifest.json";
pub const FINAL_MODEL_DIR: &str = "final_model";

/// Filesystem layout of a job's output directory.
///
/// ```text
/// <output_dir>/
///   checkpoint-<step>/      model files + trainer_state.json
///   final_model/            best model + training_manifest.json
/// ```
#[derive(Debug, Clone)]
pub struct JobLayout {
    output_dir: PathBuf,
    checkpoint_prefix: String,
}

impl JobLayout {
    #[must_use]
    pub fn new(output_dir: PathBuf, checkpoint_prefix: impl Into<String>) -> Self {
        Self { output_dir, checkpoint_prefix: checkpoint_prefix.into() }
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    #[must_use]
    pub fn checkpoint_prefix(&self) -> &str {
        &self.checkpoint_prefix
    }

    #[must_use]
    pub fn checkpoint_name(&self, id: CheckpointId) -> String {
        format!("{}{}", self.checkpoint_prefix, id.step())
    }

    #[must_use]
    pub fn checkpoint_dir(&self, id: CheckpointId) -> PathBuf {
        self.output_dir.join(self.checkpoint_name(id))
    }

    /// Staging directory a checkpoint is written to before being renamed into place.
    ///
    /// The `.tmp` suffix keeps it invisible to the checkpoint locator.
    #[must_use]
    pub fn staging_dir(&self, id: CheckpointId) -> PathBuf {
        self.output_dir.join(format!("{}.tmp", self.checkpoint_name(id)))
    }

    #[must_use]
    pub fn trainer_state_path(&self, id: CheckpointId) -> PathBuf {
        self.checkpoint_dir(id).join(TRAINER_STATE_FILE)
    }

    #[must_use]
    pub fn final_model_dir(&self) -> PathBuf {
        self.output_dir.join(FINAL_MODEL_DIR)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.final_model_dir().join(MANIFEST_FILE)
    }

    pub fn ensure_output_dir(&self) -> JobResult<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = JobLayout::new(temp.path().join("model"), "checkpoint-");
        let id = CheckpointId::new(500);

        assert!(layout.checkpoint_dir(id).ends_with("checkpoint-500"));
        assert!(layout.staging_dir(id).ends_with("checkpoint-500.tmp"));
        assert!(layout.trainer_state_path(id).ends_with("checkpoint-500/trainer_state.json"));
        assert!(layout.manifest_path().ends_with("final_model/training_manifest.json"));

        layout.ensure_output_dir().unwrap();
        assert!(layout.output_dir().is_dir());
    }
}
