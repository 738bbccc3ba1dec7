//! Checkpoint discovery, atomic writes, and retention.

use crate::best::BestModelMarker;
use crate::error::{JobError, JobResult};
use crate::layout::{JobLayout, TRAINER_STATE_FILE};
use crate::metrics::EpochLog;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A checkpoint, identified by the global step it was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(u64);

impl CheckpointId {
    #[must_use]
    pub const fn new(step: u64) -> Self {
        Self(step)
    }

    #[must_use]
    pub const fn step(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {}", self.0)
    }
}

/// Finds checkpoints named `<prefix><step>` in a directory.
#[derive(Debug, Clone)]
pub struct CheckpointLocator {
    prefix: String,
}

impl CheckpointLocator {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Parse a directory entry name. Only `<prefix>` followed by ASCII digits matches.
    ///
    /// Zero-padded steps (`checkpoint-010`) are rejected: every path is rebuilt
    /// from the step, so only the canonical spelling can be reopened.
    #[must_use]
    pub fn parse(&self, name: &str) -> Option<CheckpointId> {
        let digits = name.strip_prefix(self.prefix.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return None;
        }
        digits.parse::<u64>().ok().map(CheckpointId)
    }

    /// All checkpoints in `dir`, ascending by step.
    ///
    /// A missing directory yields an empty list. A directory that exists but
    /// cannot be listed is an I/O error.
    pub fn list(&self, dir: &Path) -> JobResult<Vec<CheckpointId>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(id) = self.parse(name) {
                found.push(id);
            }
        }
        found.sort_unstable();
        Ok(found)
    }

    /// The highest-step checkpoint in `dir`, if any.
    pub fn latest(&self, dir: &Path) -> JobResult<Option<CheckpointId>> {
        Ok(self.list(dir)?.last().copied())
    }
}

/// Driver state persisted next to the model files in every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step: u64,
    /// Number of completed epochs.
    pub epoch: u32,
    pub best: BestModelMarker,
    #[serde(default)]
    pub epochs_without_improvement: u32,
    #[serde(default)]
    pub log_history: Vec<EpochLog>,
}

/// Reads and writes checkpoints inside a job's output directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    layout: JobLayout,
    locator: CheckpointLocator,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(layout: JobLayout) -> Self {
        let locator = CheckpointLocator::new(layout.checkpoint_prefix());
        Self { layout, locator }
    }

    #[must_use]
    pub fn layout(&self) -> &JobLayout {
        &self.layout
    }

    pub fn list(&self) -> JobResult<Vec<CheckpointId>> {
        self.locator.list(self.layout.output_dir())
    }

    pub fn latest(&self) -> JobResult<Option<CheckpointId>> {
        self.locator.latest(self.layout.output_dir())
    }

    /// Write a checkpoint: model files via `write_model`, then the trainer state.
    ///
    /// Everything lands in a staging directory first and is renamed into place
    /// once complete. On failure the staging directory is removed.
    pub fn save<F>(&self, id: CheckpointId, state: &TrainerState, write_model: F) -> JobResult<PathBuf>
    where
        F: FnOnce(&Path) -> JobResult<()>,
    {
        let staging = self.layout.staging_dir(id);
        let target = self.layout.checkpoint_dir(id);

        let result = (|| -> JobResult<()> {
            if staging.exists() {
                std::fs::remove_dir_all(&staging)?;
            }
            std::fs::create_dir_all(&staging)?;
            write_model(&staging)?;
            let json = serde_json::to_string_pretty(state)?;
            std::fs::write(staging.join(TRAINER_STATE_FILE), json)?;

            if target.exists() {
                std::fs::remove_dir_all(&target)?;
            }
            std::fs::rename(&staging, &target)?;
            Ok(())
        })();

        if let Err(err) = result {
            if staging.exists() {
                if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                    debug!(path = %staging.display(), error = %cleanup, "Failed to remove staging checkpoint");
                }
            }
            return Err(err);
        }

        debug!(checkpoint = %target.display(), "Checkpoint written");
        Ok(target)
    }

    /// Load the trainer state of a checkpoint. Anything unreadable is corruption.
    pub fn load_state(&self, id: CheckpointId) -> JobResult<TrainerState> {
        let path = self.layout.trainer_state_path(id);
        let bytes = std::fs::read(&path).map_err(|e| JobError::corrupt_checkpoint(&path, e))?;
        let state: TrainerState =
            serde_json::from_slice(&bytes).map_err(|e| JobError::corrupt_checkpoint(&path, e))?;
        if state.global_step != id.step() {
            return Err(JobError::corrupt_checkpoint(
                &path,
                format!("recorded global_step {} does not match directory step {}", state.global_step, id.step()),
            ));
        }
        Ok(state)
    }

    /// Delete the oldest checkpoints beyond `limit`, never deleting `protect`.
    ///
    /// Returns the deleted checkpoints.
    pub fn prune(&self, limit: Option<usize>, protect: Option<CheckpointId>) -> JobResult<Vec<CheckpointId>> {
        let Some(limit) = limit else {
            return Ok(Vec::new());
        };
        let checkpoints = self.list()?;
        if checkpoints.len() <= limit {
            return Ok(Vec::new());
        }

        let cutoff = checkpoints.len() - limit;
        let mut deleted = Vec::new();
        for id in &checkpoints[..cutoff] {
            if Some(*id) == protect {
                continue;
            }
            std::fs::remove_dir_all(self.layout.checkpoint_dir(*id))?;
            deleted.push(*id);
        }

        if !deleted.is_empty() {
            info!(deleted = ?deleted.iter().map(|c| c.step()).collect::<Vec<_>>(), limit, "Pruned old checkpoints");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> CheckpointStore {
        CheckpointStore::new(JobLayout::new(temp.path().to_path_buf(), "checkpoint-"))
    }

    fn write_checkpoint(store: &CheckpointStore, step: u64) {
        let state = TrainerState { global_step: step, ..Default::default() };
        store
            .save(CheckpointId::new(step), &state, |dir| {
                std::fs::write(dir.join("model.json"), b"{}")?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_latest_is_highest_numeric_step() {
        let temp = TempDir::new().unwrap();
        for step in [0, 5, 12, 3] {
            std::fs::create_dir(temp.path().join(format!("checkpoint-{step}"))).unwrap();
        }
        let locator = CheckpointLocator::new("checkpoint-");

        let all = locator.list(temp.path()).unwrap();
        assert_eq!(all, vec![CheckpointId::new(0), CheckpointId::new(3), CheckpointId::new(5), CheckpointId::new(12)]);
        assert_eq!(locator.latest(temp.path()).unwrap(), Some(CheckpointId::new(12)));
    }

    #[test]
    fn test_empty_and_missing_dirs_have_no_checkpoint() {
        let temp = TempDir::new().unwrap();
        let locator = CheckpointLocator::new("checkpoint-");

        assert_eq!(locator.latest(temp.path()).unwrap(), None);
        assert_eq!(locator.latest(&temp.path().join("does-not-exist")).unwrap(), None);
    }

    #[test]
    fn test_non_matching_entries_are_ignored() {
        let temp = TempDir::new().unwrap();
        for name in ["checkpoint-", "checkpoint-7.tmp", "checkpoint--1", "checkpoint-+4", "ckpt-9", "final_model", "checkpoint-x"] {
            std::fs::create_dir(temp.path().join(name)).unwrap();
        }
        std::fs::write(temp.path().join("checkpoint-99"), b"not a dir").unwrap();
        std::fs::create_dir(temp.path().join("checkpoint-2")).unwrap();

        let locator = CheckpointLocator::new("checkpoint-");
        assert_eq!(locator.list(temp.path()).unwrap(), vec![CheckpointId::new(2)]);
    }

    #[test]
    fn test_zero_padded_names_are_ignored() {
        let locator = CheckpointLocator::new("checkpoint-");
        assert_eq!(locator.parse("checkpoint-0"), Some(CheckpointId::new(0)));
        assert_eq!(locator.parse("checkpoint-10"), Some(CheckpointId::new(10)));
        assert_eq!(locator.parse("checkpoint-010"), None);
        assert_eq!(locator.parse("checkpoint-00"), None);

        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("checkpoint-010")).unwrap();
        assert_eq!(locator.latest(temp.path()).unwrap(), None);
    }

    #[test]
    fn test_prune_skips_zero_padded_duplicates() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for step in 1..=3 {
            write_checkpoint(&store, step);
        }
        std::fs::create_dir(temp.path().join("checkpoint-01")).unwrap();

        assert_eq!(store.list().unwrap(), vec![CheckpointId::new(1), CheckpointId::new(2), CheckpointId::new(3)]);
        assert_eq!(store.prune(Some(2), None).unwrap(), vec![CheckpointId::new(1)]);
        assert_eq!(store.list().unwrap(), vec![CheckpointId::new(2), CheckpointId::new(3)]);
        assert!(temp.path().join("checkpoint-01").exists());
    }

    #[test]
    fn test_listing_a_file_path_is_an_error() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("output");
        std::fs::write(&file, b"").unwrap();

        let locator = CheckpointLocator::new("checkpoint-");
        assert!(matches!(locator.list(&file), Err(JobError::Io(_))));
    }

    #[test]
    fn test_save_then_load_state() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        write_checkpoint(&store, 250);

        let state = store.load_state(CheckpointId::new(250)).unwrap();
        assert_eq!(state.global_step, 250);
        assert!(temp.path().join("checkpoint-250/model.json").exists());
        assert!(!temp.path().join("checkpoint-250.tmp").exists());
    }

    #[test]
    fn test_failed_save_removes_staging_dir() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let state = TrainerState { global_step: 10, ..Default::default() };

        let result = store.save(CheckpointId::new(10), &state, |dir| {
            std::fs::write(dir.join("partial.bin"), b"half")?;
            Err(JobError::Trainer("device lost".to_string()))
        });

        assert!(result.is_err());
        assert!(!temp.path().join("checkpoint-10.tmp").exists());
        assert!(!temp.path().join("checkpoint-10").exists());
    }

    #[test]
    fn test_load_state_reports_corruption() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        std::fs::create_dir(temp.path().join("checkpoint-40")).unwrap();
        std::fs::write(temp.path().join("checkpoint-40/trainer_state.json"), b"{ not json").unwrap();

        let err = store.load_state(CheckpointId::new(40)).unwrap_err();
        assert!(matches!(err, JobError::CheckpointCorruption { .. }));

        std::fs::create_dir(temp.path().join("checkpoint-41")).unwrap();
        let err = store.load_state(CheckpointId::new(41)).unwrap_err();
        assert!(matches!(err, JobError::CheckpointCorruption { .. }));
    }

    #[test]
    fn test_prune_keeps_most_recent() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for step in 1..=5 {
            write_checkpoint(&store, step);
            store.prune(Some(3), None).unwrap();
        }

        assert_eq!(store.list().unwrap(), vec![CheckpointId::new(3), CheckpointId::new(4), CheckpointId::new(5)]);
    }

    #[test]
    fn test_prune_protects_best_checkpoint() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for step in 1..=5 {
            write_checkpoint(&store, step);
        }

        let deleted = store.prune(Some(3), Some(CheckpointId::new(1))).unwrap();
        assert_eq!(deleted, vec![CheckpointId::new(2)]);
        assert_eq!(
            store.list().unwrap(),
            vec![CheckpointId::new(1), CheckpointId::new(3), CheckpointId::new(4), CheckpointId::new(5)]
        );
    }

    #[test]
    fn test_prune_without_limit_keeps_all() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        for step in 1..=4 {
            write_checkpoint(&store, step);
        }
        assert!(store.prune(None, None).unwrap().is_empty());
        assert_eq!(store.list().unwrap().len(), 4);
    }
}
