use crate::config::HyperParams;
use crate::dataset::DatasetSplits;
use crate::error::JobResult;
use crate::metrics::EvaluationRecord;
use std::path::Path;

/// Result of a run of optimizer steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainStepReport {
    /// Global step after the run. Must equal the requested end step.
    pub global_step: u64,
    /// Mean training loss over the run, if the backend tracks it.
    pub train_loss: Option<f64>,
}

/// Model-compute backend driven by [`crate::driver::TrainingJobDriver`].
///
/// Calls block until the work is done. The driver owns the trainer for the
/// lifetime of one job and never calls it concurrently.
pub trait Trainer: Send {
    fn id(&self) -> &'static str;

    /// Take ownership of the data and initialize parameters from the base model.
    fn prepare(&mut self, data: DatasetSplits, params: &HyperParams) -> JobResult<()>;

    /// Optimizer steps in one pass over the training split. Valid after `prepare`.
    fn steps_per_epoch(&self) -> u64;

    /// Replace parameters and optimizer state with those saved in `checkpoint_dir`.
    ///
    /// Unreadable or inconsistent files are reported as
    /// [`crate::JobError::CheckpointCorruption`].
    fn restore(&mut self, checkpoint_dir: &Path) -> JobResult<()>;

    /// Run optimizer steps `from_step..to_step`.
    ///
    /// On error the trainer's state must be as it was before the call, so the
    /// driver can re-attempt the same range.
    fn train(&mut self, from_step: u64, to_step: u64) -> JobResult<TrainStepReport>;

    /// Run the validation pass.
    fn evaluate(&mut self) -> JobResult<EvaluationRecord>;

    /// Write parameters and optimizer state into `dir`.
    fn save(&self, dir: &Path) -> JobResult<()>;

    /// Files inside a checkpoint that make up the servable model.
    fn model_files(&self) -> &'static [&'static str];
}
