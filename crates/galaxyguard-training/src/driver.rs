//! Checkpoint-resumable training job.
//!
//! ```text
//! INIT → DATA_READY → RESOLVING_CHECKPOINT → TRAINING → EVALUATING → CHECKPOINTING
//!                                               ↑                          │
//!                                               └──────── next epoch ──────┤
//!                                                                          ↓
//!                                               DONE ← FINALIZING ←────────┘
//! ```
//!
//! `FAILED` is reachable from every state. `PREEMPTED` is entered when the stop
//! signal is seen after a checkpoint has been written.

use crate::artifacts::{make_artifact, ArtifactKind, TrainingManifest};
use crate::best::{BestCheckpoint, EarlyStopping};
use crate::checkpoint::{CheckpointId, CheckpointStore, TrainerState};
use crate::config::{JobId, JobSpec};
use crate::dataset::{compute_dataset_id, read_jsonl_dataset, DatasetId, DatasetSplits};
use crate::error::{JobError, JobResult, EXIT_PREEMPTED};
use crate::layout::{JobLayout, TRAINER_STATE_FILE};
use crate::metrics::{EpochLog, EvaluationRecord, MetricReporter};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::retry::RetryPolicy;
use crate::store::ArtifactStore;
use crate::trainer::Trainer;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Init,
    DataReady,
    ResolvingCheckpoint,
    Training,
    Evaluating,
    Checkpointing,
    Finalizing,
    Done,
    Preempted,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Preempted | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::DataReady => "DATA_READY",
            Self::ResolvingCheckpoint => "RESOLVING_CHECKPOINT",
            Self::Training => "TRAINING",
            Self::Evaluating => "EVALUATING",
            Self::Checkpointing => "CHECKPOINTING",
            Self::Finalizing => "FINALIZING",
            Self::Done => "DONE",
            Self::Preempted => "PREEMPTED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// External request to stop the job at the next epoch boundary.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a job run produced.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    /// `Done` or `Preempted`.
    pub state: JobState,
    pub global_step: u64,
    pub total_steps: u64,
    /// Optimizer steps run by this process (excludes steps restored from a checkpoint).
    pub steps_trained: u64,
    pub resumed_from: Option<CheckpointId>,
    pub best: Option<BestCheckpoint>,
    pub early_stopped: bool,
    pub history: Vec<EpochLog>,
    pub final_model_dir: Option<PathBuf>,
}

impl JobOutcome {
    /// Objective value of the best checkpoint, if any evaluation produced it.
    #[must_use]
    pub fn best_metric(&self) -> Option<f64> {
        self.best.map(|b| b.value)
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.state {
            JobState::Preempted => EXIT_PREEMPTED,
            _ => 0,
        }
    }
}

struct LoadedData {
    splits: DatasetSplits,
    train_id: DatasetId,
    validation_id: DatasetId,
}

/// Runs one training job to completion, preemption, or failure.
pub struct TrainingJobDriver {
    spec: JobSpec,
    checkpoints: CheckpointStore,
    store: Arc<dyn ArtifactStore>,
    trainer: Box<dyn Trainer>,
    reporter: MetricReporter,
    progress: Arc<dyn ProgressSink>,
    stop: StopSignal,
    retry: RetryPolicy,
    state: JobState,
    steps_trained: u64,
}

impl TrainingJobDriver {
    pub fn new(
        spec: JobSpec,
        store: Arc<dyn ArtifactStore>,
        trainer: Box<dyn Trainer>,
        reporter: MetricReporter,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let layout = JobLayout::new(spec.output_dir.clone(), spec.checkpoint_prefix.clone());
        let retry = spec.retry.to_policy();
        Self {
            spec,
            checkpoints: CheckpointStore::new(layout),
            store,
            trainer,
            reporter,
            progress,
            stop: StopSignal::new(),
            retry,
            state: JobState::Init,
            steps_trained: 0,
        }
    }

    #[must_use]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Run the job. Fatal errors leave the driver in `FAILED` and are returned as-is.
    pub fn run(&mut self) -> JobResult<JobOutcome> {
        let job_id = self.spec.job_id.clone();
        self.progress.on_event(ProgressEvent::Started { job_id: job_id.clone() });

        match self.execute() {
            Ok(outcome) => {
                self.progress.on_event(ProgressEvent::Finished { job_id, state: outcome.state });
                Ok(outcome)
            }
            Err(err) => {
                warn!(%job_id, state = %self.state, error = %err, "Training job failed");
                self.transition(JobState::Failed);
                self.progress.on_event(ProgressEvent::Finished { job_id, state: JobState::Failed });
                Err(err)
            }
        }
    }

    fn transition(&mut self, to: JobState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(%from, %to, "Job state transition");
        self.state = to;
        self.progress.on_event(ProgressEvent::StateChanged { job_id: self.spec.job_id.clone(), from, to });
    }

    fn message(&self, message: String) {
        self.progress.on_event(ProgressEvent::Message { job_id: self.spec.job_id.clone(), message });
    }

    fn execute(&mut self) -> JobResult<JobOutcome> {
        self.spec.validate()?;

        let data = self.load_data()?;
        let train_id = data.train_id;
        let validation_id = data.validation_id;
        self.trainer.prepare(data.splits, &self.spec.hyperparams)?;
        let steps_per_epoch = self.trainer.steps_per_epoch();
        if steps_per_epoch == 0 {
            return Err(JobError::Configuration("training split yields zero steps per epoch".to_string()));
        }
        let total_steps = u64::from(self.spec.hyperparams.num_train_epochs) * steps_per_epoch;
        self.transition(JobState::DataReady);

        self.transition(JobState::ResolvingCheckpoint);
        let (mut state, resumed_from) = self.resolve_checkpoint()?;
        info!(
            job_id = %self.spec.job_id,
            trainer = self.trainer.id(),
            start_step = state.global_step,
            total_steps,
            steps_per_epoch,
            "Training plan resolved"
        );

        let early_stopping = self.spec.early_stopping_patience.map(EarlyStopping::new);
        let mut early_stopped = false;

        while state.global_step < total_steps {
            if early_stopping.is_some_and(|es| es.should_stop(state.epochs_without_improvement)) {
                info!(
                    epochs_without_improvement = state.epochs_without_improvement,
                    "Early stopping: objective stopped improving"
                );
                early_stopped = true;
                break;
            }

            let epoch_end = ((state.global_step / steps_per_epoch + 1) * steps_per_epoch).min(total_steps);

            self.transition(JobState::Training);
            let train_loss = self.train_until(state.global_step, epoch_end, total_steps)?;
            state.global_step = epoch_end;
            state.epoch = epoch_end.div_ceil(steps_per_epoch) as u32;

            self.transition(JobState::Evaluating);
            let record = {
                let trainer = &mut self.trainer;
                self.retry.run("evaluate", || trainer.evaluate())?
            };
            self.reporter.report(&record)?;
            self.progress.on_event(ProgressEvent::Evaluated {
                job_id: self.spec.job_id.clone(),
                epoch: state.epoch,
                metrics: record.clone(),
            });

            self.transition(JobState::Checkpointing);
            self.checkpoint(&mut state, &record, train_loss)?;

            if self.stop.is_requested() {
                info!(step = state.global_step, "Stop requested; leaving at epoch boundary");
                self.transition(JobState::Preempted);
                return Ok(self.outcome(&state, total_steps, resumed_from, early_stopped, None));
            }
        }

        self.transition(JobState::Finalizing);
        let final_dir = self.finalize(&state, resumed_from, train_id, validation_id)?;
        self.transition(JobState::Done);
        Ok(self.outcome(&state, total_steps, resumed_from, early_stopped, Some(final_dir)))
    }

    fn load_data(&self) -> JobResult<LoadedData> {
        let bucket = &self.spec.bucket;
        let train_path = self.store.download(bucket, &self.spec.train_key)?;
        let validation_path = self.store.download(bucket, &self.spec.validation_key)?;

        let splits = DatasetSplits {
            train: read_jsonl_dataset(&train_path)?,
            validation: read_jsonl_dataset(&validation_path)?,
        };
        splits.validate()?;
        let train_id = compute_dataset_id(&splits.train)?;
        let validation_id = compute_dataset_id(&splits.validation)?;

        self.message(format!(
            "loaded {} train / {} validation examples",
            splits.train.len(),
            splits.validation.len()
        ));
        Ok(LoadedData { splits, train_id, validation_id })
    }

    fn resolve_checkpoint(&mut self) -> JobResult<(TrainerState, Option<CheckpointId>)> {
        self.checkpoints.layout().ensure_output_dir()?;
        let Some(id) = self.checkpoints.latest()? else {
            info!(output_dir = %self.spec.output_dir.display(), "No checkpoint found; starting from base model");
            return Ok((TrainerState::default(), None));
        };

        let state = self.checkpoints.load_state(id)?;
        self.trainer.restore(&self.checkpoints.layout().checkpoint_dir(id))?;
        self.mirror(id)?;
        self.progress.on_event(ProgressEvent::Resumed { job_id: self.spec.job_id.clone(), checkpoint: id });
        Ok((state, Some(id)))
    }

    /// Train `from..to` in chunks of `logging_steps`. Returns the mean train loss.
    fn train_until(&mut self, from: u64, to: u64, total_steps: u64) -> JobResult<Option<f64>> {
        let mut step = from;
        let mut weighted_loss = 0.0;
        let mut loss_steps = 0u64;

        while step < to {
            let chunk_end = (step + self.spec.logging_steps).min(to);
            let report = {
                let trainer = &mut self.trainer;
                self.retry.run("train", || trainer.train(step, chunk_end))?
            };
            if report.global_step != chunk_end {
                return Err(JobError::Trainer(format!(
                    "trainer reported global step {} after training {step}..{chunk_end}",
                    report.global_step
                )));
            }
            let ran = chunk_end - step;
            self.steps_trained += ran;
            if let Some(loss) = report.train_loss {
                weighted_loss += loss * ran as f64;
                loss_steps += ran;
            }
            step = chunk_end;

            self.progress.on_event(ProgressEvent::Step {
                job_id: self.spec.job_id.clone(),
                step,
                total: total_steps,
                train_loss: report.train_loss,
            });
        }

        Ok((loss_steps > 0).then(|| weighted_loss / loss_steps as f64))
    }

    fn checkpoint(&mut self, state: &mut TrainerState, record: &EvaluationRecord, train_loss: Option<f64>) -> JobResult<()> {
        let id = CheckpointId::new(state.global_step);

        let objective = record.get(&self.spec.metric_for_best_model);
        let is_best = objective.is_some_and(|value| state.best.observe(id, state.epoch, value));
        match objective {
            Some(_) if is_best => state.epochs_without_improvement = 0,
            Some(_) => state.epochs_without_improvement += 1,
            None => warn!(
                metric = %self.spec.metric_for_best_model,
                epoch = state.epoch,
                "Objective metric missing from evaluation; early stopping not advanced"
            ),
        }
        state.log_history.push(EpochLog {
            epoch: state.epoch,
            global_step: state.global_step,
            train_loss: train_loss.filter(|l| l.is_finite()),
            metrics: record.iter().filter(|(_, v)| v.is_finite()).collect(),
        });

        {
            let trainer = &self.trainer;
            let checkpoints = &self.checkpoints;
            let snapshot: &TrainerState = state;
            self.retry.run("save checkpoint", || checkpoints.save(id, snapshot, |dir| trainer.save(dir)))?;
        }
        self.mirror(id)?;
        self.checkpoints.prune(self.spec.save_total_limit, state.best.checkpoint())?;

        self.progress.on_event(ProgressEvent::CheckpointSaved {
            job_id: self.spec.job_id.clone(),
            checkpoint: id,
            is_best,
        });
        Ok(())
    }

    /// Upload a checkpoint to `<checkpoint_mirror_key>/<checkpoint name>` when mirroring is on.
    fn mirror(&self, id: CheckpointId) -> JobResult<()> {
        let Some(prefix) = &self.spec.checkpoint_mirror_key else {
            return Ok(());
        };
        let layout = self.checkpoints.layout();
        let path = layout.checkpoint_dir(id);
        let key = format!("{}/{}", prefix.trim_end_matches('/'), layout.checkpoint_name(id));
        let store = &self.store;
        let bucket = &self.spec.bucket;
        self.retry.run("mirror checkpoint", || store.upload(&path, bucket, &key))?;
        debug!(step = id.step(), key = %key, "Checkpoint mirrored");
        Ok(())
    }

    fn finalize(
        &self,
        state: &TrainerState,
        resumed_from: Option<CheckpointId>,
        train_id: DatasetId,
        validation_id: DatasetId,
    ) -> JobResult<PathBuf> {
        let source = match state.best.checkpoint() {
            Some(id) => id,
            None => {
                let latest = self.checkpoints.latest()?.ok_or_else(|| {
                    JobError::Trainer("no checkpoint available to export as the final model".to_string())
                })?;
                warn!(
                    metric = %self.spec.metric_for_best_model,
                    step = latest.step(),
                    "No evaluation produced the objective metric; exporting the latest checkpoint"
                );
                latest
            }
        };

        let layout = self.checkpoints.layout();
        let source_dir = layout.checkpoint_dir(source);
        let final_dir = layout.final_model_dir();
        if final_dir.exists() {
            std::fs::remove_dir_all(&final_dir)?;
        }
        std::fs::create_dir_all(&final_dir)?;

        let mut artifacts = Vec::new();
        for name in self.trainer.model_files().iter().copied().chain([TRAINER_STATE_FILE]) {
            let from = source_dir.join(name);
            let to = final_dir.join(name);
            std::fs::copy(&from, &to).map_err(|e| JobError::corrupt_checkpoint(&from, e))?;
            let kind = if name == TRAINER_STATE_FILE { ArtifactKind::TrainerState } else { ArtifactKind::Model };
            artifacts.push(make_artifact(kind, to)?);
        }

        let manifest = TrainingManifest {
            job_id: self.spec.job_id.clone(),
            created_at: chrono::Utc::now(),
            trainer: self.trainer.id().to_string(),
            hyperparams: self.spec.hyperparams.clone(),
            train_dataset_id: train_id,
            validation_dataset_id: validation_id,
            global_step: state.global_step,
            resumed_from,
            source_checkpoint: source,
            best: state.best.best().copied(),
            metric_for_best_model: self.spec.metric_for_best_model.clone(),
            log_history: state.log_history.clone(),
            artifacts,
        };
        manifest.write(&layout.manifest_path())?;

        let store = &self.store;
        let bucket = &self.spec.bucket;
        let key = &self.spec.final_model_key;
        self.retry.run("upload final model", || store.upload(&final_dir, bucket, key))?;

        info!(
            source_step = source.step(),
            path = %final_dir.display(),
            bucket = %bucket,
            key = %key,
            "Final model exported"
        );
        Ok(final_dir)
    }

    fn outcome(
        &self,
        state: &TrainerState,
        total_steps: u64,
        resumed_from: Option<CheckpointId>,
        early_stopped: bool,
        final_model_dir: Option<PathBuf>,
    ) -> JobOutcome {
        JobOutcome {
            job_id: self.spec.job_id.clone(),
            state: self.state,
            global_step: state.global_step,
            total_steps,
            steps_trained: self.steps_trained,
            resumed_from,
            best: state.best.best().copied(),
            early_stopped,
            history: state.log_history.clone(),
            final_model_dir,
        }
    }
}
