//! Grid search over hyperparameters, one driver job per trial.

use crate::config::{HyperParams, JobId, JobSpec};
use crate::driver::{JobState, StopSignal, TrainingJobDriver};
use crate::error::{JobError, JobResult};
use crate::metrics::MetricReporter;
use crate::progress::ProgressSink;
use crate::store::ArtifactStore;
use crate::trainer::Trainer;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_MAX_JOBS: usize = 20;
pub const TUNING_REPORT_FILE: &str = "tuning_report.json";

/// Candidate values for each hyperparameter. The grid is their cartesian product.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    epochs: Vec<u32>,
    batch_sizes: Vec<u32>,
    learning_rates: Vec<f64>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            epochs: vec![2, 4, 8, 16],
            batch_sizes: vec![8, 16, 32, 64],
            learning_rates: vec![1e-5, 3e-5, 5e-5],
        }
    }
}

impl SearchSpace {
    pub fn new(epochs: Vec<u32>, batch_sizes: Vec<u32>, learning_rates: Vec<f64>) -> JobResult<Self> {
        let space = Self { epochs, batch_sizes, learning_rates };
        space.validate()?;
        Ok(space)
    }

    fn validate(&self) -> JobResult<()> {
        if self.epochs.is_empty() || self.batch_sizes.is_empty() || self.learning_rates.is_empty() {
            return Err(JobError::Configuration("search space needs at least one value per hyperparameter".to_string()));
        }
        for params in self.trials() {
            params.validate()?;
        }
        Ok(())
    }

    pub fn epochs(&self) -> &[u32] {
        &self.epochs
    }

    pub fn batch_sizes(&self) -> &[u32] {
        &self.batch_sizes
    }

    pub fn learning_rates(&self) -> &[f64] {
        &self.learning_rates
    }

    pub fn len(&self) -> usize {
        self.epochs.len() * self.batch_sizes.len() * self.learning_rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every combination, epochs varying slowest and learning rate fastest.
    pub fn trials(&self) -> Vec<HyperParams> {
        let mut out = Vec::with_capacity(self.len());
        for &num_train_epochs in &self.epochs {
            for &per_device_train_batch_size in &self.batch_sizes {
                for &learning_rate in &self.learning_rates {
                    out.push(HyperParams { num_train_epochs, per_device_train_batch_size, learning_rate });
                }
            }
        }
        out
    }

    /// At most `max_jobs` combinations, spread evenly over the grid.
    pub fn sample(&self, max_jobs: usize) -> Vec<HyperParams> {
        let all = self.trials();
        if max_jobs == 0 || all.len() <= max_jobs {
            return all;
        }
        (0..max_jobs).map(|i| all[i * all.len() / max_jobs].clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialStatus {
    Completed,
    Preempted,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialResult {
    pub index: usize,
    pub job_id: JobId,
    pub hyperparams: HyperParams,
    #[serde(flatten)]
    pub status: TrialStatus,
    /// Best objective value reached by the trial.
    pub objective: Option<f64>,
    pub output_dir: PathBuf,
    pub final_model_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TuningReport {
    pub metric: String,
    pub trials: Vec<TrialResult>,
    /// Index into `trials` of the completed trial with the lowest objective.
    pub best: Option<usize>,
}

impl TuningReport {
    pub fn best_trial(&self) -> Option<&TrialResult> {
        self.best.and_then(|i| self.trials.get(i))
    }

    pub fn write(&self, path: &Path) -> JobResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Lowest finite objective among completed trials. Ties keep the earlier trial.
fn pick_best(trials: &[TrialResult]) -> Option<usize> {
    trials
        .iter()
        .enumerate()
        .filter(|(_, t)| t.status == TrialStatus::Completed)
        .filter_map(|(i, t)| t.objective.filter(|v| v.is_finite()).map(|v| (i, v)))
        .fold(None, |best: Option<(usize, f64)>, (i, v)| match best {
            Some((_, b)) if b <= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Runs tuning trials sequentially against a shared base job.
pub struct Tuner<F> {
    base: JobSpec,
    space: SearchSpace,
    max_jobs: usize,
    store: Arc<dyn ArtifactStore>,
    progress: Arc<dyn ProgressSink>,
    stop: StopSignal,
    make_trainer: F,
    make_reporter: Box<dyn FnMut() -> MetricReporter + Send>,
}

impl<F> Tuner<F>
where
    F: FnMut(&HyperParams) -> Box<dyn Trainer>,
{
    pub fn new(
        base: JobSpec,
        space: SearchSpace,
        store: Arc<dyn ArtifactStore>,
        progress: Arc<dyn ProgressSink>,
        make_trainer: F,
    ) -> Self {
        let key = base.metric_for_best_model.clone();
        Self {
            base,
            space,
            max_jobs: DEFAULT_MAX_JOBS,
            store,
            progress,
            stop: StopSignal::new(),
            make_trainer,
            make_reporter: Box::new(move || MetricReporter::stdout(key.clone())),
        }
    }

    #[must_use]
    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    #[must_use]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    #[must_use]
    pub fn with_reporter_factory(mut self, factory: impl FnMut() -> MetricReporter + Send + 'static) -> Self {
        self.make_reporter = Box::new(factory);
        self
    }

    /// Trial `i` trains into `<output_dir>/trial-<i>` and exports to `<final_model_key>/trial-<i>`.
    ///
    /// A failed trial is recorded and the search continues, except for
    /// configuration errors, which would fail every trial and abort the search.
    pub fn run(&mut self) -> JobResult<TuningReport> {
        self.base.validate()?;
        let candidates = self.space.sample(self.max_jobs);
        info!(trials = candidates.len(), grid = self.space.len(), metric = %self.base.metric_for_best_model, "Starting hyperparameter search");

        let mut trials = Vec::with_capacity(candidates.len());
        for (index, hyperparams) in candidates.into_iter().enumerate() {
            let name = format!("trial-{index}");
            let mut spec = self.base.clone();
            spec.job_id = JobId::new();
            spec.hyperparams = hyperparams.clone();
            spec.output_dir = self.base.output_dir.join(&name);
            spec.final_model_key = format!("{}/{name}", self.base.final_model_key.trim_end_matches('/'));

            info!(
                trial = index,
                epochs = hyperparams.num_train_epochs,
                batch_size = hyperparams.per_device_train_batch_size,
                learning_rate = hyperparams.learning_rate,
                "Starting trial"
            );

            let trainer = (self.make_trainer)(&hyperparams);
            let reporter = (self.make_reporter)();
            let mut driver = TrainingJobDriver::new(spec.clone(), self.store.clone(), trainer, reporter, self.progress.clone())
                .with_stop_signal(self.stop.clone());

            let (status, objective) = match driver.run() {
                Ok(outcome) if outcome.state == JobState::Preempted => (TrialStatus::Preempted, outcome.best_metric()),
                Ok(outcome) => (TrialStatus::Completed, outcome.best_metric()),
                Err(err) if err.exit_code() == 2 => return Err(err),
                Err(err) => {
                    warn!(trial = index, error = %err, "Trial failed");
                    (TrialStatus::Failed { error: err.to_string() }, None)
                }
            };

            let preempted = status == TrialStatus::Preempted;
            trials.push(TrialResult {
                index,
                job_id: spec.job_id,
                hyperparams,
                status,
                objective,
                output_dir: spec.output_dir,
                final_model_key: spec.final_model_key,
            });
            if preempted {
                warn!(trial = index, "Stop requested; ending hyperparameter search");
                break;
            }
        }

        let best = pick_best(&trials);
        let report = TuningReport { metric: self.base.metric_for_best_model.clone(), trials, best };
        std::fs::create_dir_all(&self.base.output_dir)?;
        report.write(&self.base.output_dir.join(TUNING_REPORT_FILE))?;

        if let Some(best) = report.best_trial() {
            info!(trial = best.index, objective = best.objective, key = %best.final_model_key, "Best trial selected");
        } else {
            warn!("No trial produced the objective metric");
        }
        Ok(report)
    }
}
