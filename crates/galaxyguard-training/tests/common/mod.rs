#![allow(dead_code)]

use galaxyguard_training::{
    write_jsonl_dataset, ArtifactStore, EvaluationRecord, HyperParams, JobError, JobResult, JobSpec,
    LabeledExample, LocalArtifactStore, MemoryProgressSink, MetricReporter, RetryPolicy, TrainStepReport, Trainer,
    TrainingJobDriver,
};
use galaxyguard_training::dataset::DatasetSplits;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const MODEL_FILE: &str = "weights.json";

/// What the scripted trainer saw, shared with the test after the driver takes ownership.
#[derive(Debug, Default)]
pub struct TrainerLog {
    pub trained: Vec<(u64, u64)>,
    pub restored_step: Option<u64>,
    pub evaluations: usize,
    pub prepared_with: Option<HyperParams>,
}

impl TrainerLog {
    pub fn steps_trained(&self) -> u64 {
        self.trained.iter().map(|(from, to)| to - from).sum()
    }
}

/// Trainer whose evaluation loss follows a fixed per-epoch script.
pub struct ScriptedTrainer {
    steps_per_epoch: u64,
    eval_losses: Vec<f64>,
    step: u64,
    transient_train_failures: u32,
    transient_eval_failures: u32,
    transient_save_failures: AtomicU32,
    step_offset: u64,
    report_objective: bool,
    log: Arc<Mutex<TrainerLog>>,
}

impl ScriptedTrainer {
    pub fn new(steps_per_epoch: u64, eval_losses: &[f64]) -> Self {
        Self {
            steps_per_epoch,
            eval_losses: eval_losses.to_vec(),
            step: 0,
            transient_train_failures: 0,
            transient_eval_failures: 0,
            transient_save_failures: AtomicU32::new(0),
            step_offset: 0,
            report_objective: true,
            log: Arc::new(Mutex::new(TrainerLog::default())),
        }
    }

    pub fn failing_transiently(mut self, times: u32) -> Self {
        self.transient_train_failures = times;
        self
    }

    pub fn failing_evaluate_transiently(mut self, times: u32) -> Self {
        self.transient_eval_failures = times;
        self
    }

    pub fn failing_save_transiently(self, times: u32) -> Self {
        self.transient_save_failures.store(times, Ordering::SeqCst);
        self
    }

    /// Report a global step past the requested end of every training run.
    pub fn misreporting_steps(mut self) -> Self {
        self.step_offset = 1;
        self
    }

    pub fn without_objective(mut self) -> Self {
        self.report_objective = false;
        self
    }

    pub fn log(&self) -> Arc<Mutex<TrainerLog>> {
        self.log.clone()
    }
}

impl Trainer for ScriptedTrainer {
    fn id(&self) -> &'static str {
        "scripted"
    }

    fn prepare(&mut self, _data: DatasetSplits, params: &HyperParams) -> JobResult<()> {
        self.log.lock().unwrap().prepared_with = Some(params.clone());
        Ok(())
    }

    fn steps_per_epoch(&self) -> u64 {
        self.steps_per_epoch
    }

    fn restore(&mut self, checkpoint_dir: &Path) -> JobResult<()> {
        let path = checkpoint_dir.join(MODEL_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| JobError::corrupt_checkpoint(&path, e))?;
        self.step = raw.trim().parse().map_err(|e| JobError::corrupt_checkpoint(&path, e))?;
        self.log.lock().unwrap().restored_step = Some(self.step);
        Ok(())
    }

    fn train(&mut self, from_step: u64, to_step: u64) -> JobResult<TrainStepReport> {
        if self.transient_train_failures > 0 {
            self.transient_train_failures -= 1;
            return Err(JobError::TransientStorage("connection reset".to_string()));
        }
        assert_eq!(from_step, self.step, "driver must train contiguous ranges");
        self.step = to_step;
        self.log.lock().unwrap().trained.push((from_step, to_step));
        Ok(TrainStepReport { global_step: to_step + self.step_offset, train_loss: Some(1.0 / (to_step as f64 + 1.0)) })
    }

    fn evaluate(&mut self) -> JobResult<EvaluationRecord> {
        if self.transient_eval_failures > 0 {
            self.transient_eval_failures -= 1;
            return Err(JobError::TransientStorage("metrics endpoint timed out".to_string()));
        }
        self.log.lock().unwrap().evaluations += 1;
        let epoch = self.step.div_ceil(self.steps_per_epoch) as usize;
        let loss = self.eval_losses.get(epoch.saturating_sub(1)).copied().unwrap_or(1.0);
        let record = EvaluationRecord::new().with("eval_accuracy", 1.0 - loss);
        Ok(if self.report_objective { record.with("eval_loss", loss) } else { record })
    }

    fn save(&self, dir: &Path) -> JobResult<()> {
        let remaining = self.transient_save_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_save_failures.store(remaining - 1, Ordering::SeqCst);
            std::fs::write(dir.join(MODEL_FILE), "partial")?;
            return Err(JobError::TransientStorage("volume busy".to_string()));
        }
        std::fs::write(dir.join(MODEL_FILE), self.step.to_string())?;
        Ok(())
    }

    fn model_files(&self) -> &'static [&'static str] {
        &[MODEL_FILE]
    }
}

/// Store whose first `n` uploads fail with a transient error.
pub struct FlakyStore {
    inner: Arc<LocalArtifactStore>,
    upload_failures: AtomicU32,
    uploads_attempted: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<LocalArtifactStore>, upload_failures: u32) -> Self {
        Self { inner, upload_failures: AtomicU32::new(upload_failures), uploads_attempted: AtomicU32::new(0) }
    }

    pub fn uploads_attempted(&self) -> u32 {
        self.uploads_attempted.load(Ordering::SeqCst)
    }
}

impl ArtifactStore for FlakyStore {
    fn download(&self, bucket: &str, key: &str) -> JobResult<PathBuf> {
        self.inner.download(bucket, key)
    }

    fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> JobResult<()> {
        self.uploads_attempted.fetch_add(1, Ordering::SeqCst);
        let remaining = self.upload_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.upload_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(JobError::TransientStorage(format!("upload of {key} timed out")));
        }
        self.inner.upload(local_path, bucket, key)
    }
}

/// In-memory writer for capturing metric lines.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Temp workspace with a local store seeded with both dataset splits.
pub struct Harness {
    pub temp: TempDir,
    pub store: Arc<LocalArtifactStore>,
    pub sink: Arc<MemoryProgressSink>,
    pub metrics: SharedBuffer,
}

impl Harness {
    pub fn new() -> Self {
        let harness = Self::empty();
        let examples = vec![
            LabeledExample::new("you are wonderful", false),
            LabeledExample::new("you are an idiot", true),
            LabeledExample::new("have a nice day", false),
            LabeledExample::new("nobody wants you here", true),
        ];
        let local = harness.temp.path().join("seed.jsonl");
        write_jsonl_dataset(&local, &examples).unwrap();
        harness.store.upload(&local, "galaxyguard", "data/train.jsonl").unwrap();
        harness.store.upload(&local, "galaxyguard", "data/test.jsonl").unwrap();
        harness
    }

    pub fn empty() -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(LocalArtifactStore::new(temp.path().join("store"), temp.path().join("data")));
        Self { temp, store, sink: Arc::new(MemoryProgressSink::new()), metrics: SharedBuffer::default() }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.temp.path().join("output")
    }

    pub fn spec(&self, epochs: u32) -> JobSpec {
        let mut spec = JobSpec {
            output_dir: self.output_dir(),
            data_dir: self.temp.path().join("data"),
            save_total_limit: None,
            ..JobSpec::default()
        };
        spec.hyperparams.num_train_epochs = epochs;
        spec
    }

    pub fn driver(&self, spec: JobSpec, trainer: ScriptedTrainer) -> TrainingJobDriver {
        self.driver_with_store(spec, trainer, self.store.clone())
    }

    pub fn driver_with_store(
        &self,
        spec: JobSpec,
        trainer: ScriptedTrainer,
        store: Arc<dyn ArtifactStore>,
    ) -> TrainingJobDriver {
        TrainingJobDriver::new(
            spec,
            store,
            Box::new(trainer),
            MetricReporter::new("eval_loss", self.metrics.clone()),
            self.sink.clone(),
        )
        .with_retry_policy(RetryPolicy::new(1, Duration::ZERO, Duration::ZERO, 2.0))
    }
}
