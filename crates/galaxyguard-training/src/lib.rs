//! GalaxyGuard Training
//!
//! Checkpoint-resumable training for the GalaxyGuard toxicity classifier:
//! - Resolving a job (`JobSpec`) from a TOML file and environment overrides
//! - Resuming from the most recent checkpoint in the output directory
//! - Per-epoch evaluation, metric lines for the job monitor, best-model tracking
//! - Exporting the best checkpoint as the final model, with a manifest
//! - Grid search over hyperparameters (`Tuner`)

pub mod artifacts;
pub mod best;
pub mod checkpoint;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod layout;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod store;
pub mod trainer;
pub mod tuning;

pub use artifacts::{ArtifactKind, TrainingArtifact, TrainingManifest};
pub use best::{BestCheckpoint, BestModelMarker, EarlyStopping};
pub use checkpoint::{CheckpointId, CheckpointLocator, CheckpointStore, TrainerState};
pub use classifier::{HashedLogisticTrainer, Prediction, ToxicityClassifier};
pub use config::{HyperParams, JobId, JobSpec, RetrySettings};
pub use dataset::{read_jsonl_dataset, write_jsonl_dataset, Dataset, DatasetId, DatasetSplits, LabeledExample};
pub use driver::{JobOutcome, JobState, StopSignal, TrainingJobDriver};
pub use error::{JobError, JobResult, EXIT_PREEMPTED};
pub use layout::JobLayout;
pub use metrics::{EpochLog, EvaluationRecord, MetricReporter};
pub use progress::{MemoryProgressSink, ProgressEvent, ProgressSink, TracingProgressSink};
pub use retry::RetryPolicy;
pub use store::{ArtifactStore, LocalArtifactStore};
pub use trainer::{TrainStepReport, Trainer};
pub use tuning::{SearchSpace, TrialResult, TrialStatus, Tuner, TuningReport};
