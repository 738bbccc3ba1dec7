use crate::checkpoint::CheckpointId;
use crate::config::JobId;
use crate::driver::JobState;
use crate::metrics::EvaluationRecord;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { job_id: JobId },
    StateChanged { job_id: JobId, from: JobState, to: JobState },
    Resumed { job_id: JobId, checkpoint: CheckpointId },
    Step { job_id: JobId, step: u64, total: u64, train_loss: Option<f64> },
    Evaluated { job_id: JobId, epoch: u32, metrics: EvaluationRecord },
    CheckpointSaved { job_id: JobId, checkpoint: CheckpointId, is_best: bool },
    Message { job_id: JobId, message: String },
    Finished { job_id: JobId, state: JobState },
}

/// Receives job progress. Passed explicitly to the driver so tests can observe it.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Logs progress as structured `tracing` events.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job_id } => info!(%job_id, "Training job started"),
            ProgressEvent::StateChanged { job_id, from, to } => debug!(%job_id, %from, %to, "State changed"),
            ProgressEvent::Resumed { job_id, checkpoint } => {
                info!(%job_id, step = checkpoint.step(), "Resuming from checkpoint");
            }
            ProgressEvent::Step { job_id, step, total, train_loss } => {
                info!(%job_id, step, total, train_loss, "Training progress");
            }
            ProgressEvent::Evaluated { job_id, epoch, metrics } => {
                let metrics = metrics.iter().map(|(k, v)| format!("{k}={v:.4}")).collect::<Vec<_>>().join(" ");
                info!(%job_id, epoch, %metrics, "Evaluation complete");
            }
            ProgressEvent::CheckpointSaved { job_id, checkpoint, is_best } => {
                info!(%job_id, step = checkpoint.step(), is_best, "Checkpoint saved");
            }
            ProgressEvent::Message { job_id, message } => info!(%job_id, "{message}"),
            ProgressEvent::Finished { job_id, state } => match state {
                JobState::Done => info!(%job_id, "Training job finished"),
                JobState::Preempted => warn!(%job_id, "Training job stopped at epoch boundary"),
                other => error!(%job_id, state = %other, "Training job ended"),
            },
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemoryProgressSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for MemoryProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
