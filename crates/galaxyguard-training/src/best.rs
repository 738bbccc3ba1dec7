//! Best-model tracking and early stopping. Lower objective values are better.

use crate::checkpoint::CheckpointId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestCheckpoint {
    pub checkpoint: CheckpointId,
    /// One-based epoch the checkpoint was taken at.
    pub epoch: u32,
    pub value: f64,
}

/// Reference to the checkpoint with the lowest objective value seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BestModelMarker {
    best: Option<BestCheckpoint>,
}

impl BestModelMarker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn best(&self) -> Option<&BestCheckpoint> {
        self.best.as_ref()
    }

    #[must_use]
    pub fn checkpoint(&self) -> Option<CheckpointId> {
        self.best.map(|b| b.checkpoint)
    }

    /// Offer a new evaluation. The marker moves only on a strictly lower value.
    ///
    /// Returns whether the marker was updated. Non-finite values never improve.
    pub fn observe(&mut self, checkpoint: CheckpointId, epoch: u32, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        let improved = self.best.is_none_or(|current| value < current.value);
        if improved {
            self.best = Some(BestCheckpoint { checkpoint, epoch, value });
        }
        improved
    }
}

/// Stops training after `patience` consecutive evaluations without improvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarlyStopping {
    patience: u32,
}

impl EarlyStopping {
    #[must_use]
    pub fn new(patience: u32) -> Self {
        Self { patience }
    }

    #[must_use]
    pub fn should_stop(&self, epochs_without_improvement: u32) -> bool {
        epochs_without_improvement >= self.patience
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_follows_strict_improvements() {
        let mut marker = BestModelMarker::new();
        let losses = [0.5, 0.3, 0.4, 0.2];
        let mut after_three = None;

        for (i, loss) in losses.iter().enumerate() {
            let epoch = (i + 1) as u32;
            marker.observe(CheckpointId::new(u64::from(epoch) * 100), epoch, *loss);
            if epoch == 3 {
                after_three = marker.best().copied();
            }
        }

        let after_three = after_three.unwrap();
        assert_eq!(after_three.epoch, 2);
        assert_eq!(after_three.checkpoint, CheckpointId::new(200));

        let last = marker.best().unwrap();
        assert_eq!(last.epoch, 4);
        assert_eq!(last.checkpoint, CheckpointId::new(400));
    }

    #[test]
    fn test_equal_value_does_not_replace() {
        let mut marker = BestModelMarker::new();
        assert!(marker.observe(CheckpointId::new(1), 1, 0.3));
        assert!(!marker.observe(CheckpointId::new(2), 2, 0.3));
        assert_eq!(marker.checkpoint(), Some(CheckpointId::new(1)));
    }

    #[test]
    fn test_nan_never_improves() {
        let mut marker = BestModelMarker::new();
        assert!(!marker.observe(CheckpointId::new(1), 1, f64::NAN));
        assert!(marker.best().is_none());
        assert!(marker.observe(CheckpointId::new(2), 2, 0.9));
        assert!(!marker.observe(CheckpointId::new(3), 3, f64::NAN));
        assert!(!marker.observe(CheckpointId::new(4), 4, f64::NEG_INFINITY));
        assert_eq!(marker.checkpoint(), Some(CheckpointId::new(2)));
    }

    #[test]
    fn test_early_stopping_patience() {
        let stopping = EarlyStopping::new(2);
        assert!(!stopping.should_stop(0));
        assert!(!stopping.should_stop(1));
        assert!(stopping.should_stop(2));
    }
}
