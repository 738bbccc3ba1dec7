use crate::error::{JobError, JobResult};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Environment variable overriding the epoch count.
pub const ENV_NUM_TRAIN_EPOCHS: &str = "num_train_epochs";
/// Environment variable overriding the per-device batch size.
pub const ENV_BATCH_SIZE: &str = "per_device_train_batch_size";
/// Environment variable overriding the learning rate.
pub const ENV_LEARNING_RATE: &str = "learning_rate";

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParams {
    pub num_train_epochs: u32,
    pub per_device_train_batch_size: u32,
    pub learning_rate: f64,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self { num_train_epochs: 3, per_device_train_batch_size: 32, learning_rate: 5e-5 }
    }
}

impl HyperParams {
    /// Defaults with overrides taken from the process environment.
    pub fn from_env() -> JobResult<Self> {
        let mut params = Self::default();
        params.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(params)
    }

    /// Apply overrides from `lookup`. A variable that is set but does not parse is an error.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> JobResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(epochs) = parse_override::<u32, _>(&lookup, ENV_NUM_TRAIN_EPOCHS)? {
            self.num_train_epochs = epochs;
        }
        if let Some(batch) = parse_override::<u32, _>(&lookup, ENV_BATCH_SIZE)? {
            self.per_device_train_batch_size = batch;
        }
        if let Some(lr) = parse_override::<f64, _>(&lookup, ENV_LEARNING_RATE)? {
            self.learning_rate = lr;
        }
        Ok(())
    }

    pub fn validate(&self) -> JobResult<()> {
        if self.num_train_epochs == 0 {
            return Err(JobError::Configuration("num_train_epochs must be >= 1".to_string()));
        }
        if self.per_device_train_batch_size == 0 {
            return Err(JobError::Configuration("per_device_train_batch_size must be >= 1".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(JobError::Configuration("learning_rate must be > 0".to_string()));
        }
        Ok(())
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> JobResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| JobError::Configuration(format!("invalid value for {key} ({raw:?}): {e}")))
}

/// Backoff settings for transient storage failures, in a file-friendly form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_retries: 1, initial_delay_ms: 1000, max_delay_ms: 10_000, multiplier: 2.0 }
    }
}

impl RetrySettings {
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.multiplier,
        )
    }
}

/// Everything a training job needs to know before it starts.
///
/// Loaded from an optional TOML file; hyperparameters may then be overridden
/// from the environment (see [`HyperParams::apply_overrides`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSpec {
    #[serde(skip)]
    pub job_id: JobId,
    /// Object-store bucket holding datasets and receiving outputs.
    pub bucket: String,
    pub train_key: String,
    pub validation_key: String,
    /// Key under which the final model directory is uploaded.
    pub final_model_key: String,
    /// When set, every checkpoint is mirrored to `<bucket>/<key>/checkpoint-<step>`.
    pub checkpoint_mirror_key: Option<String>,
    /// Local directory datasets are downloaded into.
    pub data_dir: PathBuf,
    /// Local directory owning checkpoints and the final model.
    pub output_dir: PathBuf,
    pub checkpoint_prefix: String,
    /// Maximum number of checkpoints kept on disk. `None` keeps all of them.
    pub save_total_limit: Option<usize>,
    /// Objective metric; lower is better.
    pub metric_for_best_model: String,
    pub logging_steps: u64,
    pub early_stopping_patience: Option<u32>,
    pub retry: RetrySettings,
    pub hyperparams: HyperParams,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            job_id: JobId::new(),
            bucket: "galaxyguard".to_string(),
            train_key: "data/train.jsonl".to_string(),
            validation_key: "data/test.jsonl".to_string(),
            final_model_key: "output/model".to_string(),
            checkpoint_mirror_key: None,
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("opt/ml/model"),
            checkpoint_prefix: "checkpoint-".to_string(),
            save_total_limit: Some(3),
            metric_for_best_model: "eval_loss".to_string(),
            logging_steps: 10,
            early_stopping_patience: None,
            retry: RetrySettings::default(),
            hyperparams: HyperParams::default(),
        }
    }
}

impl JobSpec {
    /// Parse a job spec from TOML. Missing fields take their defaults.
    pub fn from_toml_str(content: &str) -> JobResult<Self> {
        toml::from_str(content).map_err(|e| JobError::Configuration(format!("invalid job file: {e}")))
    }

    pub fn load_from_file(path: &Path) -> JobResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            JobError::Configuration(format!("failed to read job file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Resolve the spec for a job run: file (or defaults), then environment overrides, then validation.
    pub fn resolve<F>(path: Option<&Path>, lookup: F) -> JobResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut spec = match path {
            Some(p) => Self::load_from_file(p)?,
            None => Self::default(),
        };
        spec.hyperparams.apply_overrides(lookup)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> JobResult<()> {
        self.hyperparams.validate()?;
        for (name, value) in [
            ("bucket", &self.bucket),
            ("train_key", &self.train_key),
            ("validation_key", &self.validation_key),
            ("final_model_key", &self.final_model_key),
            ("checkpoint_prefix", &self.checkpoint_prefix),
            ("metric_for_best_model", &self.metric_for_best_model),
        ] {
            if value.trim().is_empty() {
                return Err(JobError::Configuration(format!("{name} is required")));
            }
        }
        if self.checkpoint_prefix.chars().any(|c| c == '/' || c == '\\') {
            return Err(JobError::Configuration("checkpoint_prefix must not contain path separators".to_string()));
        }
        if self.save_total_limit == Some(0) {
            return Err(JobError::Configuration("save_total_limit must be >= 1".to_string()));
        }
        if self.logging_steps == 0 {
            return Err(JobError::Configuration("logging_steps must be >= 1".to_string()));
        }
        if self.early_stopping_patience == Some(0) {
            return Err(JobError::Configuration("early_stopping_patience must be >= 1".to_string()));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(JobError::Configuration("retry.multiplier must be >= 1.0".to_string()));
        }
        Ok(())
    }
}
