//! Hashed bag-of-words logistic-regression toxicity classifier.
//!
//! A small, self-contained backend for the [`Trainer`] contract: tokens are
//! hashed into a fixed-size feature space and a single logistic unit is
//! trained with mini-batch Adam on binary cross-entropy.

use crate::config::HyperParams;
use crate::dataset::{Dataset, DatasetSplits, LabeledExample};
use crate::error::{JobError, JobResult};
use crate::metrics::EvaluationRecord;
use crate::trainer::{TrainStepReport, Trainer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MODEL_FILE: &str = "model.json";
pub const OPTIMIZER_FILE: &str = "optimizer.json";

const DEFAULT_FEATURE_BITS: u8 = 16;
const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;
/// Probabilities are clamped away from 0 and 1 before taking logs.
const PROB_FLOOR: f64 = 1e-7;
/// Probability at or above which evaluation counts a prediction as toxic.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ModelWeights {
    feature_bits: u8,
    weights: Vec<f32>,
    bias: f32,
}

impl ModelWeights {
    fn zeros(feature_bits: u8) -> Self {
        Self { feature_bits, weights: vec![0.0; 1 << feature_bits], bias: 0.0 }
    }

    fn check(&self, path: &Path) -> JobResult<()> {
        if !(1..=24).contains(&self.feature_bits) || self.weights.len() != 1 << self.feature_bits {
            return Err(JobError::corrupt_checkpoint(
                path,
                format!("expected {} weights for {} feature bits", 1u64 << self.feature_bits.min(24), self.feature_bits),
            ));
        }
        Ok(())
    }

    fn logit(&self, features: &[(usize, f32)]) -> f64 {
        let dot: f64 = features.iter().map(|(i, x)| f64::from(self.weights[*i]) * f64::from(*x)).sum();
        dot + f64::from(self.bias)
    }

    fn predict(&self, features: &[(usize, f32)]) -> f64 {
        sigmoid(self.logit(features))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AdamState {
    step: u64,
    /// First moments; the last slot belongs to the bias.
    m: Vec<f32>,
    v: Vec<f32>,
}

impl AdamState {
    fn zeros(len: usize) -> Self {
        Self { step: 0, m: vec![0.0; len], v: vec![0.0; len] }
    }
}

/// Trainer for the hashed logistic-regression classifier.
#[derive(Debug)]
pub struct HashedLogisticTrainer {
    feature_bits: u8,
    base_model: Option<PathBuf>,
    learning_rate: f64,
    batch_size: usize,
    train: Vec<Featurized>,
    validation: Vec<Featurized>,
    model: ModelWeights,
    optimizer: AdamState,
}

#[derive(Debug, Clone)]
struct Featurized {
    features: Vec<(usize, f32)>,
    label: f64,
}

impl Default for HashedLogisticTrainer {
    fn default() -> Self {
        Self::new(DEFAULT_FEATURE_BITS)
    }
}

impl HashedLogisticTrainer {
    /// `feature_bits` sets the hashed feature space to `2^feature_bits` weights.
    #[must_use]
    pub fn new(feature_bits: u8) -> Self {
        let feature_bits = feature_bits.clamp(1, 24);
        Self {
            feature_bits,
            base_model: None,
            learning_rate: HyperParams::default().learning_rate,
            batch_size: 1,
            train: Vec::new(),
            validation: Vec::new(),
            model: ModelWeights::zeros(feature_bits),
            optimizer: AdamState::zeros((1 << feature_bits) + 1),
        }
    }

    /// Start from the weights of a previously exported model instead of zeros.
    #[must_use]
    pub fn with_base_model(mut self, model_dir: PathBuf) -> Self {
        self.base_model = Some(model_dir);
        self
    }

    fn featurize(&self, data: &Dataset) -> Vec<Featurized> {
        data.iter()
            .map(|LabeledExample { text, label }| Featurized {
                features: hashed_features(text, self.feature_bits),
                label: f64::from(*label),
            })
            .collect()
    }

    /// Index range of the training examples used at `step`. Batches repeat every epoch.
    fn batch_range(&self, step: u64) -> std::ops::Range<usize> {
        let spe = self.steps_per_epoch().max(1);
        let index = (step % spe) as usize;
        let start = index * self.batch_size;
        let end = (start + self.batch_size).min(self.train.len());
        start..end
    }

    /// One Adam update over a mini-batch. Returns the mean batch loss.
    fn apply_step(model: &mut ModelWeights, opt: &mut AdamState, batch: &[Featurized], lr: f64) -> f64 {
        let dims = model.weights.len();
        let mut grad = vec![0.0f64; dims + 1];
        let mut loss = 0.0;
        let scale = 1.0 / batch.len().max(1) as f64;

        for ex in batch {
            let p = model.predict(&ex.features);
            loss += bce(p, ex.label);
            let g = (p - ex.label) * scale;
            for (i, x) in &ex.features {
                grad[*i] += g * f64::from(*x);
            }
            grad[dims] += g;
        }

        opt.step += 1;
        let t = opt.step as i32;
        let bias1 = 1.0 - BETA1.powi(t);
        let bias2 = 1.0 - BETA2.powi(t);
        for (i, g) in grad.iter().enumerate() {
            let m = BETA1 * f64::from(opt.m[i]) + (1.0 - BETA1) * g;
            let v = BETA2 * f64::from(opt.v[i]) + (1.0 - BETA2) * g * g;
            opt.m[i] = m as f32;
            opt.v[i] = v as f32;
            let update = lr * (m / bias1) / ((v / bias2).sqrt() + EPSILON);
            if i == dims {
                model.bias -= update as f32;
            } else {
                model.weights[i] -= update as f32;
            }
        }

        loss * scale
    }
}

impl Trainer for HashedLogisticTrainer {
    fn id(&self) -> &'static str {
        "hashed-logistic"
    }

    fn prepare(&mut self, data: DatasetSplits, params: &HyperParams) -> JobResult<()> {
        params.validate()?;
        data.validate()?;
        self.learning_rate = params.learning_rate;
        self.batch_size = params.per_device_train_batch_size as usize;

        self.model = match &self.base_model {
            Some(dir) => {
                let path = dir.join(MODEL_FILE);
                let model = read_json::<ModelWeights>(&path)
                    .map_err(|e| JobError::Configuration(format!("failed to load base model: {e}")))?;
                if model.feature_bits != self.feature_bits {
                    return Err(JobError::Configuration(format!(
                        "base model uses {} feature bits, trainer uses {}",
                        model.feature_bits, self.feature_bits
                    )));
                }
                model.check(&path)?;
                model
            }
            None => ModelWeights::zeros(self.feature_bits),
        };
        self.optimizer = AdamState::zeros(self.model.weights.len() + 1);
        self.train = self.featurize(&data.train);
        self.validation = self.featurize(&data.validation);
        Ok(())
    }

    fn steps_per_epoch(&self) -> u64 {
        if self.batch_size == 0 {
            return 0;
        }
        self.train.len().div_ceil(self.batch_size) as u64
    }

    fn restore(&mut self, checkpoint_dir: &Path) -> JobResult<()> {
        let model_path = checkpoint_dir.join(MODEL_FILE);
        let opt_path = checkpoint_dir.join(OPTIMIZER_FILE);
        let model: ModelWeights = read_json(&model_path).map_err(|e| JobError::corrupt_checkpoint(&model_path, e))?;
        let optimizer: AdamState = read_json(&opt_path).map_err(|e| JobError::corrupt_checkpoint(&opt_path, e))?;

        model.check(&model_path)?;
        if model.feature_bits != self.feature_bits {
            return Err(JobError::corrupt_checkpoint(
                &model_path,
                format!("feature bits {} do not match trainer ({})", model.feature_bits, self.feature_bits),
            ));
        }
        if optimizer.m.len() != model.weights.len() + 1 || optimizer.v.len() != optimizer.m.len() {
            return Err(JobError::corrupt_checkpoint(&opt_path, "optimizer state does not match model size"));
        }

        self.model = model;
        self.optimizer = optimizer;
        Ok(())
    }

    fn train(&mut self, from_step: u64, to_step: u64) -> JobResult<TrainStepReport> {
        if self.train.is_empty() {
            return Err(JobError::Trainer("trainer has no training data; call prepare first".to_string()));
        }
        let mut total = 0.0;
        let mut steps = 0u64;
        for step in from_step..to_step {
            let range = self.batch_range(step);
            total += Self::apply_step(&mut self.model, &mut self.optimizer, &self.train[range], self.learning_rate);
            steps += 1;
        }
        Ok(TrainStepReport {
            global_step: to_step.max(from_step),
            train_loss: (steps > 0).then(|| total / steps as f64),
        })
    }

    fn evaluate(&mut self) -> JobResult<EvaluationRecord> {
        if self.validation.is_empty() {
            return Err(JobError::Trainer("trainer has no validation data; call prepare first".to_string()));
        }
        let mut loss = 0.0;
        let (mut correct, mut tp, mut fp, mut fneg) = (0usize, 0usize, 0usize, 0usize);
        for ex in &self.validation {
            let p = self.model.predict(&ex.features);
            loss += bce(p, ex.label);
            let predicted = is_toxic(p, DEFAULT_THRESHOLD);
            let actual = ex.label >= 0.5;
            match (predicted, actual) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, true) => fneg += 1,
                (false, false) => {}
            }
            if predicted == actual {
                correct += 1;
            }
        }
        let n = self.validation.len() as f64;
        let f1 = if tp == 0 { 0.0 } else { 2.0 * tp as f64 / (2 * tp + fp + fneg) as f64 };

        Ok(EvaluationRecord::new()
            .with("eval_loss", loss / n)
            .with("eval_accuracy", correct as f64 / n)
            .with("eval_f1", f1))
    }

    fn save(&self, dir: &Path) -> JobResult<()> {
        std::fs::write(dir.join(MODEL_FILE), serde_json::to_vec(&self.model)?)?;
        std::fs::write(dir.join(OPTIMIZER_FILE), serde_json::to_vec(&self.optimizer)?)?;
        Ok(())
    }

    fn model_files(&self) -> &'static [&'static str] {
        &[MODEL_FILE]
    }
}

/// Inference side of the hashed logistic-regression model.
#[derive(Debug, Clone)]
pub struct ToxicityClassifier {
    model: ModelWeights,
    threshold: f64,
}

/// Classifier output for one text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub toxic: bool,
    pub probability: f64,
}

impl ToxicityClassifier {
    /// Load an exported model directory (a checkpoint or `final_model/`).
    pub fn load(model_dir: &Path) -> JobResult<Self> {
        let path = model_dir.join(MODEL_FILE);
        let model: ModelWeights = read_json(&path)
            .map_err(|e| JobError::Configuration(format!("failed to load model {}: {e}", path.display())))?;
        model.check(&path)?;
        Ok(Self { model, threshold: DEFAULT_THRESHOLD })
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn predict(&self, text: &str) -> Prediction {
        let probability = self.model.predict(&hashed_features(text, self.model.feature_bits));
        Prediction { toxic: is_toxic(probability, self.threshold), probability }
    }
}

fn is_toxic(probability: f64, threshold: f64) -> bool {
    probability >= threshold
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> JobResult<T> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn bce(p: f64, y: f64) -> f64 {
    let p = p.clamp(PROB_FLOOR, 1.0 - PROB_FLOOR);
    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
}

/// Lowercased alphanumeric tokens hashed into `2^bits` buckets, L2-normalized.
fn hashed_features(text: &str, bits: u8) -> Vec<(usize, f32)> {
    let mask = (1u64 << bits) - 1;
    let mut indices: Vec<usize> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| (fnv1a(&t.to_lowercase()) & mask) as usize)
        .collect();
    indices.sort_unstable();
    indices.dedup();

    if indices.is_empty() {
        return Vec::new();
    }
    let value = 1.0 / (indices.len() as f32).sqrt();
    indices.into_iter().map(|i| (i, value)).collect()
}

/// 64-bit FNV-1a. Stable across platforms and releases, unlike `DefaultHasher`.
fn fnv1a(token: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    token.bytes().fold(OFFSET, |hash, b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}
