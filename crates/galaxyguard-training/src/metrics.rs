//! Evaluation records and the metric line format read by the job monitor.

use crate::error::JobResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;

/// Metric values produced by one evaluation cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationRecord(BTreeMap<String, f64>);

impl EvaluationRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for EvaluationRecord {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// One entry of the driver's log history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochLog {
    /// One-based epoch number.
    pub epoch: u32,
    pub global_step: u64,
    pub train_loss: Option<f64>,
    pub metrics: EvaluationRecord,
}

/// Writes `<key>=<value>;` lines for the external job monitor.
///
/// The monitor extracts values with the regex `<key>=(.*?);`, so the line
/// shape is fixed, trailing semicolon included.
pub struct MetricReporter {
    key: String,
    out: Box<dyn Write + Send>,
}

impl std::fmt::Debug for MetricReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricReporter").field("key", &self.key).finish_non_exhaustive()
    }
}

impl MetricReporter {
    pub fn new(key: impl Into<String>, out: impl Write + Send + 'static) -> Self {
        Self { key: key.into(), out: Box::new(out) }
    }

    /// Reporter writing to the process's standard output.
    pub fn stdout(key: impl Into<String>) -> Self {
        Self::new(key, std::io::stdout())
    }

    #[must_use]
    pub fn format_line(key: &str, value: f64) -> String {
        format!("{key}={value};")
    }

    /// Emit the objective metric from `record`. Returns whether a line was written.
    ///
    /// A record without the objective metric produces no output.
    pub fn report(&mut self, record: &EvaluationRecord) -> JobResult<bool> {
        let Some(value) = record.get(&self.key) else {
            return Ok(false);
        };
        writeln!(self.out, "{}", Self::format_line(&self.key, value))?;
        self.out.flush()?;
        Ok(true)
    }
}
