use crate::error::{JobError, JobResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Stable identifier for a dataset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// A single labelled text. `label` is 1 for toxic, 0 otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub text: String,
    pub label: u8,
}

impl LabeledExample {
    pub fn new(text: impl Into<String>, toxic: bool) -> Self {
        Self { text: text.into(), label: u8::from(toxic) }
    }

    #[must_use]
    pub fn is_toxic(&self) -> bool {
        self.label == 1
    }
}

pub type Dataset = Vec<LabeledExample>;

/// Train and validation splits for one job.
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    pub train: Dataset,
    pub validation: Dataset,
}

impl DatasetSplits {
    pub fn validate(&self) -> JobResult<()> {
        validate_examples("train", &self.train)?;
        validate_examples("validation", &self.validation)?;
        Ok(())
    }
}

/// Read a JSONL dataset, one `LabeledExample` per line. Blank lines are skipped.
pub fn read_jsonl_dataset(path: &Path) -> JobResult<Dataset> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        JobError::Configuration(format!("failed to read dataset {}: {e}", path.display()))
    })?;
    let mut dataset = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let ex: LabeledExample = serde_json::from_str(line).map_err(|e| {
            JobError::Configuration(format!("{}: failed to parse jsonl line {}: {e}", path.display(), idx + 1))
        })?;
        dataset.push(ex);
    }

    Ok(dataset)
}

pub fn write_jsonl_dataset(path: &Path, examples: &[LabeledExample]) -> JobResult<()> {
    let mut out = String::new();
    for ex in examples {
        out.push_str(&serde_json::to_string(ex)?);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

pub fn compute_dataset_id(examples: &[LabeledExample]) -> JobResult<DatasetId> {
    let mut hasher = Sha256::new();

    for ex in examples {
        let bytes = serde_json::to_vec(ex)?;
        hasher.update(bytes);
        hasher.update(b"\n");
    }

    Ok(DatasetId(hex::encode(hasher.finalize())))
}

pub fn validate_examples(split: &str, examples: &[LabeledExample]) -> JobResult<()> {
    if examples.is_empty() {
        return Err(JobError::Configuration(format!("{split} dataset must not be empty")));
    }
    for (idx, ex) in examples.iter().enumerate() {
        if ex.text.trim().is_empty() {
            return Err(JobError::Configuration(format!("{split}[{idx}] text is empty")));
        }
        if ex.label > 1 {
            return Err(JobError::Configuration(format!("{split}[{idx}] label must be 0 or 1, got {}", ex.label)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_examples_rejects_empty() {
        let examples: Vec<LabeledExample> = vec![];
        assert!(validate_examples("train", &examples).is_err());
    }

    #[test]
    fn test_validate_examples_rejects_bad_label() {
        let examples = vec![LabeledExample { text: "hi".to_string(), label: 2 }];
        let err = validate_examples("train", &examples).unwrap_err();
        assert!(err.to_string().contains("label must be 0 or 1"));
    }

    #[test]
    fn test_jsonl_read_skips_blank_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train.jsonl");
        std::fs::write(&path, "{\"text\":\"you are great\",\"label\":0}\n\n{\"text\":\"you are awful\",\"label\":1}\n").unwrap();

        let ds = read_jsonl_dataset(&path).unwrap();
        assert_eq!(ds.len(), 2);
        assert!(ds[1].is_toxic());
    }

    #[test]
    fn test_malformed_line_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train.jsonl");
        std::fs::write(&path, "{\"text\":\"ok\",\"label\":0}\nnot json\n").unwrap();

        let err = read_jsonl_dataset(&path).unwrap_err();
        assert!(matches!(err, JobError::Configuration(_)));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_compute_dataset_id_stable_for_same_content() {
        let examples = vec![LabeledExample::new("p1", false), LabeledExample::new("p2", true)];

        let id1 = compute_dataset_id(&examples).unwrap();
        let id2 = compute_dataset_id(&examples).unwrap();
        assert_eq!(id1, id2);
    }
}
