//! Object-store boundary for datasets, checkpoints, and final models.

use crate::error::{JobError, JobResult};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Fetches and stores named blobs (files or directories) addressed by `(bucket, key)`.
///
/// Implementations report a missing object as [`JobError::ArtifactNotFound`]
/// and retryable transport failures as [`JobError::TransientStorage`].
pub trait ArtifactStore: Send + Sync {
    /// Materialize `bucket/key` locally and return the local path.
    fn download(&self, bucket: &str, key: &str) -> JobResult<PathBuf>;

    /// Store the file or directory at `local_path` as `bucket/key`, replacing any existing object.
    fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> JobResult<()>;
}

/// Filesystem-backed store. Objects live at `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
    download_dir: PathBuf,
}

impl LocalArtifactStore {
    /// `download_dir` receives downloaded objects, keyed by their object key.
    #[must_use]
    pub fn new(root: PathBuf, download_dir: PathBuf) -> Self {
        Self { root, download_dir }
    }

    #[must_use]
    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn download(&self, bucket: &str, key: &str) -> JobResult<PathBuf> {
        validate_key(bucket)?;
        validate_key(key)?;
        let source = self.object_path(bucket, key);
        if !source.exists() {
            return Err(JobError::ArtifactNotFound { bucket: bucket.to_string(), key: key.to_string() });
        }

        let target = self.download_dir.join(key);
        replace_path(&source, &target).map_err(storage_error)?;
        debug!(bucket, key, path = %target.display(), "Downloaded artifact");
        Ok(target)
    }

    fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> JobResult<()> {
        validate_key(bucket)?;
        validate_key(key)?;
        if !local_path.exists() {
            return Err(JobError::Configuration(format!("upload source does not exist: {}", local_path.display())));
        }

        let target = self.object_path(bucket, key);
        replace_path(local_path, &target).map_err(storage_error)?;
        debug!(bucket, key, source = %local_path.display(), "Uploaded artifact");
        Ok(())
    }
}

fn validate_key(key: &str) -> JobResult<()> {
    let path = Path::new(key);
    let ok = !key.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(JobError::Configuration(format!("invalid object key: {key:?}")))
    }
}

fn storage_error(err: std::io::Error) -> JobError {
    match err.kind() {
        ErrorKind::TimedOut
        | ErrorKind::Interrupted
        | ErrorKind::WouldBlock
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionRefused
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => JobError::TransientStorage(err.to_string()),
        _ => JobError::Io(err),
    }
}

/// Copy `source` (file or directory) to `target`, replacing whatever was there.
fn replace_path(source: &Path, target: &Path) -> std::io::Result<()> {
    if target.is_dir() {
        std::fs::remove_dir_all(target)?;
    } else if target.exists() {
        std::fs::remove_file(target)?;
    }

    if source.is_dir() {
        copy_dir(source, target)
    } else {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, target)?;
        Ok(())
    }
}

/// Recursively copy a directory tree.
pub fn copy_dir(source: &Path, target: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry.path().strip_prefix(source).map_err(std::io::Error::other)?;
        let dest = target.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_download_missing_object_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(temp.path().join("store"), temp.path().join("data"));

        let err = store.download("galaxyguard", "data/train.jsonl").unwrap_err();
        assert!(matches!(err, JobError::ArtifactNotFound { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_upload_then_download_file() {
        let temp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(temp.path().join("store"), temp.path().join("data"));
        let local = temp.path().join("train.jsonl");
        std::fs::write(&local, b"{\"text\":\"x\",\"label\":0}\n").unwrap();

        store.upload(&local, "galaxyguard", "data/train.jsonl").unwrap();
        let downloaded = store.download("galaxyguard", "data/train.jsonl").unwrap();

        assert_eq!(downloaded, temp.path().join("data/data/train.jsonl"));
        assert_eq!(std::fs::read(downloaded).unwrap(), std::fs::read(local).unwrap());
    }

    #[test]
    fn test_directory_upload_replaces_previous_object() {
        let temp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(temp.path().join("store"), temp.path().join("data"));

        let first = temp.path().join("first");
        std::fs::create_dir_all(first.join("nested")).unwrap();
        std::fs::write(first.join("nested/old.bin"), b"old").unwrap();
        store.upload(&first, "galaxyguard", "output/model").unwrap();

        let second = temp.path().join("second");
        std::fs::create_dir_all(&second).unwrap();
        std::fs::write(second.join("model.json"), b"{}").unwrap();
        store.upload(&second, "galaxyguard", "output/model").unwrap();

        let object = store.object_path("galaxyguard", "output/model");
        assert!(object.join("model.json").exists());
        assert!(!object.join("nested").exists());
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let temp = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(temp.path().join("store"), temp.path().join("data"));
        assert!(matches!(store.download("galaxyguard", "../secrets"), Err(JobError::Configuration(_))));
        assert!(matches!(store.download("galaxyguard", "/etc/passwd"), Err(JobError::Configuration(_))));
    }

    #[test]
    fn test_timeouts_map_to_transient() {
        let err = storage_error(std::io::Error::new(ErrorKind::TimedOut, "slow"));
        assert!(err.is_transient());
        let err = storage_error(std::io::Error::new(ErrorKind::PermissionDenied, "nope"));
        assert!(!err.is_transient());
    }
}
