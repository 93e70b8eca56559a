//! Object store boundary.
//!
//! Source files are retrieved by key from an [ObjectStore]. The S3 implementation lives in
//! [crate::s3_client]. [FileSystemStore] serves the same key layout from a local directory.

use crate::dataset::Timestamp;
use crate::error::RetrievalError;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use time::OffsetDateTime;

/// Listing entry for a stored object.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    /// Size in bytes
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
}

/// A store of named objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Retrieve the whole of an object.
    async fn get(&self, key: &str) -> Result<Bytes, RetrievalError>;

    /// List objects whose keys start with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, RetrievalError>;
}

/// Whether a key names a loadable dataset file.
pub fn is_dataset_key(key: &str) -> bool {
    let key = key.to_lowercase();
    key.ends_with(".csv") || key.ends_with(".csv.gz") || key.ends_with(".parquet")
}

/// Objects stored as files under a root directory. Keys are `/`-separated paths relative to
/// the root.
#[derive(Clone, Debug)]
pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSystemStore { root: root.into() }
    }

    /// Path of the file for a key. Keys that would escape the root do not exist.
    fn path(&self, key: &str) -> Result<PathBuf, RetrievalError> {
        let relative = Path::new(key);
        if key.is_empty() || !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(RetrievalError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    /// Key of a file below the root.
    fn key(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
        parts.map(|parts| parts.join("/"))
    }
}

fn io_error(key: &str, error: std::io::Error) -> RetrievalError {
    let key = key.to_string();
    match error.kind() {
        ErrorKind::NotFound => RetrievalError::NotFound { key },
        ErrorKind::PermissionDenied => RetrievalError::AccessDenied { key },
        ErrorKind::TimedOut => RetrievalError::Timeout { key },
        _ => RetrievalError::Transport {
            key,
            message: error.to_string(),
        },
    }
}

#[async_trait]
impl ObjectStore for FileSystemStore {
    async fn get(&self, key: &str) -> Result<Bytes, RetrievalError> {
        let path = self.path(key)?;
        let data = tokio::fs::read(&path).await.map_err(|err| io_error(key, err))?;
        tracing::debug!(key, size = data.len(), "read object from file");
        Ok(data.into())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, RetrievalError> {
        let mut objects = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|err| io_error(prefix, err))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| io_error(prefix, err))?
            {
                let metadata = entry.metadata().await.map_err(|err| io_error(prefix, err))?;
                let path = entry.path();
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(key) = self.key(&path) else {
                    continue;
                };
                if !key.starts_with(prefix) {
                    continue;
                }
                let last_modified = metadata
                    .modified()
                    .ok()
                    .and_then(|modified| Timestamp::from_datetime(OffsetDateTime::from(modified)).ok());
                objects.push(ObjectInfo {
                    key,
                    size: metadata.len(),
                    last_modified,
                });
            }
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}
