//! Storage contract for processed images and a local-filesystem adapter.
//!
//! The processor never touches storage itself; callers (the CLI included)
//! persist results through a [`StorageAdapter`].

use std::fmt;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use pf_core::{Error, ErrorKind, Result};

/// Location of a stored object: a bucket plus a relative path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    pub bucket: String,
    pub path: String,
}

impl StorageKey {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.path)
    }
}

/// Object storage capability.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn put(&self, key: &StorageKey, data: Bytes) -> Result<()>;

    async fn get(&self, key: &StorageKey) -> Result<Bytes>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, key: &StorageKey) -> Result<()>;

    async fn exists(&self, key: &StorageKey) -> Result<bool>;
}

/// Stores objects as files under `{root}/{bucket}/{path}`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` to a file path, refusing anything that would escape the
    /// root.
    fn resolve(&self, op: &str, key: &StorageKey) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in [key.bucket.as_str(), key.path.as_str()] {
            let relative = Path::new(part);
            let clean = !part.is_empty() && relative.components().all(|c| matches!(c, Component::Normal(_)));
            if !clean {
                return Err(Error::storage(op, ErrorKind::msg(format!("invalid storage key: {key}"))));
            }
            path.push(relative);
        }
        Ok(path)
    }
}

#[async_trait]
impl StorageAdapter for LocalStorage {
    async fn put(&self, key: &StorageKey, data: Bytes) -> Result<()> {
        let path = self.resolve("put", key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage("put", e.into()))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| Error::storage("put", e.into()))?;
        tracing::debug!(key = %key, bytes = data.len(), "stored object");
        Ok(())
    }

    async fn get(&self, key: &StorageKey) -> Result<Bytes> {
        let path = self.resolve("get", key)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::storage("get", e.into()))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &StorageKey) -> Result<()> {
        let path = self.resolve("delete", key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage("delete", e.into())),
        }
    }

    async fn exists(&self, key: &StorageKey) -> Result<bool> {
        let path = self.resolve("exists", key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::storage("exists", e.into()))
    }
}
