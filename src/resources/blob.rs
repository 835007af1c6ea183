//! Blob store access.
//!
//! The partitioner only ever asks for object sizes; whole objects are pulled
//! for the scene document itself.

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use crate::error::BlobError;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Size of an object in bytes without transferring it.
    async fn object_size(&self, bucket: &str, key: &str) -> Result<u64, BlobError>;

    async fn download_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError>;

    async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), BlobError>;
}

/// Buckets are directories below `root`, keys are paths inside them. Neither
/// may be absolute or contain `.`/`..` segments.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, bucket: &str, key: &str) -> Result<PathBuf, BlobError> {
        let key_path = Path::new(key.trim_start_matches('/'));
        let bucket_path = Path::new(bucket);
        let bucket_ok = is_relative_descent(bucket_path) && bucket_path.components().count() == 1;
        if !bucket_ok || !is_relative_descent(key_path) {
            return Err(BlobError::InvalidPath {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(self.root.join(bucket_path).join(key_path))
    }
}

/// Every segment names a child; `.` and `..` are refused rather than resolved.
fn is_relative_descent(path: &Path) -> bool {
    path.components().next().is_some()
        && !path.to_string_lossy().split(['/', '\\']).any(|s| s == "." || s == "..")
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn io_error(bucket: &str, key: &str, source: std::io::Error) -> BlobError {
    if source.kind() == ErrorKind::NotFound {
        BlobError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    } else {
        BlobError::Io {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn object_size(&self, bucket: &str, key: &str) -> Result<u64, BlobError> {
        let metadata = tokio::fs::metadata(self.path(bucket, key)?)
            .await
            .map_err(|e| io_error(bucket, key, e))?;
        if !metadata.is_file() {
            return Err(BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(metadata.len())
    }

    async fn download_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        tokio::fs::read(self.path(bucket, key)?)
            .await
            .map_err(|e| io_error(bucket, key, e))
    }

    async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        let path = self.path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(bucket, key, e))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| io_error(bucket, key, e))
    }
}

/// In-process store. Counts size queries so callers can see how many remote
/// lookups a run would have issued.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    size_queries: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(bucket, key, bytes);
        self
    }

    pub fn insert(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((bucket.to_string(), key.to_string()), bytes.into());
    }

    pub fn size_queries(&self) -> usize {
        self.size_queries.load(Ordering::Relaxed)
    }

    fn get<T>(&self, bucket: &str, key: &str, f: impl FnOnce(&Vec<u8>) -> T) -> Result<T, BlobError> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(bucket.to_string(), key.to_string()))
            .map(f)
            .ok_or_else(|| BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn object_size(&self, bucket: &str, key: &str) -> Result<u64, BlobError> {
        self.size_queries.fetch_add(1, Ordering::Relaxed);
        self.get(bucket, key, |bytes| bytes.len() as u64)
    }

    async fn download_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobError> {
        self.get(bucket, key, Clone::clone)
    }

    async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        self.insert(bucket, key, bytes);
        Ok(())
    }
}
