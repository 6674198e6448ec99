use crate::errors::BlobStoreError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// In-memory blob backend (spec §4.1). Paths are `namespace/key` strings;
/// directories are implicit prefixes, tracked only so `make_dirs`/`exists`
/// behave the way a real filesystem-backed store would.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, BlobStoreError>;
    async fn make_dirs(&self, path: &str) -> Result<(), BlobStoreError>;
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), BlobStoreError>;
    async fn read(&self, path: &str) -> Result<Vec<u8>, BlobStoreError>;
    async fn remove(&self, path: &str) -> Result<(), BlobStoreError>;
    async fn close(&self) -> Result<(), BlobStoreError>;
}

#[derive(Default)]
struct Inner {
    files: HashMap<String, Vec<u8>>,
    dirs: HashSet<String>,
    locked: HashSet<String>,
    closed: bool,
}

/// The only `BlobStore` this crate ships: a `Mutex`-guarded in-memory map.
/// Real filesystem/S3/GCS backends are out of scope (spec Non-goals) but
/// would implement the same trait.
pub struct InMemoryBlobStore {
    inner: Mutex<Inner>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn parent_dirs(path: &str) -> Vec<String> {
        let mut dirs = Vec::new();
        let mut parts: Vec<&str> = path.split('/').collect();
        parts.pop();
        let mut acc = String::new();
        for part in parts {
            if acc.is_empty() {
                acc = part.to_string();
            } else {
                acc = format!("{acc}/{part}");
            }
            dirs.push(acc.clone());
        }
        dirs
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn exists(&self, path: &str) -> Result<bool, BlobStoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.files.contains_key(path) || inner.dirs.contains(path))
    }

    async fn make_dirs(&self, path: &str) -> Result<(), BlobStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(BlobStoreError::Generic("store is closed".to_string()));
        }
        for dir in Self::parent_dirs(path) {
            inner.dirs.insert(dir);
        }
        inner.dirs.insert(path.to_string());
        Ok(())
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<(), BlobStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(BlobStoreError::Generic("store is closed".to_string()));
        }
        if inner.locked.contains(path) {
            return Err(BlobStoreError::Locked(path.to_string()));
        }
        inner.files.insert(path.to_string(), data);
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, BlobStoreError> {
        let inner = self.inner.lock().unwrap();
        if inner.locked.contains(path) {
            return Err(BlobStoreError::Locked(path.to_string()));
        }
        inner
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| BlobStoreError::NotFound(path.to_string()))
    }

    async fn remove(&self, path: &str) -> Result<(), BlobStoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.locked.contains(path) {
            return Err(BlobStoreError::Locked(path.to_string()));
        }
        if inner.files.remove(path).is_none() {
            return Err(BlobStoreError::NotFound(path.to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BlobStoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        Ok(())
    }
}
