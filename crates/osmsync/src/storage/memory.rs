//! In-process object store

use super::ObjectStore;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Object store kept in memory, for local runs and tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    bucket: String,
    bucket_exists: bool,
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    puts: Arc<Mutex<Vec<String>>>,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            bucket_exists: true,
            ..Self::default()
        }
    }

    /// A store whose bucket is reported as missing
    pub fn without_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket_exists: false,
            ..Self::new(bucket)
        }
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.objects().insert(key.into(), body.into());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects().get(key).cloned()
    }

    pub fn object_string(&self, key: &str) -> Option<String> {
        self.object(key)
            .map(|body| String::from_utf8_lossy(&body).into_owned())
    }

    /// Keys written through `put_object`, in write order
    pub fn put_keys(&self) -> Vec<String> {
        lock(&self.puts).clone()
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        lock(&self.objects)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> SyncResult<bool> {
        Ok(self.bucket_exists)
    }

    async fn get_object(&self, key: &str) -> SyncResult<Vec<u8>> {
        self.object(key).ok_or_else(|| SyncError::GetObject {
            key: key.to_string(),
            message: "NoSuchKey".to_string(),
        })
    }

    async fn put_object(&self, key: &str, body: Vec<u8>) -> SyncResult<()> {
        self.objects().insert(key.to_string(), body);
        lock(&self.puts).push(key.to_string());
        Ok(())
    }
}
