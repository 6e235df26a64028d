use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{StorageClient, Upload};
use crate::error::StorageError;

/// In-process blob store. Used by tests and local runs without a storage
/// service.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    next_id: Arc<AtomicU64>,
    fail_uploads: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `payload` under `url` so a later download finds it.
    pub async fn insert(&self, url: impl Into<String>, payload: Vec<u8>) {
        self.blobs.write().await.insert(url.into(), payload);
    }

    pub async fn get(&self, url: &str) -> Option<Vec<u8>> {
        self.blobs.read().await.get(url).cloned()
    }

    /// Make every following upload fail to start.
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        self.get(url).await.ok_or_else(|| StorageError::Download {
            url: url.to_string(),
            reason: "not found".to_string(),
        })
    }

    async fn upload(&self, payload: Vec<u8>) -> Result<Upload, StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Upload("storage unavailable".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let url = format!("mem://blobs/{id}");
        self.insert(url.clone(), payload).await;
        Ok(Upload {
            url,
            completion: tokio::spawn(async { Ok(()) }),
        })
    }
}
