//! Blob storage for payloads too large to travel inline.
//!
//! Inputs arrive as a `payload_url` and are downloaded before the command
//! runs; oversized outputs are uploaded and replaced by a reference. The
//! reference is known as soon as an upload starts, so a reply can go out
//! while the bytes are still in flight.

mod http;
mod memory;

pub use http::HttpStorageClient;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::StorageError;

/// An upload that has been accepted and may still be transferring.
pub struct Upload {
    pub url: String,
    pub completion: JoinHandle<Result<(), StorageError>>,
}

impl Upload {
    /// Wait for the transfer to finish.
    pub async fn wait(self) -> Result<(), StorageError> {
        match self.completion.await {
            Ok(result) => result,
            Err(e) => Err(StorageError::Upload(format!("upload task failed: {e}"))),
        }
    }
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Fetch the bytes behind `url`.
    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError>;

    /// Start storing `payload`. Errors here mean the upload could not even
    /// be started; transfer failures surface through [`Upload::completion`].
    async fn upload(&self, payload: Vec<u8>) -> Result<Upload, StorageError>;
}

/// Turn a configured endpoint into a base URL. A bare `host:port` is
/// assumed to speak HTTPS.
pub fn normalize_endpoint(endpoint: &str) -> Result<String, StorageError> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(StorageError::InvalidEndpoint(endpoint.to_string()));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_string())
    } else if trimmed.contains("://") {
        Err(StorageError::InvalidEndpoint(endpoint.to_string()))
    } else {
        Ok(format!("https://{trimmed}"))
    }
}
