use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use uuid::Uuid;

use super::{normalize_endpoint, StorageClient, Upload};
use crate::error::StorageError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Storage service reached over HTTP: `GET <url>` to download and
/// `PUT <endpoint>/<uuid>` to upload.
#[derive(Debug, Clone)]
pub struct HttpStorageClient {
    client: Client,
    base_url: String,
}

impl HttpStorageClient {
    pub fn new(endpoint: &str) -> Result<Self, StorageError> {
        let base_url = normalize_endpoint(endpoint)?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StorageError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let fail = |reason: String| StorageError::Download {
            url: url.to_string(),
            reason,
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fail(e.to_string()))?;
        let body = response.bytes().await.map_err(|e| fail(e.to_string()))?;
        debug!(url, bytes = body.len(), "Payload downloaded");
        Ok(body.to_vec())
    }

    async fn upload(&self, payload: Vec<u8>) -> Result<Upload, StorageError> {
        let url = format!("{}/{}", self.base_url, Uuid::new_v4());
        let request = self.client.put(&url).body(payload);

        let completion = tokio::spawn(async move {
            request
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| StorageError::Upload(e.to_string()))?;
            Ok(())
        });

        Ok(Upload { url, completion })
    }
}
