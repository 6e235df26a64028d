//! Server identity for the authenticated gRPC channel.
//!
//! The worker always presents its own certificate. When a CA is configured,
//! callers must also present a certificate signed by it.

use std::path::{Path, PathBuf};

use tokio::fs;
use tonic::transport::{Certificate, Identity, ServerTlsConfig};

use crate::config::TlsConfig;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Server certificate path not configured")]
    MissingCert,

    #[error("Private key path not configured")]
    MissingKey,

    #[error("CA certificate not found: {0}")]
    CaCertNotFound(PathBuf),

    #[error("Server certificate not found: {0}")]
    CertNotFound(PathBuf),

    #[error("Private key not found: {0}")]
    KeyNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),
}

/// Loaded TLS materials ready for use with tonic.
#[derive(Clone)]
pub struct TlsIdentity {
    identity: Identity,
    /// Present when client certificates are verified.
    client_ca: Option<Certificate>,
}

impl TlsIdentity {
    /// Load the server certificate, key and optional client CA.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate or key path is not configured, or
    /// if any configured file does not exist or cannot be read.
    pub async fn load(config: &TlsConfig) -> Result<Self, TlsError> {
        let cert_path = config.cert_path.as_ref().ok_or(TlsError::MissingCert)?;
        let key_path = config.key_path.as_ref().ok_or(TlsError::MissingKey)?;

        let cert_pem = read_existing(cert_path, TlsError::CertNotFound).await?;
        let key_pem = read_existing(key_path, TlsError::KeyNotFound).await?;
        let client_ca = match &config.ca_cert_path {
            Some(path) => Some(Certificate::from_pem(
                read_existing(path, TlsError::CaCertNotFound).await?,
            )),
            None => None,
        };

        Ok(Self {
            identity: Identity::from_pem(cert_pem, key_pem),
            client_ca,
        })
    }

    pub fn verifies_clients(&self) -> bool {
        self.client_ca.is_some()
    }

    pub fn server_tls_config(&self) -> ServerTlsConfig {
        let config = ServerTlsConfig::new().identity(self.identity.clone());
        match &self.client_ca {
            Some(ca) => config.client_ca_root(ca.clone()),
            None => config,
        }
    }
}

async fn read_existing(
    path: &Path,
    missing: fn(PathBuf) -> TlsError,
) -> Result<Vec<u8>, TlsError> {
    if !path.exists() {
        return Err(missing(path.to_path_buf()));
    }
    Ok(fs::read(path).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_paths() {
        let config = TlsConfig {
            enabled: true,
            ..Default::default()
        };

        let result = TlsIdentity::load(&config).await;
        assert!(matches!(result, Err(TlsError::MissingCert)));
    }

    #[tokio::test]
    async fn test_load_nonexistent_files() {
        let config = TlsConfig {
            enabled: true,
            ca_cert_path: None,
            cert_path: Some(PathBuf::from("/nonexistent/server.crt")),
            key_path: Some(PathBuf::from("/nonexistent/server.key")),
            allow_insecure: false,
        };

        let result = TlsIdentity::load(&config).await;
        assert!(matches!(result, Err(TlsError::CertNotFound(_))));
    }

    #[tokio::test]
    async fn test_load_without_client_ca() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("server.crt");
        let key = dir.path().join("server.key");
        std::fs::write(&cert, b"cert").unwrap();
        std::fs::write(&key, b"key").unwrap();

        let config = TlsConfig {
            enabled: true,
            ca_cert_path: None,
            cert_path: Some(cert),
            key_path: Some(key),
            allow_insecure: false,
        };

        let identity = TlsIdentity::load(&config).await.unwrap();
        assert!(!identity.verifies_clients());
    }

    #[tokio::test]
    async fn test_missing_client_ca_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("server.crt");
        let key = dir.path().join("server.key");
        std::fs::write(&cert, b"cert").unwrap();
        std::fs::write(&key, b"key").unwrap();

        let config = TlsConfig {
            enabled: true,
            ca_cert_path: Some(dir.path().join("ca.crt")),
            cert_path: Some(cert),
            key_path: Some(key),
            allow_insecure: false,
        };

        let result = TlsIdentity::load(&config).await;
        assert!(matches!(result, Err(TlsError::CaCertNotFound(_))));
    }
}
