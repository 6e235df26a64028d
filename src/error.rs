use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Payload download from {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("Payload upload failed: {0}")]
    Upload(String),

    #[error("Invalid storage endpoint: {0}")]
    InvalidEndpoint(String),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to consume: {0}")]
    Consume(String),

    #[error("Failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Failed to commit offset {offset} on {topic}: {reason}")]
    Commit {
        topic: String,
        offset: i64,
        reason: String,
    },

    #[error("Message stream closed")]
    StreamClosed,

    #[error("Queue client setup failed: {0}")]
    Setup(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invocation exceeded watchdog deadline; worker is wedged")]
    Wedged,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("TLS error: {0}")]
    Tls(#[from] crate::tls::TlsError),

    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
