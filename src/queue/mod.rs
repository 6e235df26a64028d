//! Queue transport: job consumption, control-plane replay and publishing.
//!
//! The worker, metadata listener and registration task only see the
//! [`MessageSource`] and [`Publisher`] traits. [`memory`] backs them with
//! channels for tests and broker-less runs; `kafka` (feature `kafka`) backs
//! them with rdkafka.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::QueueError;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod metadata;
pub mod registration;
pub mod worker;

pub use metadata::MetadataListener;
pub use registration::Registration;
pub use worker::{QueueWorker, EXIT_CANCELLED, EXIT_FLUSH};

/// A message read from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub topic: String,
    pub key: String,
    pub value: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

/// Outcome recorded alongside a committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Success,
    Error,
    Flush,
    Cancel,
    Invalid,
}

impl AckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckStatus::Success => "success",
            AckStatus::Error => "error",
            AckStatus::Flush => "flush",
            AckStatus::Cancel => "cancel",
            AckStatus::Invalid => "invalid",
        }
    }

    pub fn from_exitcode(exitcode: i32) -> Self {
        if exitcode == 0 {
            AckStatus::Success
        } else {
            AckStatus::Error
        }
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered stream of messages with manual acknowledgment.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Next message, or `None` once the stream has ended.
    async fn next(&self) -> Result<Option<QueueMessage>, QueueError>;

    /// Acknowledge `message` so it is not redelivered.
    async fn commit(&self, message: &QueueMessage, status: AckStatus) -> Result<(), QueueError>;
}

/// Outbound publisher shared by the worker and the registration task.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish and wait for the broker's acknowledgment.
    async fn publish(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<(), QueueError>;
}

/// The three queue endpoints a worker needs.
pub struct QueueTransport {
    /// Consumer-group stream over the module's job topics.
    pub jobs: Box<dyn MessageSource>,
    /// Replaying stream over the module's control topic.
    pub control: Box<dyn MessageSource>,
    pub publisher: Arc<dyn Publisher>,
}
