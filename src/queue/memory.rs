//! Channel-backed queue transport.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{AckStatus, MessageSource, Publisher, QueueMessage};
use crate::error::QueueError;

/// Feeds messages pushed through [`MemorySender`] and records commits.
pub struct MemorySource {
    rx: Mutex<mpsc::UnboundedReceiver<QueueMessage>>,
    commits: Arc<Mutex<Vec<(QueueMessage, AckStatus)>>>,
}

/// Producer half of a [`MemorySource`]. Dropping every sender ends the
/// stream.
#[derive(Clone)]
pub struct MemorySender {
    tx: mpsc::UnboundedSender<QueueMessage>,
    next_offset: Arc<AtomicI64>,
}

/// Read side of the commits made on a [`MemorySource`].
#[derive(Clone, Default)]
pub struct CommitLog {
    commits: Arc<Mutex<Vec<(QueueMessage, AckStatus)>>>,
}

pub fn memory_source() -> (MemorySender, MemorySource, CommitLog) {
    let (tx, rx) = mpsc::unbounded_channel();
    let log = CommitLog::default();
    let source = MemorySource {
        rx: Mutex::new(rx),
        commits: log.commits.clone(),
    };
    let sender = MemorySender {
        tx,
        next_offset: Arc::new(AtomicI64::new(0)),
    };
    (sender, source, log)
}

impl MemorySender {
    /// Append a message on partition 0, assigning the next offset.
    pub fn send(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<i64, QueueError> {
        let offset = self
            .next_offset
            .fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(QueueMessage {
                topic: topic.to_string(),
                key: key.to_string(),
                value,
                partition: 0,
                offset,
            })
            .map_err(|_| QueueError::StreamClosed)?;
        Ok(offset)
    }
}

impl CommitLog {
    pub async fn entries(&self) -> Vec<(QueueMessage, AckStatus)> {
        self.commits.lock().await.clone()
    }

    pub async fn statuses(&self) -> Vec<AckStatus> {
        self.commits.lock().await.iter().map(|(_, s)| *s).collect()
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn next(&self) -> Result<Option<QueueMessage>, QueueError> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn commit(&self, message: &QueueMessage, status: AckStatus) -> Result<(), QueueError> {
        self.commits.lock().await.push((message.clone(), status));
        Ok(())
    }
}

/// A message captured by [`MemoryPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub key: String,
    pub value: Vec<u8>,
}

/// Publisher that keeps everything it is given.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    published: Arc<Mutex<Vec<Published>>>,
    fail: Arc<AtomicBool>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<Published> {
        self.published.lock().await.clone()
    }

    pub async fn on_topic(&self, topic: &str) -> Vec<Published> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Make following publishes fail, as a lost broker connection would.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<(), QueueError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(QueueError::Publish {
                topic: topic.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }
        self.published.lock().await.push(Published {
            topic: topic.to_string(),
            key: key.to_string(),
            value,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn source_yields_in_order_and_ends_when_senders_drop() {
        let (sender, source, log) = memory_source();
        sender.send("t", "a", vec![1]).unwrap();
        sender.send("t", "b", vec![2]).unwrap();
        drop(sender);

        let first = source.next().await.unwrap().unwrap();
        let second = source.next().await.unwrap().unwrap();
        assert_eq!((first.key.as_str(), first.offset), ("a", 0));
        assert_eq!((second.key.as_str(), second.offset), ("b", 1));
        assert!(source.next().await.unwrap().is_none());

        source.commit(&first, AckStatus::Success).await.unwrap();
        assert_eq!(log.statuses().await, vec![AckStatus::Success]);
    }

    #[tokio::test]
    async fn publisher_records_and_fails_on_demand() {
        let publisher = MemoryPublisher::new();
        publisher.publish("x", "k", b"v".to_vec()).await.unwrap();
        assert_eq!(publisher.on_topic("x").await.len(), 1);

        publisher.fail_publishes(true);
        assert!(publisher.publish("x", "k", Vec::new()).await.is_err());
        assert_eq!(publisher.published().await.len(), 1);
    }
}
