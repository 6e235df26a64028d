//! Kafka transport built on rdkafka.
//!
//! - Jobs: one group consumer over `<prefix>.io` and `<prefix>.ping`, manual
//!   commits carrying the status tag as offset metadata.
//! - Control: an assigned (group-less) consumer on partition 0 of
//!   `<prefix>.meta`, positioned `replay_window` entries before the end.
//! - Publisher: one `acks=all` producer shared by replies and heartbeats.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::{debug, info};

use super::{AckStatus, MessageSource, Publisher, QueueMessage, QueueTransport};
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::naming::{consumer_group_name, ModuleTopics};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const CONTROL_PARTITION: i32 = 0;

/// Connect all three endpoints for `module`.
pub fn connect(config: &QueueConfig, module: &str) -> Result<QueueTransport, QueueError> {
    let topics = ModuleTopics::new(module);
    let brokers = config.brokers.join(",");

    let jobs = KafkaJobSource::subscribe(&brokers, &config.client_id, &topics.jobs())?;
    let control = KafkaControlSource::replay(
        &brokers,
        &config.client_id,
        &topics.meta(),
        config.replay_window,
    )?;
    let publisher = KafkaPublisher::new(&brokers, &config.client_id)?;

    info!(brokers = %brokers, "Connected to Kafka");

    Ok(QueueTransport {
        jobs: Box::new(jobs),
        control: Box::new(control),
        publisher: Arc::new(publisher),
    })
}

fn base_config(brokers: &str, client_id: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", brokers);
    config.set("client.id", client_id);
    config
}

fn to_queue_message(message: &BorrowedMessage<'_>) -> QueueMessage {
    QueueMessage {
        topic: message.topic().to_string(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default(),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        partition: message.partition(),
        offset: message.offset(),
    }
}

pub struct KafkaJobSource {
    consumer: StreamConsumer,
}

impl KafkaJobSource {
    pub fn subscribe(brokers: &str, client_id: &str, topics: &[String]) -> Result<Self, QueueError> {
        let group = consumer_group_name(topics);
        let mut config = base_config(brokers, client_id);
        config.set("group.id", &group);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "earliest");

        let consumer: StreamConsumer = config
            .create()
            .map_err(|e| QueueError::Setup(format!("Failed to create job consumer: {e}")))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| QueueError::Setup(format!("Failed to subscribe to {topics:?}: {e}")))?;

        info!(topics = ?topics, group = %group, "Subscribed to job topics");
        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageSource for KafkaJobSource {
    async fn next(&self) -> Result<Option<QueueMessage>, QueueError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;
        Ok(Some(to_queue_message(&message)))
    }

    async fn commit(&self, message: &QueueMessage, status: AckStatus) -> Result<(), QueueError> {
        let commit_err = |reason: String| QueueError::Commit {
            topic: message.topic.clone(),
            offset: message.offset,
            reason,
        };

        let mut tpl = TopicPartitionList::new();
        let mut elem = tpl.add_partition(&message.topic, message.partition);
        elem.set_offset(Offset::Offset(message.offset + 1))
            .map_err(|e| commit_err(e.to_string()))?;
        elem.set_metadata(status.as_str());

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| commit_err(e.to_string()))?;
        debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            status = %status,
            "Offset committed"
        );
        Ok(())
    }
}

pub struct KafkaControlSource {
    consumer: StreamConsumer,
}

impl KafkaControlSource {
    /// Assign partition 0 of `topic`, starting at most `window` entries
    /// before its end.
    pub fn replay(
        brokers: &str,
        client_id: &str,
        topic: &str,
        window: i64,
    ) -> Result<Self, QueueError> {
        let mut config = base_config(brokers, client_id);
        config.set("group.id", format!("{client_id}.meta.{}", uuid::Uuid::new_v4()));
        config.set("enable.auto.commit", "false");

        let consumer: StreamConsumer = config
            .create()
            .map_err(|e| QueueError::Setup(format!("Failed to create control consumer: {e}")))?;

        let (low, high) = consumer
            .fetch_watermarks(topic, CONTROL_PARTITION, METADATA_TIMEOUT)
            .map_err(|e| QueueError::Setup(format!("Failed to fetch offsets for {topic}: {e}")))?;
        let start = replay_start(low, high, window);

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, CONTROL_PARTITION, Offset::Offset(start))
            .map_err(|e| QueueError::Setup(e.to_string()))?;
        consumer
            .assign(&tpl)
            .map_err(|e| QueueError::Setup(format!("Failed to assign {topic}: {e}")))?;

        info!(topic, start, newest = high, "Replaying control topic");
        Ok(Self { consumer })
    }
}

/// First offset to replay: `window` before the end, never before the oldest
/// retained entry.
pub fn replay_start(oldest: i64, newest: i64, window: i64) -> i64 {
    (newest - window).max(oldest)
}

#[async_trait]
impl MessageSource for KafkaControlSource {
    async fn next(&self) -> Result<Option<QueueMessage>, QueueError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| QueueError::Consume(e.to_string()))?;
        Ok(Some(to_queue_message(&message)))
    }

    /// Control entries are replayed on every start and never committed.
    async fn commit(&self, _message: &QueueMessage, _status: AckStatus) -> Result<(), QueueError> {
        Ok(())
    }
}

pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    pub fn new(brokers: &str, client_id: &str) -> Result<Self, QueueError> {
        let mut config = base_config(brokers, client_id);
        config.set("acks", "all");
        config.set("message.timeout.ms", "5000");

        let producer: FutureProducer = config
            .create()
            .map_err(|e| QueueError::Setup(format!("Failed to create Kafka producer: {e}")))?;
        Ok(Self { producer })
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<(), QueueError> {
        let record = FutureRecord::to(topic).key(key).payload(&value);
        let (partition, offset) = self
            .producer
            .send(record, PUBLISH_TIMEOUT)
            .await
            .map_err(|(e, _)| QueueError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        debug!(topic, key, partition, offset, "Message published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_start_is_bounded_by_oldest() {
        assert_eq!(replay_start(0, 5000, 1000), 4000);
        assert_eq!(replay_start(0, 10, 1000), 0);
        assert_eq!(replay_start(300, 900, 1000), 300);
    }
}
