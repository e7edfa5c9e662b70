//! Kafka backend.
//!
//! Producers wait for all in-sync replicas and are idempotent. Consumers
//! never auto-commit: offsets move only through [`EventSource::commit`].

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::{BusError, Delivery, EventPublisher, EventSource, Result};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings shared by publishers and sources.
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers.
    pub bootstrap_servers: String,
    pub group_id: String,
}

impl KafkaConfig {
    pub fn new(bootstrap_servers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            group_id: group_id.into(),
        }
    }

    fn producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("message.timeout.ms", "5000");
        config.set("acks", "all");
        config.set("enable.idempotence", "true");
        config
    }

    fn consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("group.id", &self.group_id);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "earliest");
        config
    }
}

/// Publishes through a shared `FutureProducer`. Clones share the producer.
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .producer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka producer: {e}")))?;

        info!(bootstrap_servers = %config.bootstrap_servers, "Kafka producer ready");
        Ok(Self { producer })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let (partition, offset) = self
            .producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(e, _)| BusError::Publish(format!("Failed to publish to {topic}: {e}")))?;

        debug!(topic, key, partition, offset, "Published message to Kafka");
        Ok(())
    }
}

/// A consumer-group member subscribed to a fixed set of topics.
pub struct KafkaSource {
    consumer: StreamConsumer,
}

impl KafkaSource {
    pub fn new(config: &KafkaConfig, topics: &[&str]) -> Result<Self> {
        let consumer: StreamConsumer = config
            .consumer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {e}")))?;

        consumer
            .subscribe(topics)
            .map_err(|e| BusError::Connection(format!("Failed to subscribe to {topics:?}: {e}")))?;

        info!(group_id = %config.group_id, ?topics, "Subscribed to Kafka topics");
        Ok(Self { consumer })
    }
}

#[async_trait]
impl EventSource for KafkaSource {
    async fn fetch(&self) -> Result<Delivery> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BusError::Fetch(e.to_string()))?;

        Ok(Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    async fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(topic, partition, Offset::Offset(next_offset))
            .map_err(|e| BusError::Commit(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BusError::Commit(e.to_string()))
    }
}
