//! Event bus seams for the order services.
//!
//! Publishers put keyed payloads on a topic. Sources hand out deliveries one
//! at a time and only forget them once the caller commits an offset, so a
//! crash before the commit means the message is delivered again.
//!
//! Two backends are provided: [`InMemoryBroker`] for tests and single-process
//! runs, and Kafka behind the `kafka` feature.

pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

use async_trait::async_trait;

pub use error::{BusError, Result};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaPublisher, KafkaSource};
pub use memory::{InMemoryBroker, InMemoryConsumer};

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Publishes messages to a topic.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Returns once the bus has accepted the message.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()>;
}

/// A consumer-group subscription.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Waits for the next message.
    async fn fetch(&self) -> Result<Delivery>;

    /// Marks every offset below `next_offset` on the partition as processed.
    async fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()>;
}
