//! Process-local broker with Kafka-like offsets.
//!
//! Every topic is a single append-only partition (partition 0). Committed
//! offsets are kept per consumer group, and a new consumer resumes from its
//! group's committed offset, which is how tests simulate a restart followed
//! by redelivery.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::{BusError, Delivery, EventPublisher, EventSource, Result};

#[derive(Debug, Clone)]
struct Record {
    key: Option<String>,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct BrokerState {
    logs: HashMap<String, Vec<Record>>,
    committed: HashMap<(String, String), i64>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<BrokerState>,
    appended: Notify,
    fail_publish: AtomicBool,
    failing_fetches: AtomicUsize,
}

/// In-memory broker shared by publishers and consumers.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `group` to `topic`, starting at the group's committed offset.
    pub async fn consumer(&self, group: &str, topic: &str) -> InMemoryConsumer {
        let position = self
            .committed(group, topic)
            .await
            .unwrap_or_default();
        InMemoryConsumer {
            broker: self.clone(),
            group: group.to_string(),
            topic: topic.to_string(),
            position: Mutex::new(position),
        }
    }

    /// Everything ever published to `topic`, in offset order.
    pub async fn published(&self, topic: &str) -> Vec<Delivery> {
        let state = self.inner.state.lock().await;
        state
            .logs
            .get(topic)
            .map(|log| {
                log.iter()
                    .enumerate()
                    .map(|(offset, record)| to_delivery(topic, offset as i64, record))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn committed(&self, group: &str, topic: &str) -> Option<i64> {
        let state = self.inner.state.lock().await;
        state
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }

    /// Makes publishes fail until switched back.
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` fetches, across all consumers, fail.
    pub fn fail_next_fetches(&self, count: usize) {
        self.inner.failing_fetches.store(count, Ordering::SeqCst);
    }

    async fn append(&self, topic: &str, key: &str, payload: &[u8]) -> i64 {
        let mut state = self.inner.state.lock().await;
        let log = state.logs.entry(topic.to_string()).or_default();
        log.push(Record {
            key: Some(key.to_string()),
            payload: payload.to_vec(),
        });
        let offset = log.len() as i64 - 1;
        drop(state);
        self.inner.appended.notify_waiters();
        offset
    }

    fn take_fetch_failure(&self) -> bool {
        self.inner
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<()> {
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::Publish("broker unavailable".to_string()));
        }
        let offset = self.append(topic, key, payload).await;
        tracing::debug!(topic, key, offset, "Published message");
        Ok(())
    }
}

/// A group member reading one topic of an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    group: String,
    topic: String,
    position: Mutex<i64>,
}

impl InMemoryConsumer {
    async fn try_next(&self) -> Option<Delivery> {
        let state = self.broker.inner.state.lock().await;
        let mut position = self.position.lock().await;
        let record = state.logs.get(&self.topic)?.get(*position as usize)?;
        let delivery = to_delivery(&self.topic, *position, record);
        *position += 1;
        Some(delivery)
    }
}

#[async_trait]
impl EventSource for InMemoryConsumer {
    async fn fetch(&self) -> Result<Delivery> {
        if self.broker.take_fetch_failure() {
            return Err(BusError::Fetch("broker unavailable".to_string()));
        }
        loop {
            let appended = self.broker.inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(delivery) = self.try_next().await {
                return Ok(delivery);
            }
            appended.await;
        }
    }

    async fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()> {
        if partition != 0 {
            return Err(BusError::Commit(format!(
                "unknown partition {partition} for {topic}"
            )));
        }
        let mut state = self.broker.inner.state.lock().await;
        let committed = state
            .committed
            .entry((self.group.clone(), topic.to_string()))
            .or_default();
        *committed = (*committed).max(next_offset);
        Ok(())
    }
}

fn to_delivery(topic: &str, offset: i64, record: &Record) -> Delivery {
    Delivery {
        topic: topic.to_string(),
        partition: 0,
        offset,
        key: record.key.clone(),
        payload: record.payload.clone(),
    }
}
