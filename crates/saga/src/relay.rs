//! Publishes outbox messages written by the order store.

use std::sync::Arc;
use std::time::Duration;

use common::{Clock, SystemClock};
use messaging::EventPublisher;
use orders::OrderStore;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    pub interval: Duration,
    /// Maximum messages published per pass.
    pub batch: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            batch: 100,
        }
    }
}

/// Moves pending outbox messages to the bus, oldest first.
///
/// A message is marked published only after the bus accepted it, so every
/// message is delivered at least once. A failed publish stops the pass to
/// keep later messages from overtaking it.
pub struct OutboxRelay<O: OrderStore, P: EventPublisher> {
    orders: O,
    publisher: P,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
}

impl<O: OrderStore, P: EventPublisher> OutboxRelay<O, P> {
    pub fn new(orders: O, publisher: P, config: RelayConfig) -> Self {
        Self {
            orders,
            publisher,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Publishes one batch and returns how many messages went out.
    #[tracing::instrument(skip(self))]
    pub async fn relay_pending(&self) -> Result<usize> {
        let pending = self.orders.pending_outbox(self.config.batch).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut published = Vec::with_capacity(pending.len());
        let mut failure = None;
        for message in &pending {
            let payload = message.payload_bytes()?;
            match self
                .publisher
                .publish(&message.topic, &message.key, &payload)
                .await
            {
                Ok(()) => published.push(message.id),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if !published.is_empty() {
            self.orders
                .mark_published(&published, self.clock.now())
                .await?;
            metrics::counter!("outbox_messages_published_total").increment(published.len() as u64);
            tracing::debug!(count = published.len(), "outbox messages published");
        }

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(published.len()),
        }
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.config.interval, "outbox relay started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.relay_pending().await {
                        metrics::counter!("outbox_publish_failures_total").increment(1);
                        tracing::warn!(error = %e, "outbox relay pass failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("outbox relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::topics;
    use messaging::InMemoryBroker;
    use orders::{CustomerId, InMemoryOrderStore, ItemQuantity, Order, OutboxMessage};

    async fn store_with_orders(count: usize) -> InMemoryOrderStore {
        let store = InMemoryOrderStore::new();
        for _ in 0..count {
            let order = Order::new(
                CustomerId::new("customer-1"),
                &[ItemQuantity::new("SKU-1", 1)],
                chrono::Utc::now(),
            )
            .unwrap();
            let message = OutboxMessage::order_created(&order).unwrap();
            store.insert(&order, &message).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_relay_publishes_and_marks() {
        let store = store_with_orders(3).await;
        let broker = InMemoryBroker::new();
        let relay = OutboxRelay::new(store.clone(), broker.clone(), RelayConfig::default());

        assert_eq!(relay.relay_pending().await.unwrap(), 3);
        assert_eq!(relay.relay_pending().await.unwrap(), 0);

        assert_eq!(broker.published(topics::ORDERS_CREATED).await.len(), 3);
        assert_eq!(store.unpublished_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_messages_pending() {
        let store = store_with_orders(2).await;
        let broker = InMemoryBroker::new();
        broker.set_fail_publish(true);
        let relay = OutboxRelay::new(store.clone(), broker.clone(), RelayConfig::default());

        assert!(relay.relay_pending().await.is_err());
        assert_eq!(store.unpublished_count().await, 2);

        broker.set_fail_publish(false);
        assert_eq!(relay.relay_pending().await.unwrap(), 2);
        assert_eq!(store.unpublished_count().await, 0);
    }

    #[tokio::test]
    async fn test_batch_limit() {
        let store = store_with_orders(5).await;
        let relay = OutboxRelay::new(
            store.clone(),
            InMemoryBroker::new(),
            RelayConfig {
                interval: Duration::from_millis(10),
                batch: 2,
            },
        );

        assert_eq!(relay.relay_pending().await.unwrap(), 2);
        assert_eq!(store.unpublished_count().await, 3);
    }
}
