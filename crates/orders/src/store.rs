use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{CustomerId, Order, OrderId, OrderStatus, OutboxMessage, Result};

/// Durable storage for orders and their outbox.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order together with its outbox message, atomically.
    ///
    /// Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, order: &Order, message: &OutboxMessage) -> Result<()>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// All orders of a customer, newest first.
    async fn list_by_customer(&self, customer_id: &CustomerId) -> Result<Vec<Order>>;

    /// Compare-and-set on the status.
    ///
    /// Returns the updated order, `None` if the stored status is no longer
    /// `expected`, or `NotFound` if the order does not exist.
    async fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>>;

    /// Unpublished outbox messages, oldest first.
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>>;

    async fn mark_published(&self, ids: &[Uuid], now: DateTime<Utc>) -> Result<()>;
}
