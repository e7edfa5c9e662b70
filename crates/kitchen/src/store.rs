use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orders::Order;

use crate::{KitchenTicket, OrderId, Result};

/// Durable kitchen tickets.
///
/// Every write is idempotent so redelivered messages can replay it.
#[async_trait]
pub trait KitchenStore: Send + Sync {
    /// Records the order as accepted, or returns the existing ticket.
    ///
    /// Fails with `InvalidOrder` for orders without items, with a
    /// non-positive quantity or without a customer.
    async fn accept_order(&self, order: &Order, now: DateTime<Utc>) -> Result<KitchenTicket>;

    async fn get(&self, order_id: OrderId) -> Result<Option<KitchenTicket>>;

    /// Marks the ticket finished. Fails with `TicketNotFound` if it was never accepted.
    async fn finish_order(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<KitchenTicket>;

    /// Marks the ticket failed with a reason. A finished ticket stays finished.
    async fn fail_order(
        &self,
        order_id: OrderId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<KitchenTicket>;

    /// Tickets still being prepared, oldest first.
    async fn unfinished_tickets(&self) -> Result<Vec<KitchenTicket>>;
}
