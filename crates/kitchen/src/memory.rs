use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orders::Order;
use tokio::sync::RwLock;

use crate::{
    KitchenError, KitchenTicket, OrderId, Result, TicketStatus, store::KitchenStore,
    ticket::check_order,
};

/// In-memory kitchen store for tests and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryKitchenStore {
    tickets: Arc<RwLock<HashMap<OrderId, KitchenTicket>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryKitchenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn ticket_count(&self) -> usize {
        self.tickets.read().await.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KitchenError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KitchenStore for InMemoryKitchenStore {
    async fn accept_order(&self, order: &Order, now: DateTime<Utc>) -> Result<KitchenTicket> {
        self.check_available()?;
        check_order(order)?;

        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .entry(order.id)
            .or_insert_with(|| KitchenTicket::accepted(order.clone(), now));
        Ok(ticket.clone())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<KitchenTicket>> {
        self.check_available()?;
        Ok(self.tickets.read().await.get(&order_id).cloned())
    }

    async fn finish_order(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<KitchenTicket> {
        self.check_available()?;
        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .get_mut(&order_id)
            .ok_or(KitchenError::TicketNotFound(order_id))?;
        if ticket.status != TicketStatus::Finished {
            ticket.status = TicketStatus::Finished;
            ticket.finished_at = Some(now);
            ticket.failure = None;
        }
        Ok(ticket.clone())
    }

    async fn fail_order(
        &self,
        order_id: OrderId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<KitchenTicket> {
        self.check_available()?;
        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .get_mut(&order_id)
            .ok_or(KitchenError::TicketNotFound(order_id))?;
        if ticket.status == TicketStatus::Accepted {
            ticket.status = TicketStatus::Failed;
            ticket.finished_at = Some(now);
            ticket.failure = Some(reason.to_string());
        }
        Ok(ticket.clone())
    }

    async fn unfinished_tickets(&self) -> Result<Vec<KitchenTicket>> {
        self.check_available()?;
        let tickets = self.tickets.read().await;
        let mut open: Vec<KitchenTicket> = tickets
            .values()
            .filter(|t| t.status == TicketStatus::Accepted)
            .cloned()
            .collect();
        open.sort_by_key(|t| t.accepted_at);
        Ok(open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orders::{CustomerId, ItemQuantity};

    fn order() -> Order {
        Order::new(
            CustomerId::new("customer-1"),
            &[ItemQuantity::new("SKU-1", 2)],
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_accept_is_idempotent() {
        let store = InMemoryKitchenStore::new();
        let order = order();
        let first = store.accept_order(&order, Utc::now()).await.unwrap();

        let second = store.accept_order(&order, Utc::now()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.ticket_count().await, 1);
    }

    #[tokio::test]
    async fn test_accept_rejects_order_without_items() {
        let store = InMemoryKitchenStore::new();
        let mut order = order();
        order.items.clear();

        let result = store.accept_order(&order, Utc::now()).await;

        assert!(matches!(result, Err(KitchenError::InvalidOrder(_))));
        assert_eq!(store.ticket_count().await, 0);
    }

    #[tokio::test]
    async fn test_finish_unknown_is_not_found() {
        let store = InMemoryKitchenStore::new();
        let result = store.finish_order(OrderId::new(), Utc::now()).await;
        assert!(matches!(result, Err(KitchenError::TicketNotFound(_))));
    }

    #[tokio::test]
    async fn test_finish_then_fail_keeps_finished() {
        let store = InMemoryKitchenStore::new();
        let order = order();
        store.accept_order(&order, Utc::now()).await.unwrap();
        assert_eq!(store.unfinished_tickets().await.unwrap().len(), 1);

        store.finish_order(order.id, Utc::now()).await.unwrap();
        let ticket = store.fail_order(order.id, "late", Utc::now()).await.unwrap();

        assert_eq!(ticket.status, TicketStatus::Finished);
        assert!(ticket.failure.is_none());
        assert!(store.unfinished_tickets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_is_transient() {
        let store = InMemoryKitchenStore::new();
        store.set_unavailable(true);
        let err = store.accept_order(&order(), Utc::now()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
