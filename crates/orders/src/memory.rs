use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    CustomerId, Order, OrderError, OrderId, OrderStatus, OutboxMessage, Result, store::OrderStore,
};

#[derive(Debug, Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    outbox: Vec<(OutboxMessage, Option<DateTime<Utc>>)>,
}

/// In-memory order store for tests and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
    fail_on_insert: Arc<AtomicBool>,
    failing_status_updates: Arc<AtomicUsize>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `insert` fail as if the database were down.
    pub fn set_fail_on_insert(&self, fail: bool) {
        self.fail_on_insert.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` calls to `update_status` fail as if the database were down.
    pub fn fail_next_status_updates(&self, count: usize) {
        self.failing_status_updates.store(count, Ordering::SeqCst);
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Number of outbox messages not yet marked published.
    pub async fn unpublished_count(&self) -> usize {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .filter(|(_, published)| published.is_none())
            .count()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order, message: &OutboxMessage) -> Result<()> {
        if self.fail_on_insert.load(Ordering::SeqCst) {
            return Err(OrderError::Unavailable("insert rejected".to_string()));
        }

        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.id) {
            return Err(OrderError::AlreadyExists(order.id));
        }
        state.orders.insert(order.id, order.clone());
        state.outbox.push((message.clone(), None));
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn list_by_customer(&self, customer_id: &CustomerId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| &o.customer_id == customer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>> {
        let failing = self
            .failing_status_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(OrderError::Unavailable("status update rejected".to_string()));
        }

        let mut state = self.state.write().await;
        let order = state.orders.get_mut(&id).ok_or(OrderError::NotFound(id))?;
        if order.status != expected {
            return Ok(None);
        }
        order.status = next;
        order.updated_at = now;
        Ok(Some(order.clone()))
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|(_, published)| published.is_none())
            .take(limit)
            .map(|(message, _)| message.clone())
            .collect())
    }

    async fn mark_published(&self, ids: &[Uuid], now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        for (message, published) in state.outbox.iter_mut() {
            if ids.contains(&message.id) {
                published.get_or_insert(now);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ItemQuantity;
    use chrono::Duration;

    fn order_for(customer: &str, at: DateTime<Utc>) -> (Order, OutboxMessage) {
        let order = Order::new(
            CustomerId::new(customer),
            &[ItemQuantity::new("SKU-1", 1)],
            at,
        )
        .unwrap();
        let message = OutboxMessage::order_created(&order).unwrap();
        (order, message)
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = InMemoryOrderStore::new();
        let (order, message) = order_for("customer-1", Utc::now());

        store.insert(&order, &message).await.unwrap();

        assert_eq!(store.get(order.id).await.unwrap(), Some(order));
        assert_eq!(store.unpublished_count().await, 1);
    }

    #[tokio::test]
    async fn insert_twice_is_rejected() {
        let store = InMemoryOrderStore::new();
        let (order, message) = order_for("customer-1", Utc::now());
        store.insert(&order, &message).await.unwrap();

        let result = store.insert(&order, &message).await;
        assert!(matches!(result, Err(OrderError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn failing_insert_writes_nothing() {
        let store = InMemoryOrderStore::new();
        store.set_fail_on_insert(true);
        let (order, message) = order_for("customer-1", Utc::now());

        let result = store.insert(&order, &message).await;

        assert!(matches!(result, Err(OrderError::Unavailable(_))));
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.unpublished_count().await, 0);
    }

    #[tokio::test]
    async fn list_by_customer_is_newest_first() {
        let store = InMemoryOrderStore::new();
        let now = Utc::now();
        let (older, m1) = order_for("customer-1", now);
        let (newer, m2) = order_for("customer-1", now + Duration::seconds(5));
        let (other, m3) = order_for("customer-2", now);
        store.insert(&older, &m1).await.unwrap();
        store.insert(&newer, &m2).await.unwrap();
        store.insert(&other, &m3).await.unwrap();

        let listed = store
            .list_by_customer(&CustomerId::new("customer-1"))
            .await
            .unwrap();

        let ids: Vec<OrderId> = listed.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn update_status_is_compare_and_set() {
        let store = InMemoryOrderStore::new();
        let (order, message) = order_for("customer-1", Utc::now());
        store.insert(&order, &message).await.unwrap();

        let stale = store
            .update_status(order.id, OrderStatus::Booked, OrderStatus::Processing, Utc::now())
            .await
            .unwrap();
        assert!(stale.is_none());

        let updated = store
            .update_status(order.id, OrderStatus::Pending, OrderStatus::Booked, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Booked);

        let missing = store
            .update_status(OrderId::new(), OrderStatus::Pending, OrderStatus::Booked, Utc::now())
            .await;
        assert!(matches!(missing, Err(OrderError::NotFound(_))));
    }

    #[tokio::test]
    async fn failing_status_update_leaves_status_unchanged() {
        let store = InMemoryOrderStore::new();
        let (order, message) = order_for("customer-1", Utc::now());
        store.insert(&order, &message).await.unwrap();
        store.fail_next_status_updates(1);

        let first = store
            .update_status(order.id, OrderStatus::Pending, OrderStatus::Booked, Utc::now())
            .await;
        assert!(matches!(first, Err(OrderError::Unavailable(_))));
        assert_eq!(
            store.get(order.id).await.unwrap().unwrap().status,
            OrderStatus::Pending
        );

        let second = store
            .update_status(order.id, OrderStatus::Pending, OrderStatus::Booked, Utc::now())
            .await
            .unwrap();
        assert_eq!(second.unwrap().status, OrderStatus::Booked);
    }

    #[tokio::test]
    async fn mark_published_drains_outbox() {
        let store = InMemoryOrderStore::new();
        let (order, message) = order_for("customer-1", Utc::now());
        store.insert(&order, &message).await.unwrap();

        let pending = store.pending_outbox(10).await.unwrap();
        assert_eq!(pending.len(), 1);

        store.mark_published(&[pending[0].id], Utc::now()).await.unwrap();
        assert!(store.pending_outbox(10).await.unwrap().is_empty());
    }
}
