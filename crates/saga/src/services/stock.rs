//! The reservation calls the orchestrator depends on.

use std::sync::Arc;

use async_trait::async_trait;
use stock::{
    Booking, ItemQuantity, OrderId, ReservationEngine, ReservationStore, StockError,
    VerifyReport,
};

/// Trait for the stock operations used by the saga.
///
/// Bookings made through this trait are always tagged with an order, and
/// releases are always scoped to one, so compensation never touches stock
/// held by other orders.
#[async_trait]
pub trait StockService: Send + Sync {
    async fn verify(&self, items: &[ItemQuantity]) -> Result<VerifyReport, StockError>;

    async fn book(
        &self,
        items: &[ItemQuantity],
        order_id: OrderId,
    ) -> Result<Vec<Booking>, StockError>;

    /// Releases up to each line's quantity; zero releases everything the order holds.
    async fn release(
        &self,
        items: &[ItemQuantity],
        order_id: OrderId,
    ) -> Result<Vec<ItemQuantity>, StockError>;

    async fn finalize(&self, order_id: OrderId) -> Result<Vec<ItemQuantity>, StockError>;

    /// True once the order's stock has been deducted.
    async fn is_finalized(&self, order_id: OrderId) -> Result<bool, StockError>;
}

#[async_trait]
impl<S: ReservationStore> StockService for ReservationEngine<S> {
    async fn verify(&self, items: &[ItemQuantity]) -> Result<VerifyReport, StockError> {
        self.verify_stock(items).await
    }

    async fn book(
        &self,
        items: &[ItemQuantity],
        order_id: OrderId,
    ) -> Result<Vec<Booking>, StockError> {
        ReservationEngine::book(self, items, Some(order_id)).await
    }

    async fn release(
        &self,
        items: &[ItemQuantity],
        order_id: OrderId,
    ) -> Result<Vec<ItemQuantity>, StockError> {
        ReservationEngine::release(self, items, Some(order_id)).await
    }

    async fn finalize(&self, order_id: OrderId) -> Result<Vec<ItemQuantity>, StockError> {
        ReservationEngine::finalize(self, order_id).await
    }

    async fn is_finalized(&self, order_id: OrderId) -> Result<bool, StockError> {
        ReservationEngine::is_finalized(self, order_id).await
    }
}

#[async_trait]
impl<T: StockService + ?Sized> StockService for Arc<T> {
    async fn verify(&self, items: &[ItemQuantity]) -> Result<VerifyReport, StockError> {
        (**self).verify(items).await
    }

    async fn book(
        &self,
        items: &[ItemQuantity],
        order_id: OrderId,
    ) -> Result<Vec<Booking>, StockError> {
        (**self).book(items, order_id).await
    }

    async fn release(
        &self,
        items: &[ItemQuantity],
        order_id: OrderId,
    ) -> Result<Vec<ItemQuantity>, StockError> {
        (**self).release(items, order_id).await
    }

    async fn finalize(&self, order_id: OrderId) -> Result<Vec<ItemQuantity>, StockError> {
        (**self).finalize(order_id).await
    }

    async fn is_finalized(&self, order_id: OrderId) -> Result<bool, StockError> {
        (**self).is_finalized(order_id).await
    }
}
