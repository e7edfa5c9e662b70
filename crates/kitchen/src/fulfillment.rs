//! The order transitions the worker drives.

use std::sync::Arc;

use async_trait::async_trait;
use orders::{Order, OrderStore};
use saga::{FinishOutcome, OrderOrchestrator, SagaError, StockService};

use crate::OrderId;

/// Order-side steps of fulfillment. Each step is idempotent.
#[async_trait]
pub trait OrderFulfillment: Send + Sync {
    async fn start_processing(&self, id: OrderId) -> Result<Order, SagaError>;

    async fn finalize_order(&self, id: OrderId) -> Result<Order, SagaError>;

    async fn finish_order(&self, id: OrderId) -> Result<FinishOutcome, SagaError>;

    async fn cancel_order(&self, id: OrderId, reason: &str) -> Result<Order, SagaError>;
}

#[async_trait]
impl<O, K> OrderFulfillment for OrderOrchestrator<O, K>
where
    O: OrderStore,
    K: StockService,
{
    async fn start_processing(&self, id: OrderId) -> Result<Order, SagaError> {
        OrderOrchestrator::start_processing(self, id).await
    }

    async fn finalize_order(&self, id: OrderId) -> Result<Order, SagaError> {
        OrderOrchestrator::finalize_order(self, id).await
    }

    async fn finish_order(&self, id: OrderId) -> Result<FinishOutcome, SagaError> {
        OrderOrchestrator::finish_order(self, id).await
    }

    async fn cancel_order(&self, id: OrderId, reason: &str) -> Result<Order, SagaError> {
        OrderOrchestrator::cancel_order(self, id, reason).await
    }
}

#[async_trait]
impl<T: OrderFulfillment + ?Sized> OrderFulfillment for Arc<T> {
    async fn start_processing(&self, id: OrderId) -> Result<Order, SagaError> {
        (**self).start_processing(id).await
    }

    async fn finalize_order(&self, id: OrderId) -> Result<Order, SagaError> {
        (**self).finalize_order(id).await
    }

    async fn finish_order(&self, id: OrderId) -> Result<FinishOutcome, SagaError> {
        (**self).finish_order(id).await
    }

    async fn cancel_order(&self, id: OrderId, reason: &str) -> Result<Order, SagaError> {
        (**self).cancel_order(id, reason).await
    }
}
