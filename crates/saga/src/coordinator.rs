//! Order orchestration with compensating releases.

use std::sync::Arc;

use common::{Clock, CustomerId, ItemQuantity, OrderId, SystemClock};
use orders::{Order, OrderError, OrderStatus, OrderStore, OutboxMessage};
use stock::StockError;

use crate::error::{Result, SagaError};
use crate::services::StockService;

/// Result of [`OrderOrchestrator::finish_order`].
#[derive(Debug, Clone, PartialEq)]
pub struct FinishOutcome {
    pub order: Order,
    /// The order was already `Finished` before this call.
    pub already_finished: bool,
}

/// Drives orders through their lifecycle.
///
/// Creating an order verifies and books stock, then persists the order with
/// its "orders.created" outbox message. If persisting fails the booking is
/// released again, so a failed create never leaves stock held. Status
/// changes are compare-and-set against the stored status.
pub struct OrderOrchestrator<O, K>
where
    O: OrderStore,
    K: StockService,
{
    orders: O,
    stock: K,
    clock: Arc<dyn Clock>,
}

impl<O, K> OrderOrchestrator<O, K>
where
    O: OrderStore,
    K: StockService,
{
    /// Creates an orchestrator on the system clock.
    pub fn new(orders: O, stock: K) -> Self {
        Self::with_clock(orders, stock, Arc::new(SystemClock))
    }

    pub fn with_clock(orders: O, stock: K, clock: Arc<dyn Clock>) -> Self {
        Self {
            orders,
            stock,
            clock,
        }
    }

    pub fn orders(&self) -> &O {
        &self.orders
    }

    pub fn stock(&self) -> &K {
        &self.stock
    }

    /// Validates, books and persists a new order.
    ///
    /// Returns the order in `Booked` status.
    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn create_order(
        &self,
        customer_id: CustomerId,
        items: &[ItemQuantity],
    ) -> Result<Order> {
        let started = std::time::Instant::now();
        let mut order = Order::new(customer_id, items, self.clock.now())?;

        let report = self.stock.verify(&order.items).await?;
        if !report.all_available {
            metrics::counter!("orders_rejected_total").increment(1);
            tracing::info!(
                missing = report.missing_or_insufficient.len(),
                "order rejected, stock unavailable"
            );
            return Err(SagaError::InsufficientStock {
                items: report.missing_or_insufficient,
            });
        }

        self.stock.book(&order.items, order.id).await?;
        order.status = OrderStatus::Booked;

        if let Err(e) = self.persist_new(&order).await {
            self.compensate_booking(&order).await;
            metrics::counter!("orders_compensated_total").increment(1);
            return Err(e);
        }

        metrics::counter!("orders_created_total").increment(1);
        metrics::histogram!("order_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(order_id = %order.id, units = order.total_units(), "order booked");
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, id: OrderId) -> Result<Order> {
        Ok(self
            .orders
            .get(id)
            .await?
            .ok_or(OrderError::NotFound(id))?)
    }

    /// Orders of one customer, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn get_user_orders(&self, customer_id: &CustomerId) -> Result<Vec<Order>> {
        if customer_id.is_blank() {
            return Err(OrderError::CustomerIdRequired.into());
        }
        Ok(self.orders.list_by_customer(customer_id).await?)
    }

    /// Operational status override. Stock is not touched.
    #[tracing::instrument(skip(self))]
    pub async fn patch_order_status(&self, id: OrderId, next: OrderStatus) -> Result<Order> {
        let order = self.get_order(id).await?;
        if order.status == next {
            return Ok(order);
        }
        if !order.status.can_transition_to(next) {
            return Err(invalid_transition(&order, next));
        }
        self.transition(&order, next).await
    }

    /// `Booked` to `Processing`. Already processing or past it is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn start_processing(&self, id: OrderId) -> Result<Order> {
        let order = self.get_order(id).await?;
        match order.status {
            OrderStatus::Processing | OrderStatus::Finalized | OrderStatus::Finished => Ok(order),
            status if status.can_start_processing() => {
                self.transition(&order, OrderStatus::Processing).await
            }
            _ => Err(invalid_transition(&order, OrderStatus::Processing)),
        }
    }

    /// Deducts the order's booked stock and marks it `Finalized`.
    ///
    /// If the deduction already committed on an earlier attempt but the
    /// status write did not, only the status write is repeated.
    #[tracing::instrument(skip(self))]
    pub async fn finalize_order(&self, id: OrderId) -> Result<Order> {
        let order = self.get_order(id).await?;
        if order.status.is_finalized() {
            return Ok(order);
        }
        if !order.status.can_transition_to(OrderStatus::Finalized) {
            return Err(invalid_transition(&order, OrderStatus::Finalized));
        }

        let order = match self.stock.finalize(id).await {
            Ok(deducted) => {
                tracing::info!(order_id = %id, items = deducted.len(), "stock deducted");
                order
            }
            Err(e @ StockError::NoActiveBookings(_)) => {
                // A concurrent delivery may have finalized it in the meantime.
                let current = self.get_order(id).await?;
                if current.status.is_finalized() {
                    return Ok(current);
                }
                if !self.stock.is_finalized(id).await? {
                    return Err(e.into());
                }
                if !current.status.can_transition_to(OrderStatus::Finalized) {
                    return Err(invalid_transition(&current, OrderStatus::Finalized));
                }
                tracing::warn!(order_id = %id, status = %current.status, "stock already deducted, completing status");
                current
            }
            Err(e) => return Err(e.into()),
        };

        let finalized = self.transition(&order, OrderStatus::Finalized).await?;
        metrics::counter!("orders_finalized_total").increment(1);
        Ok(finalized)
    }

    /// Marks a `Finalized` order `Finished`; a second call reports `already_finished`.
    #[tracing::instrument(skip(self))]
    pub async fn finish_order(&self, id: OrderId) -> Result<FinishOutcome> {
        let order = self.get_order(id).await?;
        match order.status {
            OrderStatus::Finished => Ok(FinishOutcome {
                order,
                already_finished: true,
            }),
            OrderStatus::Finalized => {
                let order = self.transition(&order, OrderStatus::Finished).await?;
                metrics::counter!("orders_finished_total").increment(1);
                tracing::info!(order_id = %id, "order finished");
                Ok(FinishOutcome {
                    order,
                    already_finished: false,
                })
            }
            _ => Err(invalid_transition(&order, OrderStatus::Finished)),
        }
    }

    /// Releases whatever the order still holds and marks it `Cancelled`.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, id: OrderId, reason: &str) -> Result<Order> {
        let order = self.get_order(id).await?;
        if order.status == OrderStatus::Cancelled {
            return Ok(order);
        }
        if !order.status.can_cancel() {
            return Err(invalid_transition(&order, OrderStatus::Cancelled));
        }

        let release_all: Vec<ItemQuantity> = order
            .items
            .iter()
            .map(|line| ItemQuantity::new(line.item_id.clone(), 0))
            .collect();
        self.stock.release(&release_all, id).await?;

        let cancelled = self.transition(&order, OrderStatus::Cancelled).await?;
        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::warn!(order_id = %id, reason, "order cancelled");
        Ok(cancelled)
    }

    async fn persist_new(&self, order: &Order) -> Result<()> {
        let message = OutboxMessage::order_created(order)?;
        self.orders.insert(order, &message).await?;
        Ok(())
    }

    /// Gives back the stock booked for an order that was never persisted.
    async fn compensate_booking(&self, order: &Order) {
        match self.stock.release(&order.items, order.id).await {
            Ok(released) => {
                tracing::warn!(order_id = %order.id, lines = released.len(), "booking compensated");
            }
            Err(e) => {
                // The hold lapses at its expiry; nothing else will free it sooner.
                tracing::error!(order_id = %order.id, error = %e, "compensating release failed");
            }
        }
    }

    async fn transition(&self, order: &Order, next: OrderStatus) -> Result<Order> {
        let updated = self
            .orders
            .update_status(order.id, order.status, next, self.clock.now())
            .await?
            .ok_or(OrderError::Conflict {
                order_id: order.id,
                expected: order.status,
            })?;
        tracing::debug!(order_id = %order.id, from = %order.status, to = %next, "order status changed");
        Ok(updated)
    }
}

fn invalid_transition(order: &Order, requested: OrderStatus) -> SagaError {
    OrderError::InvalidStatusTransition {
        current: order.status,
        requested,
    }
    .into()
}
