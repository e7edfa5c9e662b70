//! Business rules over a [`ReservationStore`].

use std::sync::Arc;

use chrono::Duration;
use common::{Clock, SystemClock};

use crate::{
    Booking, ItemId, ItemMetadata, ItemQuantity, OrderId, Result, StockError, StockItem,
    StockLevel, VerifyReport, store::ReservationStore,
};

/// Tunables for the reservation engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// How long a booking holds stock before it lapses.
    pub hold: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold: Duration::minutes(15),
        }
    }
}

/// Verifies, books, releases and finalizes stock.
///
/// The engine is stateless apart from its store; share it behind an `Arc`
/// or clone it (stores are cheap handles).
#[derive(Clone)]
pub struct ReservationEngine<S: ReservationStore> {
    store: S,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl<S: ReservationStore> ReservationEngine<S> {
    /// Creates an engine on the system clock.
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Upserts an item: adds `quantity` to on-hand and overwrites metadata.
    #[tracing::instrument(skip(self, metadata))]
    pub async fn add_stock(
        &self,
        item_id: &ItemId,
        quantity: i64,
        metadata: ItemMetadata,
    ) -> Result<StockItem> {
        if item_id.is_blank() {
            return Err(StockError::Validation("item id must not be empty".into()));
        }
        if quantity < 0 {
            return Err(StockError::Validation(format!(
                "cannot add negative quantity {quantity} to {item_id}"
            )));
        }

        let item = self
            .store
            .upsert_item(item_id, quantity, &metadata, self.clock.now())
            .await?;
        tracing::info!(%item_id, on_hand = item.quantity, "stock added");
        Ok(item)
    }

    /// Non-binding availability check.
    ///
    /// A line whose item is unknown, or whose level cannot be read, is
    /// reported as missing rather than failing the whole check.
    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn verify_stock(&self, items: &[ItemQuantity]) -> Result<VerifyReport> {
        validate_lines(items, false)?;

        let now = self.clock.now();
        let mut report = VerifyReport::new();
        for line in items {
            match self.store.stock_level(&line.item_id, now).await {
                Ok(Some(level)) if level.available >= line.quantity => {}
                Ok(_) => report.flag(line.clone()),
                Err(e) => {
                    tracing::warn!(item_id = %line.item_id, error = %e, "stock level unreadable");
                    report.flag(line.clone());
                }
            }
        }
        Ok(report)
    }

    /// Books every line for `order_id`, or nothing at all.
    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn book(
        &self,
        items: &[ItemQuantity],
        order_id: Option<OrderId>,
    ) -> Result<Vec<Booking>> {
        validate_lines(items, false)?;

        let started = std::time::Instant::now();
        let now = self.clock.now();
        let result = self
            .store
            .book(items, order_id, now, now + self.config.hold)
            .await;
        metrics::histogram!("stock_book_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(bookings) => {
                metrics::counter!("stock_bookings_total").increment(bookings.len() as u64);
                tracing::info!(order_id = ?order_id, bookings = bookings.len(), "stock booked");
            }
            Err(e) => {
                metrics::counter!("stock_bookings_rejected_total").increment(1);
                tracing::info!(order_id = ?order_id, error = %e, "booking rejected");
            }
        }
        result
    }

    /// Releases held units oldest booking first; see [`ReservationStore::release`].
    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn release(
        &self,
        items: &[ItemQuantity],
        order_id: Option<OrderId>,
    ) -> Result<Vec<ItemQuantity>> {
        validate_lines(items, true)?;

        let released = self
            .store
            .release(items, order_id, self.clock.now())
            .await?;
        let total: i64 = released.iter().map(|r| r.quantity).sum();
        metrics::counter!("stock_released_units_total").increment(total.max(0) as u64);
        tracing::info!(order_id = ?order_id, released = total, "stock released");
        Ok(released)
    }

    /// Deducts the order's active bookings from on-hand stock.
    ///
    /// A second call for the same order fails with `NoActiveBookings`.
    #[tracing::instrument(skip(self))]
    pub async fn finalize(&self, order_id: OrderId) -> Result<Vec<ItemQuantity>> {
        match self.store.finalize(order_id, self.clock.now()).await {
            Ok(deducted) => {
                metrics::counter!("stock_finalized_orders_total").increment(1);
                tracing::info!(%order_id, items = deducted.len(), "booking finalized");
                Ok(deducted)
            }
            Err(e @ StockError::InsufficientStock { .. }) => {
                metrics::counter!("stock_finalize_anomalies_total").increment(1);
                tracing::error!(%order_id, error = %e, "on-hand stock below booked quantity");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a finalize for the order has already committed.
    ///
    /// Tells "already deducted" apart from the other `NoActiveBookings` causes.
    #[tracing::instrument(skip(self))]
    pub async fn is_finalized(&self, order_id: OrderId) -> Result<bool> {
        self.store.is_finalized(order_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_stock_item(&self, item_id: &ItemId) -> Result<StockLevel> {
        self.store
            .stock_level(item_id, self.clock.now())
            .await?
            .ok_or_else(|| StockError::ItemNotFound(item_id.clone()))
    }

    /// Removes an item. Refused while active bookings hold it.
    #[tracing::instrument(skip(self))]
    pub async fn remove_stock_item(&self, item_id: &ItemId) -> Result<StockItem> {
        let removed = self.store.remove_item(item_id, self.clock.now()).await?;
        tracing::info!(%item_id, "stock item removed");
        Ok(removed)
    }

    pub async fn bookings_for_order(&self, order_id: OrderId) -> Result<Vec<Booking>> {
        self.store
            .active_bookings_for_order(order_id, self.clock.now())
            .await
    }

    pub async fn bookings_for_item(&self, item_id: &ItemId) -> Result<Vec<Booking>> {
        self.store
            .active_bookings_for_item(item_id, self.clock.now())
            .await
    }

    /// Deletes lapsed bookings. Availability never depends on this running.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<u64> {
        let purged = self.store.purge_expired(self.clock.now()).await?;
        if purged > 0 {
            metrics::counter!("stock_expired_bookings_purged_total").increment(purged);
            tracing::debug!(purged, "expired bookings purged");
        }
        Ok(purged)
    }
}

fn validate_lines(items: &[ItemQuantity], allow_release_all: bool) -> Result<()> {
    if items.is_empty() {
        return Err(StockError::Validation("no items requested".into()));
    }
    for line in items {
        if line.item_id.is_blank() {
            return Err(StockError::Validation("item id must not be empty".into()));
        }
        if !allow_release_all && line.quantity <= 0 {
            return Err(StockError::Validation(format!(
                "quantity for {} must be greater than 0, got {}",
                line.item_id, line.quantity
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryReservationStore;
    use common::ManualClock;

    fn setup() -> (ReservationEngine<InMemoryReservationStore>, ManualClock) {
        let clock = ManualClock::default();
        let engine = ReservationEngine::with_clock(
            InMemoryReservationStore::new(),
            EngineConfig::default(),
            Arc::new(clock.clone()),
        );
        (engine, clock)
    }

    fn sku(id: &str) -> ItemId {
        ItemId::new(id)
    }

    #[tokio::test]
    async fn add_stock_rejects_blank_id_and_negative_quantity() {
        let (engine, _) = setup();

        let blank = engine.add_stock(&sku(" "), 1, ItemMetadata::default()).await;
        assert!(matches!(blank, Err(StockError::Validation(_))));

        let negative = engine.add_stock(&sku("SKU-1"), -1, ItemMetadata::default()).await;
        assert!(matches!(negative, Err(StockError::Validation(_))));
    }

    #[tokio::test]
    async fn verify_flags_unknown_and_short_items() {
        let (engine, _) = setup();
        engine
            .add_stock(&sku("SKU-1"), 3, ItemMetadata::default())
            .await
            .unwrap();
        engine
            .add_stock(&sku("SKU-2"), 10, ItemMetadata::default())
            .await
            .unwrap();

        let report = engine
            .verify_stock(&[
                ItemQuantity::new("SKU-1", 5),
                ItemQuantity::new("SKU-2", 10),
                ItemQuantity::new("SKU-404", 1),
            ])
            .await
            .unwrap();

        assert!(!report.all_available);
        assert_eq!(
            report.missing_or_insufficient,
            vec![
                ItemQuantity::new("SKU-1", 5),
                ItemQuantity::new("SKU-404", 1)
            ]
        );
    }

    #[tokio::test]
    async fn verify_does_not_reserve() {
        let (engine, _) = setup();
        engine
            .add_stock(&sku("SKU-1"), 3, ItemMetadata::default())
            .await
            .unwrap();

        engine
            .verify_stock(&[ItemQuantity::new("SKU-1", 3)])
            .await
            .unwrap();

        let level = engine.get_stock_item(&sku("SKU-1")).await.unwrap();
        assert_eq!(level.available, 3);
        assert_eq!(level.booked, 0);
    }

    #[tokio::test]
    async fn book_rejects_non_positive_quantity() {
        let (engine, _) = setup();
        let result = engine.book(&[ItemQuantity::new("SKU-1", 0)], None).await;
        assert!(matches!(result, Err(StockError::Validation(_))));
    }

    #[tokio::test]
    async fn book_sets_expiry_from_hold() {
        let (engine, clock) = setup();
        engine
            .add_stock(&sku("SKU-1"), 3, ItemMetadata::default())
            .await
            .unwrap();

        let bookings = engine
            .book(&[ItemQuantity::new("SKU-1", 2)], Some(OrderId::new()))
            .await
            .unwrap();

        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].expires_at, clock.now() + Duration::minutes(15));
    }

    #[tokio::test]
    async fn finalize_unknown_order_is_not_found() {
        let (engine, _) = setup();
        let result = engine.finalize(OrderId::new()).await;
        assert!(matches!(result, Err(StockError::NoActiveBookings(_))));
    }

    #[tokio::test]
    async fn finalize_expired_booking_is_not_found() {
        let (engine, clock) = setup();
        engine
            .add_stock(&sku("SKU-1"), 3, ItemMetadata::default())
            .await
            .unwrap();
        let order_id = OrderId::new();
        engine
            .book(&[ItemQuantity::new("SKU-1", 2)], Some(order_id))
            .await
            .unwrap();

        clock.advance(Duration::minutes(15));

        let result = engine.finalize(order_id).await;
        assert!(matches!(result, Err(StockError::NoActiveBookings(_))));
        assert!(!engine.is_finalized(order_id).await.unwrap());
        assert_eq!(engine.get_stock_item(&sku("SKU-1")).await.unwrap().item.quantity, 3);
    }

    #[tokio::test]
    async fn release_allows_release_all_marker() {
        let (engine, _) = setup();
        engine
            .add_stock(&sku("SKU-1"), 5, ItemMetadata::default())
            .await
            .unwrap();
        engine
            .book(&[ItemQuantity::new("SKU-1", 2)], None)
            .await
            .unwrap();
        engine
            .book(&[ItemQuantity::new("SKU-1", 1)], None)
            .await
            .unwrap();

        let released = engine
            .release(&[ItemQuantity::new("SKU-1", -1)], None)
            .await
            .unwrap();

        assert_eq!(released, vec![ItemQuantity::new("SKU-1", 3)]);
        assert!(engine.bookings_for_item(&sku("SKU-1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_purges_after_expiry() {
        let (engine, clock) = setup();
        engine
            .add_stock(&sku("SKU-1"), 5, ItemMetadata::default())
            .await
            .unwrap();
        engine
            .book(&[ItemQuantity::new("SKU-1", 2)], None)
            .await
            .unwrap();

        assert_eq!(engine.sweep_expired().await.unwrap(), 0);
        clock.advance(Duration::minutes(20));
        assert_eq!(engine.sweep_expired().await.unwrap(), 1);
        assert_eq!(engine.store().booking_count().await, 0);
    }
}
