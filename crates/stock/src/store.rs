use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Booking, ItemId, ItemMetadata, ItemQuantity, OrderId, Result, StockItem, StockLevel,
};

/// Durable storage for stock items and their bookings.
///
/// Every method that changes quantities runs as one atomic unit: either the
/// whole call takes effect or none of it does. Callers pass `now` explicitly
/// and a booking is considered active while `expires_at > now`.
///
/// Input validation (positive quantities, non-blank ids) is the engine's
/// job; stores assume well-formed requests.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Creates the item, or adds `quantity` to an existing one and overwrites its metadata.
    async fn upsert_item(
        &self,
        item_id: &ItemId,
        quantity: i64,
        metadata: &ItemMetadata,
        now: DateTime<Utc>,
    ) -> Result<StockItem>;

    /// Returns the item with its currently booked quantity, if it exists.
    async fn stock_level(&self, item_id: &ItemId, now: DateTime<Utc>)
    -> Result<Option<StockLevel>>;

    /// Deletes the item and any expired bookings that still reference it.
    ///
    /// Fails with `ItemNotFound` for unknown items and `ActiveBookings` while
    /// active bookings exist.
    async fn remove_item(&self, item_id: &ItemId, now: DateTime<Utc>) -> Result<StockItem>;

    /// Books every requested line or nothing.
    ///
    /// Repeated item ids within `items` are checked cumulatively.
    async fn book(
        &self,
        items: &[ItemQuantity],
        order_id: Option<OrderId>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<Booking>>;

    /// Releases held units oldest booking first.
    ///
    /// A non-positive quantity releases every booking of the item. With an
    /// order id only that order's bookings are touched. Returns the released
    /// active quantity per requested line.
    async fn release(
        &self,
        items: &[ItemQuantity],
        order_id: Option<OrderId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemQuantity>>;

    /// Turns the order's active bookings into a permanent deduction.
    ///
    /// Returns the deducted quantity per item, sorted by item id.
    async fn finalize(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Vec<ItemQuantity>>;

    /// True once a `finalize` for the order has committed.
    ///
    /// The marker is written in the same unit as the deduction, so it
    /// survives the bookings it consumed.
    async fn is_finalized(&self, order_id: OrderId) -> Result<bool>;

    /// Active bookings of an order, oldest first.
    async fn active_bookings_for_order(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>>;

    /// Active bookings of an item, oldest first.
    async fn active_bookings_for_item(
        &self,
        item_id: &ItemId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>>;

    /// Physically deletes expired bookings. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}
