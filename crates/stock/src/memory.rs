use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    Booking, BookingId, ItemId, ItemMetadata, ItemQuantity, OrderId, Result, StockError,
    StockItem, StockLevel, store::ReservationStore,
};

#[derive(Debug, Default)]
struct Inventory {
    items: HashMap<ItemId, StockItem>,
    /// Insertion order doubles as the FIFO tie-breaker for equal timestamps.
    bookings: Vec<Booking>,
    finalized: HashSet<OrderId>,
}

impl Inventory {
    fn booked(&self, item_id: &ItemId, now: DateTime<Utc>) -> i64 {
        self.bookings
            .iter()
            .filter(|b| &b.item_id == item_id && b.is_active(now))
            .map(|b| b.quantity)
            .sum()
    }
}

/// In-memory reservation store for tests and single-process runs.
///
/// Every call takes the write lock once, which makes each call serializable
/// with respect to all others.
#[derive(Clone, Default)]
pub struct InMemoryReservationStore {
    inventory: Arc<RwLock<Inventory>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of booking rows, expired ones included.
    pub async fn booking_count(&self) -> usize {
        self.inventory.read().await.bookings.len()
    }

    pub async fn clear(&self) {
        let mut inventory = self.inventory.write().await;
        inventory.items.clear();
        inventory.bookings.clear();
        inventory.finalized.clear();
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn upsert_item(
        &self,
        item_id: &ItemId,
        quantity: i64,
        metadata: &ItemMetadata,
        now: DateTime<Utc>,
    ) -> Result<StockItem> {
        let mut inventory = self.inventory.write().await;
        let item = inventory
            .items
            .entry(item_id.clone())
            .or_insert_with(|| StockItem {
                id: item_id.clone(),
                quantity: 0,
                metadata: metadata.clone(),
                created_at: now,
                updated_at: now,
            });
        item.quantity = item.quantity.checked_add(quantity).ok_or_else(|| {
            StockError::Validation(format!("on-hand quantity of {item_id} would overflow"))
        })?;
        item.metadata = metadata.clone();
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn stock_level(
        &self,
        item_id: &ItemId,
        now: DateTime<Utc>,
    ) -> Result<Option<StockLevel>> {
        let inventory = self.inventory.read().await;
        Ok(inventory
            .items
            .get(item_id)
            .map(|item| StockLevel::new(item.clone(), inventory.booked(item_id, now))))
    }

    async fn remove_item(&self, item_id: &ItemId, now: DateTime<Utc>) -> Result<StockItem> {
        let mut inventory = self.inventory.write().await;
        if !inventory.items.contains_key(item_id) {
            return Err(StockError::ItemNotFound(item_id.clone()));
        }

        let booked = inventory.booked(item_id, now);
        if booked > 0 {
            return Err(StockError::ActiveBookings {
                item_id: item_id.clone(),
                booked,
            });
        }

        inventory.bookings.retain(|b| &b.item_id != item_id);
        inventory
            .items
            .remove(item_id)
            .ok_or_else(|| StockError::ItemNotFound(item_id.clone()))
    }

    async fn book(
        &self,
        items: &[ItemQuantity],
        order_id: Option<OrderId>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        let mut inventory = self.inventory.write().await;

        // Check every line before writing anything.
        let mut pending: HashMap<&ItemId, i64> = HashMap::new();
        for line in items {
            let item = inventory
                .items
                .get(&line.item_id)
                .ok_or_else(|| StockError::ItemNotFound(line.item_id.clone()))?;
            let held = inventory.booked(&line.item_id, now)
                + pending.get(&line.item_id).copied().unwrap_or(0);
            let available = item.quantity - held;
            if available < line.quantity {
                return Err(StockError::InsufficientStock {
                    item_id: line.item_id.clone(),
                    requested: line.quantity,
                    available,
                });
            }
            *pending.entry(&line.item_id).or_default() += line.quantity;
        }

        let created: Vec<Booking> = items
            .iter()
            .map(|line| Booking {
                booking_id: BookingId::new(),
                item_id: line.item_id.clone(),
                quantity: line.quantity,
                order_id,
                expires_at,
                created_at: now,
            })
            .collect();
        inventory.bookings.extend(created.iter().cloned());

        Ok(created)
    }

    async fn release(
        &self,
        items: &[ItemQuantity],
        order_id: Option<OrderId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemQuantity>> {
        let mut inventory = self.inventory.write().await;
        let mut released = Vec::with_capacity(items.len());

        for line in items {
            let eligible = |b: &Booking| {
                b.item_id == line.item_id && order_id.is_none_or(|id| b.order_id == Some(id))
            };

            if line.quantity <= 0 {
                let mut freed = 0;
                inventory.bookings.retain(|b| {
                    if !eligible(b) {
                        return true;
                    }
                    if b.is_active(now) {
                        freed += b.quantity;
                    }
                    false
                });
                released.push(ItemQuantity::new(line.item_id.clone(), freed));
                continue;
            }

            let mut oldest_first: Vec<usize> = (0..inventory.bookings.len())
                .filter(|&i| {
                    let b = &inventory.bookings[i];
                    eligible(b) && b.is_active(now)
                })
                .collect();
            oldest_first.sort_by_key(|&i| inventory.bookings[i].created_at);

            let mut remaining = line.quantity;
            let mut consumed: HashSet<BookingId> = HashSet::new();
            for i in oldest_first {
                if remaining == 0 {
                    break;
                }
                let booking = &mut inventory.bookings[i];
                if booking.quantity <= remaining {
                    remaining -= booking.quantity;
                    consumed.insert(booking.booking_id);
                } else {
                    booking.quantity -= remaining;
                    remaining = 0;
                }
            }
            inventory
                .bookings
                .retain(|b| !consumed.contains(&b.booking_id));

            released.push(ItemQuantity::new(
                line.item_id.clone(),
                line.quantity - remaining,
            ));
        }

        Ok(released)
    }

    async fn finalize(&self, order_id: OrderId, now: DateTime<Utc>) -> Result<Vec<ItemQuantity>> {
        let mut inventory = self.inventory.write().await;

        let mut totals: BTreeMap<ItemId, i64> = BTreeMap::new();
        for booking in inventory
            .bookings
            .iter()
            .filter(|b| b.order_id == Some(order_id) && b.is_active(now))
        {
            *totals.entry(booking.item_id.clone()).or_default() += booking.quantity;
        }

        if totals.is_empty() {
            return Err(StockError::NoActiveBookings(order_id));
        }

        for (item_id, quantity) in &totals {
            let item = inventory
                .items
                .get(item_id)
                .ok_or_else(|| StockError::ItemNotFound(item_id.clone()))?;
            if item.quantity < *quantity {
                return Err(StockError::InsufficientStock {
                    item_id: item_id.clone(),
                    requested: *quantity,
                    available: item.quantity,
                });
            }
        }

        for (item_id, quantity) in &totals {
            if let Some(item) = inventory.items.get_mut(item_id) {
                item.quantity -= quantity;
                item.updated_at = now;
            }
        }
        inventory.bookings.retain(|b| b.order_id != Some(order_id));
        inventory.finalized.insert(order_id);

        Ok(totals
            .into_iter()
            .map(|(item_id, quantity)| ItemQuantity { item_id, quantity })
            .collect())
    }

    async fn is_finalized(&self, order_id: OrderId) -> Result<bool> {
        Ok(self.inventory.read().await.finalized.contains(&order_id))
    }

    async fn active_bookings_for_order(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        let inventory = self.inventory.read().await;
        let mut bookings: Vec<Booking> = inventory
            .bookings
            .iter()
            .filter(|b| b.order_id == Some(order_id) && b.is_active(now))
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    async fn active_bookings_for_item(
        &self,
        item_id: &ItemId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        let inventory = self.inventory.read().await;
        let mut bookings: Vec<Booking> = inventory
            .bookings
            .iter()
            .filter(|b| &b.item_id == item_id && b.is_active(now))
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut inventory = self.inventory.write().await;
        let before = inventory.bookings.len();
        inventory.bookings.retain(|b| b.is_active(now));
        Ok((before - inventory.bookings.len()) as u64)
    }
}
