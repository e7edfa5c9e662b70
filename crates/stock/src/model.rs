use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BookingId, ItemId, ItemQuantity, OrderId};

/// Descriptive data attached to a stock item. Overwritten on every upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub img_path: String,
}

/// A stock item with its on-hand quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub id: ItemId,
    /// Units physically in stock, booked or not.
    pub quantity: i64,
    #[serde(flatten)]
    pub metadata: ItemMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A time-bounded hold on some units of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: BookingId,
    pub item_id: ItemId,
    pub quantity: i64,
    pub order_id: Option<OrderId>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// A booking counts against availability until its expiry has passed.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A stock item together with how much of it is currently held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    #[serde(flatten)]
    pub item: StockItem,
    /// Sum of active bookings.
    pub booked: i64,
    /// `quantity - booked`.
    pub available: i64,
}

impl StockLevel {
    pub fn new(item: StockItem, booked: i64) -> Self {
        let available = item.quantity - booked;
        Self {
            item,
            booked,
            available,
        }
    }
}

/// Outcome of a non-binding stock check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub all_available: bool,
    /// Requested lines that are unknown or cannot be satisfied, with the requested quantity.
    pub missing_or_insufficient: Vec<ItemQuantity>,
}

impl VerifyReport {
    pub(crate) fn new() -> Self {
        Self {
            all_available: true,
            missing_or_insufficient: Vec::new(),
        }
    }

    pub(crate) fn flag(&mut self, item: ItemQuantity) {
        self.all_available = false;
        self.missing_or_insufficient.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn booking_is_inactive_at_its_expiry_instant() {
        let now = Utc::now();
        let booking = Booking {
            booking_id: BookingId::new(),
            item_id: ItemId::new("SKU-1"),
            quantity: 1,
            order_id: None,
            expires_at: now,
            created_at: now - Duration::minutes(15),
        };

        assert!(!booking.is_active(now));
        assert!(booking.is_active(now - Duration::seconds(1)));
    }

    #[test]
    fn stock_level_computes_available() {
        let now = Utc::now();
        let item = StockItem {
            id: ItemId::new("SKU-1"),
            quantity: 10,
            metadata: ItemMetadata::default(),
            created_at: now,
            updated_at: now,
        };
        let level = StockLevel::new(item, 4);
        assert_eq!(level.available, 6);
    }

    #[test]
    fn verify_report_flags_unavailable_lines() {
        let mut report = VerifyReport::new();
        assert!(report.all_available);

        report.flag(ItemQuantity::new("SKU-1", 2));
        assert!(!report.all_available);
        assert_eq!(report.missing_or_insufficient.len(), 1);
    }
}
