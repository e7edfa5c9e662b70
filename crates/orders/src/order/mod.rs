//! The order record and its line items.

mod status;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CustomerId, ItemQuantity, OrderError, OrderId, Result};

pub use status::OrderStatus;

/// A customer order. This is also the payload of the order topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    /// One line per item id, quantities already summed.
    pub items: Vec<ItemQuantity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a `Pending` order with a fresh id, validating and aggregating the lines.
    pub fn new(
        customer_id: CustomerId,
        items: &[ItemQuantity],
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if customer_id.is_blank() {
            return Err(OrderError::CustomerIdRequired);
        }
        let items = aggregate_line_items(items)?;

        Ok(Self {
            id: OrderId::new(),
            customer_id,
            status: OrderStatus::Pending,
            items,
            created_at: now,
            updated_at: now,
        })
    }

    /// Total number of units across all lines.
    pub fn total_units(&self) -> i64 {
        self.items
            .iter()
            .fold(0i64, |total, i| total.saturating_add(i.quantity))
    }

    /// Checks the shape of an order received from elsewhere.
    pub fn validate(&self) -> Result<()> {
        if self.customer_id.is_blank() {
            return Err(OrderError::CustomerIdRequired);
        }
        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &self.items {
            check_line(item)?;
        }
        Ok(())
    }
}

/// Validates line items and sums quantities of repeated item ids.
///
/// Lines keep the order in which each item id first appeared.
pub fn aggregate_line_items(items: &[ItemQuantity]) -> Result<Vec<ItemQuantity>> {
    if items.is_empty() {
        return Err(OrderError::NoItems);
    }

    let mut aggregated: Vec<ItemQuantity> = Vec::with_capacity(items.len());
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for item in items {
        check_line(item)?;
        match positions.get(item.item_id.as_str()) {
            Some(&pos) => {
                let line = &mut aggregated[pos];
                line.quantity = line.quantity.checked_add(item.quantity).ok_or_else(|| {
                    OrderError::QuantityOverflow {
                        item_id: item.item_id.clone(),
                    }
                })?;
            }
            None => {
                positions.insert(item.item_id.as_str(), aggregated.len());
                aggregated.push(item.clone());
            }
        }
    }
    Ok(aggregated)
}

fn check_line(item: &ItemQuantity) -> Result<()> {
    if item.item_id.is_blank() {
        return Err(OrderError::ItemIdRequired);
    }
    if item.quantity <= 0 {
        return Err(OrderError::InvalidQuantity {
            item_id: item.item_id.clone(),
            quantity: item.quantity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_items_are_summed_in_first_seen_order() {
        let items = aggregate_line_items(&[
            ItemQuantity::new("SKU-2", 1),
            ItemQuantity::new("SKU-1", 2),
            ItemQuantity::new("SKU-2", 3),
        ])
        .unwrap();

        assert_eq!(
            items,
            vec![ItemQuantity::new("SKU-2", 4), ItemQuantity::new("SKU-1", 2)]
        );
    }

    #[test]
    fn test_empty_items_rejected() {
        assert!(matches!(aggregate_line_items(&[]), Err(OrderError::NoItems)));
    }

    #[test]
    fn test_non_positive_quantity_rejected() {
        let result = aggregate_line_items(&[ItemQuantity::new("SKU-1", 0)]);
        assert!(matches!(
            result,
            Err(OrderError::InvalidQuantity { quantity: 0, .. })
        ));
    }

    #[test]
    fn test_overflowing_duplicate_lines_rejected() {
        let result = aggregate_line_items(&[
            ItemQuantity::new("SKU-1", i64::MAX),
            ItemQuantity::new("SKU-1", 1),
        ]);

        assert!(matches!(result, Err(OrderError::QuantityOverflow { .. })));
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn test_blank_item_id_rejected() {
        let result = aggregate_line_items(&[ItemQuantity::new("", 1)]);
        assert!(matches!(result, Err(OrderError::ItemIdRequired)));
    }

    #[test]
    fn test_new_order_is_pending() {
        let order = Order::new(
            CustomerId::new("customer-1"),
            &[ItemQuantity::new("SKU-1", 2)],
            Utc::now(),
        )
        .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_units(), 2);
        assert!(order.validate().is_ok());
    }

    #[test]
    fn test_new_order_requires_customer() {
        let result = Order::new(
            CustomerId::new(" "),
            &[ItemQuantity::new("SKU-1", 2)],
            Utc::now(),
        );
        assert!(matches!(result, Err(OrderError::CustomerIdRequired)));
    }

    #[test]
    fn test_order_json_shape() {
        let order = Order::new(
            CustomerId::new("customer-1"),
            &[ItemQuantity::new("SKU-1", 2)],
            Utc::now(),
        )
        .unwrap();

        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["customer_id"], "customer-1");
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["items"][0]["item_id"], "SKU-1");
        assert_eq!(json["items"][0]["quantity"], 2);
    }
}
