use thiserror::Error;

use crate::{ItemId, OrderId, OrderStatus};

/// Errors that can occur when creating, storing or transitioning orders.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Customer ID is required.
    #[error("Customer ID is required")]
    CustomerIdRequired,

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// A line item has an empty item id.
    #[error("Item ID is required")]
    ItemIdRequired,

    /// Invalid quantity.
    #[error("Invalid quantity for {item_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { item_id: ItemId, quantity: i64 },

    /// Duplicate lines for one item add up past the representable maximum.
    #[error("Combined quantity for {item_id} is too large")]
    QuantityOverflow { item_id: ItemId },

    /// The requested status change is not allowed.
    #[error("Invalid status transition: cannot move order from {current} to {requested}")]
    InvalidStatusTransition {
        current: OrderStatus,
        requested: OrderStatus,
    },

    /// A status string did not name a known status.
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The order already exists.
    #[error("Order already exists: {0}")]
    AlreadyExists(OrderId),

    /// The stored status changed between read and write.
    #[error("Order {order_id} changed concurrently (expected status {expected})")]
    Conflict {
        order_id: OrderId,
        expected: OrderStatus,
    },

    /// The store cannot be reached.
    #[error("Order store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrderError {
    /// Returns true if retrying the same call later may succeed.
    ///
    /// A lost compare-and-set counts: the retry re-reads the current status.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrderError::Conflict { .. }
                | OrderError::Unavailable(_)
                | OrderError::Database(_)
                | OrderError::Migration(_)
        )
    }

    /// Returns true for input errors that will fail the same way every time.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OrderError::CustomerIdRequired
                | OrderError::NoItems
                | OrderError::ItemIdRequired
                | OrderError::InvalidQuantity { .. }
                | OrderError::QuantityOverflow { .. }
                | OrderError::UnknownStatus(_)
        )
    }
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;
