use thiserror::Error;

use crate::{ItemId, OrderId};

/// Errors raised by the reservation engine and its stores.
#[derive(Debug, Error)]
pub enum StockError {
    /// The request was malformed. Nothing was changed.
    #[error("Invalid stock request: {0}")]
    Validation(String),

    /// Not enough unbooked stock to satisfy the request.
    #[error("Insufficient stock for item {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        item_id: ItemId,
        requested: i64,
        available: i64,
    },

    /// The stock item does not exist.
    #[error("Stock item not found: {0}")]
    ItemNotFound(ItemId),

    /// The order holds no active bookings (already finalized, expired or never booked).
    #[error("No active bookings for order {0}")]
    NoActiveBookings(OrderId),

    /// The item cannot be removed while bookings still hold it.
    #[error("Stock item {item_id} still has {booked} booked units")]
    ActiveBookings { item_id: ItemId, booked: i64 },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StockError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StockError::Database(_) | StockError::Migration(_))
    }

    /// Returns true for the not-found family (unknown item, no active bookings).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StockError::ItemNotFound(_) | StockError::NoActiveBookings(_)
        )
    }
}

/// Result type for stock operations.
pub type Result<T> = std::result::Result<T, StockError>;
