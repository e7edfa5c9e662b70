use thiserror::Error;

use crate::OrderId;

/// Errors raised by kitchen stores.
#[derive(Debug, Error)]
pub enum KitchenError {
    /// The order cannot be prepared as received (no items, bad quantity, no customer).
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Kitchen ticket not found: {0}")]
    TicketNotFound(OrderId),

    #[error("Unknown ticket status: {0}")]
    UnknownStatus(String),

    /// The store cannot be reached.
    #[error("Kitchen store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KitchenError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KitchenError::Unavailable(_) | KitchenError::Database(_) | KitchenError::Migration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, KitchenError>;
