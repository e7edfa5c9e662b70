//! Saga error types.

use messaging::BusError;
use orders::OrderError;
use stock::{ItemQuantity, StockError};
use thiserror::Error;

/// Errors that can occur while orchestrating an order.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Verification found lines that cannot be satisfied. Nothing was written.
    #[error("Insufficient stock for {} item(s)", items.len())]
    InsufficientStock { items: Vec<ItemQuantity> },

    /// Reservation engine error.
    #[error(transparent)]
    Stock(#[from] StockError),

    /// Order store or order rule error.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// Event bus error.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl SagaError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::InsufficientStock { .. } => false,
            SagaError::Stock(e) => e.is_transient(),
            SagaError::Order(e) => e.is_transient(),
            SagaError::Bus(_) => true,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            SagaError::Stock(e) => e.is_not_found(),
            SagaError::Order(e) => matches!(e, OrderError::NotFound(_)),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SagaError {
    fn from(err: serde_json::Error) -> Self {
        SagaError::Order(OrderError::Serialization(err))
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
