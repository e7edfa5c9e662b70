//! Order fulfillment saga.
//!
//! [`OrderOrchestrator`] owns the order lifecycle and the compensation rule:
//! stock booked for an order that could not be persisted is released before
//! the error is returned. Later steps (processing, finalize, finish, cancel)
//! are driven by the kitchen worker through the same orchestrator.
//!
//! [`OutboxRelay`] moves "orders.created" messages from the order store to
//! the bus.

pub mod coordinator;
pub mod error;
pub mod relay;
pub mod services;

pub use coordinator::{FinishOutcome, OrderOrchestrator};
pub use error::{Result, SagaError};
pub use relay::{OutboxRelay, RelayConfig};
pub use services::StockService;
