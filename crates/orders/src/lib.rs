//! Order records.
//!
//! An [`Order`] moves through [`OrderStatus`] under the control of the
//! order orchestrator. The [`OrderStore`] persists orders together with
//! an outbox of messages that must reach the event bus.

pub mod error;
pub mod memory;
pub mod order;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use common::{CustomerId, ItemId, ItemQuantity, OrderId};
pub use error::{OrderError, Result};
pub use memory::InMemoryOrderStore;
pub use order::{Order, OrderStatus, aggregate_line_items};
pub use outbox::OutboxMessage;
pub use postgres::PostgresOrderStore;
pub use store::OrderStore;
