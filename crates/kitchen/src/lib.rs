//! Kitchen service: the downstream fulfillment stage.
//!
//! [`FulfillmentWorker`] consumes "orders.created", records a
//! [`KitchenTicket`], prepares the order, finalizes its stock through the
//! order orchestrator and announces completion on "orders.finished".
//! Offsets are committed only once a delivery's full effect is durable, so
//! a crash redelivers unfinished work and every step tolerates repeats.

pub mod error;
pub mod fulfillment;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod ticket;
pub mod tracker;
pub mod worker;

pub use common::{ItemQuantity, OrderId};
pub use error::{KitchenError, Result};
pub use fulfillment::OrderFulfillment;
pub use memory::InMemoryKitchenStore;
pub use postgres::PostgresKitchenStore;
pub use store::KitchenStore;
pub use ticket::{KitchenTicket, TicketStatus};
pub use tracker::OffsetTracker;
pub use worker::{FulfillmentWorker, WorkerConfig};
