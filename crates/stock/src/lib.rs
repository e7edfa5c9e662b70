//! Inventory reservation engine.
//!
//! Stock is held through time-bounded bookings before it is deducted for
//! good. The invariant every operation preserves is
//! `on_hand >= sum(active bookings)` per item, where a booking is active
//! until its expiry passes.
//!
//! [`ReservationEngine`] carries the business rules and talks to a
//! [`ReservationStore`], of which there is an in-memory and a PostgreSQL
//! implementation.

pub mod engine;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;
pub mod sweeper;

pub use common::{BookingId, ItemId, ItemQuantity, OrderId};
pub use engine::{EngineConfig, ReservationEngine};
pub use error::{Result, StockError};
pub use memory::InMemoryReservationStore;
pub use model::{Booking, ItemMetadata, StockItem, StockLevel, VerifyReport};
pub use postgres::PostgresReservationStore;
pub use store::ReservationStore;
pub use sweeper::{ExpirySweeper, SweeperConfig};
