//! Types shared by every service in the workspace.

pub mod clock;
pub mod topics;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use types::{BookingId, CustomerId, ItemId, ItemQuantity, OrderId};
