//! Names of the event streams shared between services.

/// Carries an `Order` (JSON) once its stock is booked.
pub const ORDERS_CREATED: &str = "orders.created";

/// Carries an `Order` (JSON) once fulfillment completes.
pub const ORDERS_FINISHED: &str = "orders.finished";
