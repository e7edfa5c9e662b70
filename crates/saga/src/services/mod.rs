//! Services the orchestrator calls out to.

pub mod stock;

pub use stock::StockService;
