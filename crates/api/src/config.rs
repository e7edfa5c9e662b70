//! Application configuration loaded from environment variables.

use std::time::Duration;

use kitchen::WorkerConfig;
use saga::RelayConfig;
use stock::{EngineConfig, SweeperConfig};

use crate::error::StartupError;

/// Longest booking hold accepted from the environment (30 days).
const MAX_BOOKING_HOLD_SECS: u64 = 30 * 24 * 60 * 60;

/// Process configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` (default `0.0.0.0`) and `PORT` (default `3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `DATABASE_URL`: PostgreSQL for every store; unset means in-memory stores
/// - `STOCK_DATABASE_URL`, `ORDERS_DATABASE_URL`, `KITCHEN_DATABASE_URL`: per-store overrides
/// - `KAFKA_BROKER_URL`: Kafka bootstrap servers; unset means the in-process broker
/// - `KAFKA_GROUP_ID`: kitchen consumer group (default `kitchen-service`)
/// - `BOOKING_HOLD_SECS` (900), `PREPARATION_SECS` (10), `WORKER_CONCURRENCY` (8),
///   `FETCH_RETRY_SECS` (5), `SWEEP_INTERVAL_SECS` (60), `OUTBOX_INTERVAL_MS` (1000)
///
/// Unparseable numbers fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub stock_database_url: Option<String>,
    pub orders_database_url: Option<String>,
    pub kitchen_database_url: Option<String>,
    pub kafka_broker_url: Option<String>,
    pub kafka_group_id: String,
    pub booking_hold_secs: u64,
    pub preparation_secs: u64,
    pub worker_concurrency: usize,
    pub fetch_retry_secs: u64,
    pub sweep_interval_secs: u64,
    pub outbox_interval_ms: u64,
}

/// Where the three stores live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Storage {
    InMemory,
    Postgres {
        stock: String,
        orders: String,
        kitchen: String,
    },
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str, default: u64| {
            text(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        Self {
            host: text("HOST").unwrap_or(defaults.host),
            port: text("PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(defaults.port),
            log_level: text("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: text("DATABASE_URL"),
            stock_database_url: text("STOCK_DATABASE_URL"),
            orders_database_url: text("ORDERS_DATABASE_URL"),
            kitchen_database_url: text("KITCHEN_DATABASE_URL"),
            kafka_broker_url: text("KAFKA_BROKER_URL"),
            kafka_group_id: text("KAFKA_GROUP_ID").unwrap_or(defaults.kafka_group_id),
            booking_hold_secs: number("BOOKING_HOLD_SECS", defaults.booking_hold_secs),
            preparation_secs: number("PREPARATION_SECS", defaults.preparation_secs),
            worker_concurrency: number("WORKER_CONCURRENCY", defaults.worker_concurrency as u64)
                as usize,
            fetch_retry_secs: number("FETCH_RETRY_SECS", defaults.fetch_retry_secs),
            sweep_interval_secs: number("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
            outbox_interval_ms: number("OUTBOX_INTERVAL_MS", defaults.outbox_interval_ms),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolves the store backends. Mixing in-memory and PostgreSQL stores is
    /// rejected: the orchestrator and the kitchen must see the same orders.
    pub fn storage(&self) -> Result<Storage, StartupError> {
        let resolve = |specific: &Option<String>| specific.clone().or(self.database_url.clone());
        match (
            resolve(&self.stock_database_url),
            resolve(&self.orders_database_url),
            resolve(&self.kitchen_database_url),
        ) {
            (None, None, None) => Ok(Storage::InMemory),
            (Some(stock), Some(orders), Some(kitchen)) => Ok(Storage::Postgres {
                stock,
                orders,
                kitchen,
            }),
            _ => Err(StartupError::Config(
                "either every store has a database URL or none does".into(),
            )),
        }
    }

    /// Engine settings. Holds longer than 30 days are rejected.
    pub fn engine(&self) -> Result<EngineConfig, StartupError> {
        let hold = i64::try_from(self.booking_hold_secs)
            .ok()
            .filter(|_| self.booking_hold_secs <= MAX_BOOKING_HOLD_SECS)
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                StartupError::Config(format!(
                    "BOOKING_HOLD_SECS must be at most {MAX_BOOKING_HOLD_SECS}, got {}",
                    self.booking_hold_secs
                ))
            })?;
        Ok(EngineConfig { hold })
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            concurrency: self.worker_concurrency.max(1),
            preparation: Duration::from_secs(self.preparation_secs),
            fetch_backoff: Duration::from_secs(self.fetch_retry_secs),
            retry_backoff: Duration::from_secs(self.fetch_retry_secs),
        }
    }

    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            interval: Duration::from_millis(self.outbox_interval_ms.max(1)),
            ..RelayConfig::default()
        }
    }

    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            stock_database_url: None,
            orders_database_url: None,
            kitchen_database_url: None,
            kafka_broker_url: None,
            kafka_group_id: "kitchen-service".to_string(),
            booking_hold_secs: 900,
            preparation_secs: 10,
            worker_concurrency: 8,
            fetch_retry_secs: 5,
            sweep_interval_secs: 60,
            outbox_interval_ms: 1000,
        }
    }
}
