//! Background deletion of lapsed bookings.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::{ReservationEngine, store::ReservationStore};

#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Periodically purges expired bookings so the table does not grow without bound.
pub struct ExpirySweeper<S: ReservationStore> {
    engine: Arc<ReservationEngine<S>>,
    config: SweeperConfig,
}

impl<S: ReservationStore> ExpirySweeper<S> {
    pub fn new(engine: Arc<ReservationEngine<S>>, config: SweeperConfig) -> Self {
        Self { engine, config }
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.config.interval, "expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.engine.sweep_expired().await {
                        tracing::warn!(error = %e, "expiry sweep failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("expiry sweeper stopped");
    }
}
