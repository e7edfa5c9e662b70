//! Backend selection and background tasks.

use std::sync::Arc;

use axum::Router;
use common::topics;
use kitchen::{FulfillmentWorker, InMemoryKitchenStore, KitchenStore, PostgresKitchenStore};
use messaging::{EventPublisher, EventSource, InMemoryBroker};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use saga::OutboxRelay;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use stock::{ExpirySweeper, InMemoryReservationStore, PostgresReservationStore, ReservationStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{Config, Storage};
use crate::error::StartupError;
use crate::{AppState, create_app};

/// Handles to the sweeper, relay and worker tasks.
pub struct Background {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Background {
    /// Starts the expiry sweeper, the outbox relay and the kitchen worker.
    pub fn spawn<R, O, K, P, S>(
        state: &Arc<AppState<R, O>>,
        kitchen: K,
        publisher: P,
        source: S,
        config: &Config,
    ) -> Self
    where
        R: ReservationStore + 'static,
        O: OrderStore + Clone + 'static,
        K: KitchenStore + 'static,
        P: EventPublisher + Clone + 'static,
        S: EventSource + 'static,
    {
        let (shutdown, rx) = watch::channel(false);

        let sweeper = ExpirySweeper::new(state.engine.clone(), config.sweeper());
        let relay = OutboxRelay::new(
            state.orchestrator.orders().clone(),
            publisher.clone(),
            config.relay(),
        );
        let worker = FulfillmentWorker::new(
            state.orchestrator.clone(),
            kitchen,
            publisher,
            source,
            config.worker(),
        );

        let tasks = vec![
            tokio::spawn(sweeper.run(rx.clone())),
            tokio::spawn(relay.run(rx.clone())),
            tokio::spawn(worker.run(rx)),
        ];
        Self { shutdown, tasks }
    }

    /// Signals every task to stop and waits for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "background task ended abnormally");
            }
        }
        tracing::info!("background tasks stopped");
    }
}

/// Builds the router and starts the background tasks on the configured backends.
pub async fn start(
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Result<(Router, Background), StartupError> {
    let engine = config.engine()?;
    match config.storage()? {
        Storage::InMemory => {
            tracing::info!("using in-memory stores");
            let state = AppState::new(
                InMemoryReservationStore::new(),
                InMemoryOrderStore::new(),
                engine,
            );
            let background = start_background(&state, InMemoryKitchenStore::new(), config).await?;
            Ok((create_app(state, metrics_handle), background))
        }
        Storage::Postgres {
            stock,
            orders,
            kitchen,
        } => {
            tracing::info!("using PostgreSQL stores");
            let stock_store = PostgresReservationStore::new(connect(&stock).await?);
            stock_store.run_migrations().await?;
            let order_store = PostgresOrderStore::new(connect(&orders).await?);
            order_store.run_migrations().await?;
            let kitchen_store = PostgresKitchenStore::new(connect(&kitchen).await?);
            kitchen_store.run_migrations().await?;

            let state = AppState::new(stock_store, order_store, engine);
            let background = start_background(&state, kitchen_store, config).await?;
            Ok((create_app(state, metrics_handle), background))
        }
    }
}

async fn connect(url: &str) -> Result<PgPool, StartupError> {
    Ok(PgPoolOptions::new().max_connections(10).connect(url).await?)
}

async fn start_background<R, O, K>(
    state: &Arc<AppState<R, O>>,
    kitchen: K,
    config: &Config,
) -> Result<Background, StartupError>
where
    R: ReservationStore + 'static,
    O: OrderStore + Clone + 'static,
    K: KitchenStore + 'static,
{
    #[cfg(feature = "kafka")]
    if let Some(brokers) = &config.kafka_broker_url {
        use messaging::{KafkaConfig, KafkaPublisher, KafkaSource};

        let kafka = KafkaConfig::new(brokers.clone(), config.kafka_group_id.clone());
        let publisher = KafkaPublisher::new(&kafka)?;
        let source = KafkaSource::new(&kafka, &[topics::ORDERS_CREATED])?;
        tracing::info!(%brokers, group = %config.kafka_group_id, "using Kafka");
        return Ok(Background::spawn(state, kitchen, publisher, source, config));
    }

    #[cfg(not(feature = "kafka"))]
    if config.kafka_broker_url.is_some() {
        return Err(StartupError::Config(
            "KAFKA_BROKER_URL is set but the binary was built without the `kafka` feature".into(),
        ));
    }

    tracing::info!("using the in-process broker");
    let broker = InMemoryBroker::new();
    let source = broker
        .consumer(&config.kafka_group_id, topics::ORDERS_CREATED)
        .await;
    Ok(Background::spawn(state, kitchen, broker, source, config))
}
