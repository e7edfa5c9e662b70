//! The "orders.created" consumer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Clock, SystemClock, topics};
use messaging::{Delivery, EventPublisher, EventSource};
use orders::Order;
use saga::SagaError;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{Id, JoinError, JoinSet};

use crate::{
    KitchenError, OffsetTracker, OrderFulfillment, OrderId, TicketStatus, store::KitchenStore,
};

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Deliveries processed at the same time.
    pub concurrency: usize,
    /// Simulated preparation time per order.
    pub preparation: Duration,
    /// Wait after a failed fetch.
    pub fetch_backoff: Duration,
    /// Wait before re-running a delivery that hit a transient failure.
    pub retry_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            preparation: Duration::from_secs(10),
            fetch_backoff: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// How a delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    /// Prepared, finalized and announced.
    Completed,
    /// Already finished earlier; the announcement was sent again.
    Republished,
    /// Unusable message, acknowledged without effect.
    Dropped,
    /// Permanent failure; the order was cancelled.
    Failed,
    /// Redelivery of an order that already failed earlier.
    Skipped,
    /// Transient failure; run the delivery again.
    Retry(String),
    /// Shutdown interrupted the delivery; it stays uncommitted.
    Abandoned,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Republished => "republished",
            Outcome::Dropped => "dropped",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
            Outcome::Retry(_) => "retry",
            Outcome::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    topic: String,
    partition: i32,
    offset: i64,
}

/// Per-delivery logic, shared by all worker tasks.
struct Kitchen<F, K, P> {
    fulfillment: F,
    store: K,
    publisher: P,
    clock: Arc<dyn Clock>,
    preparation: Duration,
    /// Serializes deliveries of the same order.
    order_locks: Mutex<HashMap<OrderId, Arc<Mutex<()>>>>,
}

impl<F, K, P> Kitchen<F, K, P>
where
    F: OrderFulfillment,
    K: KitchenStore,
    P: EventPublisher,
{
    #[tracing::instrument(skip_all, fields(offset = delivery.offset, partition = delivery.partition))]
    async fn handle(&self, delivery: &Delivery, shutdown: &mut watch::Receiver<bool>) -> Outcome {
        let order: Order = match serde_json::from_slice(&delivery.payload) {
            Ok(order) => order,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable order message dropped");
                return Outcome::Dropped;
            }
        };
        let order_id = order.id;

        let lock = self.order_lock(order_id).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.process(&order, shutdown).await
        };
        drop(lock);
        self.order_locks
            .lock()
            .await
            .retain(|_, l| Arc::strong_count(l) > 1);
        outcome
    }

    async fn order_lock(&self, order_id: OrderId) -> Arc<Mutex<()>> {
        self.order_locks
            .lock()
            .await
            .entry(order_id)
            .or_default()
            .clone()
    }

    async fn process(&self, order: &Order, shutdown: &mut watch::Receiver<bool>) -> Outcome {
        let order_id = order.id;
        let ticket = match self.store.accept_order(order, self.clock.now()).await {
            Ok(ticket) => ticket,
            Err(e) if e.is_transient() => return Outcome::Retry(e.to_string()),
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "order rejected by kitchen");
                return Outcome::Dropped;
            }
        };

        match ticket.status {
            TicketStatus::Finished => return self.announce(order_id, true).await,
            TicketStatus::Failed => {
                tracing::info!(%order_id, "order already failed, skipping");
                return Outcome::Skipped;
            }
            TicketStatus::Accepted => {}
        }

        if let Err(e) = self.fulfillment.start_processing(order_id).await {
            return self.on_step_error(order_id, "start processing", e).await;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.preparation) => {}
            _ = shutdown.changed() => return Outcome::Abandoned,
        }

        if let Err(e) = self.fulfillment.finalize_order(order_id).await {
            return self.on_step_error(order_id, "finalize", e).await;
        }

        self.announce(order_id, false).await
    }

    /// Finishes the order and ticket, then publishes "orders.finished".
    async fn announce(&self, order_id: OrderId, replay: bool) -> Outcome {
        let finished = match self.fulfillment.finish_order(order_id).await {
            Ok(outcome) => outcome.order,
            Err(e) => return self.on_step_error(order_id, "finish", e).await,
        };

        if let Err(e) = self.store.finish_order(order_id, self.clock.now()).await {
            return kitchen_failure(order_id, e);
        }

        let payload = match serde_json::to_vec(&finished) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(%order_id, error = %e, "finished order not serializable");
                return Outcome::Failed;
            }
        };
        let key = order_id.to_string();
        if let Err(e) = self
            .publisher
            .publish(topics::ORDERS_FINISHED, &key, &payload)
            .await
        {
            return Outcome::Retry(e.to_string());
        }

        if replay {
            tracing::info!(%order_id, "finished order announced again");
            Outcome::Republished
        } else {
            tracing::info!(%order_id, "order finished");
            Outcome::Completed
        }
    }

    async fn on_step_error(&self, order_id: OrderId, step: &str, err: SagaError) -> Outcome {
        if err.is_transient() {
            return Outcome::Retry(format!("{step}: {err}"));
        }

        let reason = format!("{step} failed: {err}");
        tracing::warn!(%order_id, %reason, "giving up on order");

        if let Err(e) = self.fulfillment.cancel_order(order_id, &reason).await {
            if e.is_transient() {
                return Outcome::Retry(format!("cancel: {e}"));
            }
            tracing::warn!(%order_id, error = %e, "order could not be cancelled");
        }

        match self.store.fail_order(order_id, &reason, self.clock.now()).await {
            Ok(_) => Outcome::Failed,
            Err(e) => kitchen_failure(order_id, e),
        }
    }
}

fn kitchen_failure(order_id: OrderId, err: KitchenError) -> Outcome {
    if err.is_transient() {
        return Outcome::Retry(err.to_string());
    }
    tracing::error!(%order_id, error = %err, "kitchen ticket update failed");
    Outcome::Failed
}

/// Consumes booked orders with bounded concurrency.
///
/// A delivery is acknowledged (its offset becomes committable) once it
/// completed or failed permanently. Transient failures re-run the delivery
/// after `retry_backoff` and hold back the partition's commit position
/// until they resolve.
pub struct FulfillmentWorker<F, K, P, S> {
    kitchen: Arc<Kitchen<F, K, P>>,
    source: S,
    config: WorkerConfig,
}

impl<F, K, P, S> FulfillmentWorker<F, K, P, S>
where
    F: OrderFulfillment + 'static,
    K: KitchenStore + 'static,
    P: EventPublisher + 'static,
    S: EventSource,
{
    pub fn new(fulfillment: F, store: K, publisher: P, source: S, config: WorkerConfig) -> Self {
        Self::with_clock(
            fulfillment,
            store,
            publisher,
            source,
            config,
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        fulfillment: F,
        store: K,
        publisher: P,
        source: S,
        config: WorkerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kitchen: Arc::new(Kitchen {
                fulfillment,
                store,
                publisher,
                clock,
                preparation: config.preparation,
                order_locks: Mutex::new(HashMap::new()),
            }),
            source,
            config,
        }
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    ///
    /// On shutdown it stops fetching, waits for in-flight deliveries and
    /// commits whatever completed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        self.report_unfinished().await;

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        let mut in_flight: HashMap<Id, InFlight> = HashMap::new();
        let mut tracker = OffsetTracker::new();
        let mut permit: Option<OwnedSemaphorePermit> = None;

        tracing::info!(concurrency = self.config.concurrency, "fulfillment worker started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(joined) = tasks.join_next_with_id() => {
                    self.settle(joined, &mut in_flight, &mut tracker).await;
                }
                acquired = semaphore.clone().acquire_owned(), if permit.is_none() => {
                    match acquired {
                        Ok(p) => permit = Some(p),
                        Err(_) => break,
                    }
                }
                fetched = self.source.fetch(), if permit.is_some() => match fetched {
                    Ok(delivery) => {
                        if let Some(p) = permit.take() {
                            tracker.start(&delivery.topic, delivery.partition, delivery.offset);
                            self.spawn(&mut tasks, &mut in_flight, delivery, p, shutdown.clone());
                        }
                    }
                    Err(e) => {
                        metrics::counter!("kitchen_fetch_errors_total").increment(1);
                        tracing::warn!(error = %e, backoff = ?self.config.fetch_backoff, "fetch failed, retrying");
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.fetch_backoff) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                },
            }
        }

        tracing::info!(in_flight = tasks.len(), "fulfillment worker draining");
        while let Some(joined) = tasks.join_next_with_id().await {
            self.settle(joined, &mut in_flight, &mut tracker).await;
        }
        tracing::info!("fulfillment worker stopped");
    }

    fn spawn(
        &self,
        tasks: &mut JoinSet<Outcome>,
        in_flight: &mut HashMap<Id, InFlight>,
        delivery: Delivery,
        permit: OwnedSemaphorePermit,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let kitchen = self.kitchen.clone();
        let retry_backoff = self.config.retry_backoff;
        let position = InFlight {
            topic: delivery.topic.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
        };

        let handle = tasks.spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            loop {
                match kitchen.handle(&delivery, &mut shutdown).await {
                    Outcome::Retry(reason) => {
                        metrics::counter!("kitchen_retries_total").increment(1);
                        tracing::warn!(offset = delivery.offset, %reason, "transient failure, retrying delivery");
                        tokio::select! {
                            _ = tokio::time::sleep(retry_backoff) => {}
                            _ = shutdown.changed() => return Outcome::Abandoned,
                        }
                    }
                    outcome => {
                        metrics::histogram!("kitchen_processing_seconds")
                            .record(started.elapsed().as_secs_f64());
                        return outcome;
                    }
                }
            }
        });
        in_flight.insert(handle.id(), position);
    }

    async fn settle(
        &self,
        joined: Result<(Id, Outcome), JoinError>,
        in_flight: &mut HashMap<Id, InFlight>,
        tracker: &mut OffsetTracker,
    ) {
        let (id, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                // A panicking delivery would otherwise block its partition forever.
                tracing::error!(error = %e, "delivery task aborted");
                (e.id(), Outcome::Failed)
            }
        };
        let Some(position) = in_flight.remove(&id) else {
            return;
        };

        metrics::counter!("kitchen_deliveries_total", "outcome" => outcome.label()).increment(1);
        if outcome == Outcome::Completed {
            metrics::counter!("kitchen_orders_finished_total").increment(1);
        }
        if outcome == Outcome::Abandoned {
            return;
        }

        let Some(next) = tracker.complete(&position.topic, position.partition, position.offset)
        else {
            return;
        };
        if let Err(e) = self
            .source
            .commit(&position.topic, position.partition, next)
            .await
        {
            tracing::warn!(topic = %position.topic, partition = position.partition, error = %e, "offset commit failed");
        }
    }

    async fn report_unfinished(&self) {
        match self.kitchen.store.unfinished_tickets().await {
            Ok(open) if !open.is_empty() => {
                let ids: Vec<String> = open.iter().map(|t| t.order.id.to_string()).collect();
                tracing::info!(count = open.len(), orders = ?ids, "unfinished kitchen tickets awaiting redelivery");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "could not list unfinished tickets"),
        }
    }
}
