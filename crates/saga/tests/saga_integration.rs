//! Integration tests for the order saga.

use std::sync::Arc;

use common::{ManualClock, topics};
use messaging::InMemoryBroker;
use orders::{CustomerId, InMemoryOrderStore, ItemQuantity, Order, OrderStatus};
use saga::{OrderOrchestrator, OutboxRelay, RelayConfig, SagaError};
use stock::{EngineConfig, InMemoryReservationStore, ItemId, ItemMetadata, ReservationEngine};

type Engine = Arc<ReservationEngine<InMemoryReservationStore>>;

struct TestHarness {
    orchestrator: Arc<OrderOrchestrator<InMemoryOrderStore, Engine>>,
    orders: InMemoryOrderStore,
    engine: Engine,
    broker: InMemoryBroker,
    clock: ManualClock,
}

impl TestHarness {
    fn new() -> Self {
        let clock = ManualClock::default();
        let orders = InMemoryOrderStore::new();
        let engine = Arc::new(ReservationEngine::with_clock(
            InMemoryReservationStore::new(),
            EngineConfig::default(),
            Arc::new(clock.clone()),
        ));
        let orchestrator = Arc::new(OrderOrchestrator::with_clock(
            orders.clone(),
            engine.clone(),
            Arc::new(clock.clone()),
        ));

        Self {
            orchestrator,
            orders,
            engine,
            broker: InMemoryBroker::new(),
            clock,
        }
    }

    async fn stock(&self, item: &str, quantity: i64) {
        self.engine
            .add_stock(&ItemId::new(item), quantity, ItemMetadata::default())
            .await
            .unwrap();
    }

    fn relay(&self) -> OutboxRelay<InMemoryOrderStore, InMemoryBroker> {
        OutboxRelay::new(
            self.orders.clone(),
            self.broker.clone(),
            RelayConfig::default(),
        )
    }

    async fn level(&self, item: &str) -> (i64, i64, i64) {
        let level = self.engine.get_stock_item(&ItemId::new(item)).await.unwrap();
        (level.item.quantity, level.available, level.booked)
    }
}

fn customer() -> CustomerId {
    CustomerId::new("customer-42")
}

#[tokio::test]
async fn test_order_lifecycle_deducts_stock_once() {
    let h = TestHarness::new();
    h.stock("X", 10).await;

    let order = h
        .orchestrator
        .create_order(customer(), &[ItemQuantity::new("X", 4)])
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Booked);
    assert_eq!(h.level("X").await, (10, 6, 4));

    h.orchestrator.start_processing(order.id).await.unwrap();
    h.orchestrator.finalize_order(order.id).await.unwrap();
    let outcome = h.orchestrator.finish_order(order.id).await.unwrap();

    assert_eq!(outcome.order.status, OrderStatus::Finished);
    assert_eq!(h.level("X").await, (6, 6, 0));
    assert!(h.engine.bookings_for_order(order.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_finalize_retry_after_failed_status_write_completes_order() {
    let h = TestHarness::new();
    h.stock("X", 10).await;
    let order = h
        .orchestrator
        .create_order(customer(), &[ItemQuantity::new("X", 4)])
        .await
        .unwrap();
    h.orchestrator.start_processing(order.id).await.unwrap();

    h.orders.fail_next_status_updates(1);
    let first = h.orchestrator.finalize_order(order.id).await;
    let err = first.unwrap_err();
    assert!(err.is_transient());
    // The deduction committed even though the status write did not.
    assert_eq!(h.level("X").await, (6, 6, 0));

    let retried = h.orchestrator.finalize_order(order.id).await.unwrap();
    assert_eq!(retried.status, OrderStatus::Finalized);
    assert_eq!(h.level("X").await, (6, 6, 0));

    let outcome = h.orchestrator.finish_order(order.id).await.unwrap();
    assert!(!outcome.already_finished);
    assert_eq!(outcome.order.status, OrderStatus::Finished);
}

#[tokio::test]
async fn test_persist_failure_leaves_no_active_bookings() {
    let h = TestHarness::new();
    h.stock("X", 10).await;
    h.stock("Y", 3).await;
    h.orders.set_fail_on_insert(true);

    let result = h
        .orchestrator
        .create_order(
            customer(),
            &[ItemQuantity::new("X", 4), ItemQuantity::new("Y", 3)],
        )
        .await;

    assert!(result.unwrap_err().is_transient());
    assert_eq!(h.level("X").await, (10, 10, 0));
    assert_eq!(h.level("Y").await, (3, 3, 0));
    assert!(
        h.engine
            .bookings_for_item(&ItemId::new("X"))
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(h.orders.order_count().await, 0);
}

#[tokio::test]
async fn test_compensation_leaves_other_orders_bookings() {
    let h = TestHarness::new();
    h.stock("X", 10).await;

    let kept = h
        .orchestrator
        .create_order(customer(), &[ItemQuantity::new("X", 3)])
        .await
        .unwrap();

    h.orders.set_fail_on_insert(true);
    h.orchestrator
        .create_order(customer(), &[ItemQuantity::new("X", 2)])
        .await
        .unwrap_err();

    let bookings = h.engine.bookings_for_order(kept.id).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].quantity, 3);
    assert_eq!(h.level("X").await, (10, 7, 3));
}

#[tokio::test]
async fn test_unknown_item_is_insufficient() {
    let h = TestHarness::new();

    let result = h
        .orchestrator
        .create_order(customer(), &[ItemQuantity::new("NOPE", 1)])
        .await;

    match result {
        Err(SagaError::InsufficientStock { items }) => {
            assert_eq!(items, vec![ItemQuantity::new("NOPE", 1)]);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_orders_never_oversell() {
    let h = TestHarness::new();
    h.stock("X", 10).await;

    let mut handles = Vec::new();
    for _ in 0..30 {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .create_order(customer(), &[ItemQuantity::new("X", 1)])
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(SagaError::InsufficientStock { .. }) | Err(SagaError::Stock(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(created, 10);
    assert_eq!(h.level("X").await, (10, 0, 10));
}

#[tokio::test]
async fn test_expired_hold_cannot_be_finalized() {
    let h = TestHarness::new();
    h.stock("X", 5).await;
    let order = h
        .orchestrator
        .create_order(customer(), &[ItemQuantity::new("X", 5)])
        .await
        .unwrap();
    h.orchestrator.start_processing(order.id).await.unwrap();

    h.clock.advance(chrono::Duration::minutes(16));
    let result = h.orchestrator.finalize_order(order.id).await;

    assert!(result.unwrap_err().is_not_found());
    assert_eq!(h.level("X").await, (5, 5, 0));
    let stored = h.orchestrator.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Processing);
}

#[tokio::test]
async fn test_relay_announces_booked_order() {
    let h = TestHarness::new();
    h.stock("X", 10).await;
    let order = h
        .orchestrator
        .create_order(customer(), &[ItemQuantity::new("X", 2)])
        .await
        .unwrap();

    h.relay().relay_pending().await.unwrap();

    let published = h.broker.published(topics::ORDERS_CREATED).await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key.as_deref(), Some(order.id.to_string().as_str()));
    let announced: Order = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(announced, order);
    assert_eq!(announced.status, OrderStatus::Booked);
}

#[tokio::test]
async fn test_failed_create_announces_nothing() {
    let h = TestHarness::new();
    h.stock("X", 1).await;

    h.orchestrator
        .create_order(customer(), &[ItemQuantity::new("X", 2)])
        .await
        .unwrap_err();
    h.relay().relay_pending().await.unwrap();

    assert!(h.broker.published(topics::ORDERS_CREATED).await.is_empty());
}
