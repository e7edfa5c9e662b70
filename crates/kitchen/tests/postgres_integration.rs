//! PostgreSQL integration tests for the kitchen store.
//!
//! ```bash
//! cargo test -p kitchen --test postgres_integration -- --ignored
//! ```

use std::sync::Arc;

use chrono::Utc;
use kitchen::{KitchenError, KitchenStore, OrderId, PostgresKitchenStore, TicketStatus};
use orders::{CustomerId, ItemQuantity, Order};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresKitchenStore::new(pool.clone())
                .run_migrations()
                .await
                .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresKitchenStore {
    let info = get_container_info().await;
    let pool = PgPool::connect(&info.connection_string).await.unwrap();
    sqlx::query("TRUNCATE TABLE kitchen_tickets")
        .execute(&pool)
        .await
        .unwrap();
    PostgresKitchenStore::new(pool)
}

fn order() -> Order {
    Order::new(
        CustomerId::new("customer-1"),
        &[ItemQuantity::new("SKU-1", 2)],
        Utc::now(),
    )
    .unwrap()
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn accept_is_idempotent_and_keeps_the_order() {
    let store = get_test_store().await;
    let order = order();

    let first = store.accept_order(&order, Utc::now()).await.unwrap();
    let second = store.accept_order(&order, Utc::now()).await.unwrap();

    assert_eq!(first.status, TicketStatus::Accepted);
    assert_eq!(first.accepted_at, second.accepted_at);
    assert_eq!(second.order.id, order.id);
    assert_eq!(second.order.items, order.items);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn invalid_order_is_rejected() {
    let store = get_test_store().await;
    let mut order = order();
    order.items[0].quantity = 0;

    let result = store.accept_order(&order, Utc::now()).await;

    assert!(matches!(result, Err(KitchenError::InvalidOrder(_))));
    assert!(store.get(order.id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn finish_and_fail_lifecycle() {
    let store = get_test_store().await;
    let done = order();
    let broken = order();
    store.accept_order(&done, Utc::now()).await.unwrap();
    store.accept_order(&broken, Utc::now()).await.unwrap();
    assert_eq!(store.unfinished_tickets().await.unwrap().len(), 2);

    let finished = store.finish_order(done.id, Utc::now()).await.unwrap();
    assert_eq!(finished.status, TicketStatus::Finished);
    assert!(finished.finished_at.is_some());
    // Finishing again keeps the first completion time.
    let again = store.finish_order(done.id, Utc::now()).await.unwrap();
    assert_eq!(again.finished_at, finished.finished_at);

    let failed = store
        .fail_order(broken.id, "no active bookings", Utc::now())
        .await
        .unwrap();
    assert_eq!(failed.status, TicketStatus::Failed);
    assert_eq!(failed.failure.as_deref(), Some("no active bookings"));

    assert!(store.unfinished_tickets().await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn finish_unknown_is_not_found() {
    let store = get_test_store().await;
    let result = store.finish_order(OrderId::new(), Utc::now()).await;
    assert!(matches!(result, Err(KitchenError::TicketNotFound(_))));
}
