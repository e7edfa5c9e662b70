//! HTTP front door for the order fulfillment services.
//!
//! Exposes the reservation engine and the order orchestrator over REST,
//! with structured logging (tracing) and Prometheus metrics. [`runtime`]
//! picks the store and broker backends from [`config::Config`] and runs the
//! background tasks: expiry sweeper, outbox relay and kitchen worker.

pub mod config;
pub mod error;
pub mod routes;
pub mod runtime;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{InMemoryOrderStore, OrderStore};
use saga::OrderOrchestrator;
use stock::{EngineConfig, InMemoryReservationStore, ReservationEngine, ReservationStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// The engine as shared by handlers, the orchestrator and the sweeper.
pub type Engine<R> = Arc<ReservationEngine<R>>;

/// Shared application state accessible from all handlers.
pub struct AppState<R: ReservationStore, O: OrderStore> {
    pub engine: Engine<R>,
    pub orchestrator: Arc<OrderOrchestrator<O, Engine<R>>>,
}

impl<R: ReservationStore, O: OrderStore> AppState<R, O> {
    pub fn new(stock_store: R, order_store: O, engine: EngineConfig) -> Arc<Self> {
        let engine = Arc::new(ReservationEngine::new(stock_store, engine));
        let orchestrator = Arc::new(OrderOrchestrator::new(order_store, engine.clone()));
        Arc::new(Self {
            engine,
            orchestrator,
        })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<R, O>(state: Arc<AppState<R, O>>, metrics_handle: PrometheusHandle) -> Router
where
    R: ReservationStore + 'static,
    O: OrderStore + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/stock/items", post(routes::stock::add::<R, O>))
        .route(
            "/stock/items/{id}",
            get(routes::stock::get::<R, O>).delete(routes::stock::remove::<R, O>),
        )
        .route("/stock/verify", post(routes::stock::verify::<R, O>))
        .route("/stock/bookings", post(routes::stock::book::<R, O>))
        .route("/stock/releases", post(routes::stock::release::<R, O>))
        .route(
            "/stock/orders/{order_id}/finalize",
            post(routes::stock::finalize::<R, O>),
        )
        .route("/orders", post(routes::orders::create::<R, O>))
        .route("/orders/{id}", get(routes::orders::get::<R, O>))
        .route(
            "/orders/{id}/status",
            patch(routes::orders::patch_status::<R, O>),
        )
        .route(
            "/customers/{customer_id}/orders",
            get(routes::orders::list_for_customer::<R, O>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over in-memory stores with the default hold.
pub fn create_default_state() -> Arc<AppState<InMemoryReservationStore, InMemoryOrderStore>> {
    AppState::new(
        InMemoryReservationStore::new(),
        InMemoryOrderStore::new(),
        EngineConfig::default(),
    )
}
