//! Order endpoints backed by the orchestrator.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use orders::{CustomerId, ItemQuantity, Order, OrderId, OrderStatus, OrderStore};
use serde::Deserialize;
use stock::ReservationStore;

use super::{body, parse_id, require_items};
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: String,
    pub items: Vec<ItemQuantity>,
}

#[derive(Deserialize)]
pub struct PatchStatusRequest {
    pub status: String,
}

// -- Handlers --

/// POST /orders: verifies and books stock, then stores the order as `BOOKED`.
#[tracing::instrument(skip(state, payload))]
pub async fn create<R: ReservationStore + 'static, O: OrderStore + 'static>(
    State(state): State<Arc<AppState<R, O>>>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let req = body(payload)?;
    require_items(&req.items)?;

    let order = state
        .orchestrator
        .create_order(CustomerId::new(req.customer_id), &req.items)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<R: ReservationStore + 'static, O: OrderStore + 'static>(
    State(state): State<Arc<AppState<R, O>>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let id: OrderId = parse_id(&id)?;
    Ok(Json(state.orchestrator.get_order(id).await?))
}

/// GET /customers/{customer_id}/orders: newest first.
#[tracing::instrument(skip(state))]
pub async fn list_for_customer<R: ReservationStore + 'static, O: OrderStore + 'static>(
    State(state): State<Arc<AppState<R, O>>>,
    Path(customer_id): Path<String>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = state
        .orchestrator
        .get_user_orders(&CustomerId::new(customer_id))
        .await?;
    Ok(Json(orders))
}

/// PATCH /orders/{id}/status: operational override, stock is left alone.
#[tracing::instrument(skip(state, payload))]
pub async fn patch_status<R: ReservationStore + 'static, O: OrderStore + 'static>(
    State(state): State<Arc<AppState<R, O>>>,
    Path(id): Path<String>,
    payload: Result<Json<PatchStatusRequest>, JsonRejection>,
) -> Result<Json<Order>, ApiError> {
    let id: OrderId = parse_id(&id)?;
    let status: OrderStatus = body(payload)?.status.parse()?;
    Ok(Json(state.orchestrator.patch_order_status(id, status).await?))
}
