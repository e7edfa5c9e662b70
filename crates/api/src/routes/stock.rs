//! Reservation engine endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use orders::OrderStore;
use serde::{Deserialize, Serialize};
use stock::{
    Booking, ItemId, ItemMetadata, ItemQuantity, OrderId, ReservationStore, StockItem, StockLevel,
    VerifyReport,
};

use super::{body, parse_id, require_items};
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct AddStockRequest {
    pub item_id: String,
    pub quantity: i64,
    #[serde(flatten)]
    pub metadata: ItemMetadata,
}

#[derive(Deserialize)]
pub struct ItemsRequest {
    pub items: Vec<ItemQuantity>,
}

#[derive(Deserialize)]
pub struct BookRequest {
    #[serde(default)]
    pub order_id: Option<OrderId>,
    pub items: Vec<ItemQuantity>,
}

/// A quantity of zero or less releases everything held for the item.
#[derive(Deserialize)]
pub struct ReleaseRequest {
    #[serde(default)]
    pub order_id: Option<OrderId>,
    pub items: Vec<ItemQuantity>,
}

// -- Response types --

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub released: Vec<ItemQuantity>,
}

#[derive(Serialize)]
pub struct FinalizeResponse {
    pub order_id: OrderId,
    pub deducted: Vec<ItemQuantity>,
}

// -- Handlers --

/// POST /stock/items: adds stock to an item, creating it if needed.
#[tracing::instrument(skip(state, payload))]
pub async fn add<R: ReservationStore + 'static, O: OrderStore + 'static>(
    State(state): State<Arc<AppState<R, O>>>,
    payload: Result<Json<AddStockRequest>, JsonRejection>,
) -> Result<Json<StockItem>, ApiError> {
    let req = body(payload)?;
    let item = state
        .engine
        .add_stock(&ItemId::new(req.item_id), req.quantity, req.metadata)
        .await?;
    Ok(Json(item))
}

/// GET /stock/items/{id}
#[tracing::instrument(skip(state))]
pub async fn get<R: ReservationStore + 'static, O: OrderStore + 'static>(
    State(state): State<Arc<AppState<R, O>>>,
    Path(id): Path<String>,
) -> Result<Json<StockLevel>, ApiError> {
    Ok(Json(state.engine.get_stock_item(&ItemId::new(id)).await?))
}

/// DELETE /stock/items/{id}: refused with 409 while the item is booked.
#[tracing::instrument(skip(state))]
pub async fn remove<R: ReservationStore + 'static, O: OrderStore + 'static>(
    State(state): State<Arc<AppState<R, O>>>,
    Path(id): Path<String>,
) -> Result<Json<StockItem>, ApiError> {
    Ok(Json(state.engine.remove_stock_item(&ItemId::new(id)).await?))
}

/// POST /stock/verify
#[tracing::instrument(skip(state, payload))]
pub async fn verify<R: ReservationStore + 'static, O: OrderStore + 'static>(
    State(state): State<Arc<AppState<R, O>>>,
    payload: Result<Json<ItemsRequest>, JsonRejection>,
) -> Result<Json<VerifyReport>, ApiError> {
    let req = body(payload)?;
    require_items(&req.items)?;
    Ok(Json(state.engine.verify_stock(&req.items).await?))
}

/// POST /stock/bookings: all lines are booked or none.
#[tracing::instrument(skip(state, payload))]
pub async fn book<R: ReservationStore + 'static, O: OrderStore + 'static>(
    State(state): State<Arc<AppState<R, O>>>,
    payload: Result<Json<BookRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Vec<Booking>>), ApiError> {
    let req = body(payload)?;
    require_items(&req.items)?;
    let bookings = state.engine.book(&req.items, req.order_id).await?;
    Ok((StatusCode::CREATED, Json(bookings)))
}

/// POST /stock/releases
#[tracing::instrument(skip(state, payload))]
pub async fn release<R: ReservationStore + 'static, O: OrderStore + 'static>(
    State(state): State<Arc<AppState<R, O>>>,
    payload: Result<Json<ReleaseRequest>, JsonRejection>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let req = body(payload)?;
    require_items(&req.items)?;
    let released = state.engine.release(&req.items, req.order_id).await?;
    Ok(Json(ReleaseResponse { released }))
}

/// POST /stock/orders/{order_id}/finalize: 404 once the bookings are gone.
#[tracing::instrument(skip(state))]
pub async fn finalize<R: ReservationStore + 'static, O: OrderStore + 'static>(
    State(state): State<Arc<AppState<R, O>>>,
    Path(order_id): Path<String>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    let order_id: OrderId = parse_id(&order_id)?;
    let deducted = state.engine.finalize(order_id).await?;
    Ok(Json(FinalizeResponse { order_id, deducted }))
}
