//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kitchen::KitchenError;
use messaging::BusError;
use orders::OrderError;
use saga::SagaError;
use stock::{ItemQuantity, StockError};
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Reservation engine error.
    Stock(StockError),
    /// Order rule or order store error.
    Order(OrderError),
    /// Orchestration error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut missing: Option<Vec<ItemQuantity>> = None;
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Stock(err) => stock_error_to_response(err),
            ApiError::Order(err) => order_error_to_response(err),
            ApiError::Saga(SagaError::InsufficientStock { items }) => {
                let message = format!("Insufficient stock for {} item(s)", items.len());
                missing = Some(items);
                (StatusCode::CONFLICT, message)
            }
            ApiError::Saga(SagaError::Stock(err)) => stock_error_to_response(err),
            ApiError::Saga(SagaError::Order(err)) => order_error_to_response(err),
            ApiError::Saga(err) => internal(err.to_string()),
        };

        let body = match missing {
            Some(items) => serde_json::json!({
                "error": message,
                "missing_or_insufficient": items,
            }),
            None => serde_json::json!({ "error": message }),
        };
        (status, axum::Json(body)).into_response()
    }
}

fn internal(message: String) -> (StatusCode, String) {
    metrics::counter!("http_internal_errors_total").increment(1);
    tracing::error!(error = %message, "internal server error");
    (StatusCode::INTERNAL_SERVER_ERROR, message)
}

fn stock_error_to_response(err: StockError) -> (StatusCode, String) {
    match &err {
        StockError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        StockError::InsufficientStock { .. } | StockError::ActiveBookings { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        StockError::ItemNotFound(_) | StockError::NoActiveBookings(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        StockError::Database(_) | StockError::Migration(_) => internal(err.to_string()),
    }
}

fn order_error_to_response(err: OrderError) -> (StatusCode, String) {
    match &err {
        e if e.is_validation() => (StatusCode::BAD_REQUEST, err.to_string()),
        OrderError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        OrderError::InvalidStatusTransition { .. }
        | OrderError::Conflict { .. }
        | OrderError::AlreadyExists(_) => (StatusCode::CONFLICT, err.to_string()),
        _ => internal(err.to_string()),
    }
}

impl From<StockError> for ApiError {
    fn from(err: StockError) -> Self {
        ApiError::Stock(err)
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Errors that stop the process before it starts serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to connect to database: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Kitchen(#[from] KitchenError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use orders::OrderStatus;
    use stock::{ItemId, OrderId};

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn validation_errors_are_bad_requests() {
        assert_eq!(
            status_of(StockError::Validation("no items requested".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(OrderError::NoItems), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(SagaError::Order(OrderError::CustomerIdRequired)),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn conflicts_map_to_409() {
        assert_eq!(
            status_of(SagaError::InsufficientStock { items: vec![] }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(StockError::ActiveBookings {
                item_id: ItemId::new("SKU-1"),
                booked: 2,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OrderError::InvalidStatusTransition {
                current: OrderStatus::Finished,
                requested: OrderStatus::Booked,
            }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(
            status_of(SagaError::Stock(StockError::NoActiveBookings(OrderId::new()))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(OrderError::NotFound(OrderId::new())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn infrastructure_errors_are_internal() {
        assert_eq!(
            status_of(OrderError::Unavailable("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(SagaError::Bus(BusError::Publish("timeout".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
