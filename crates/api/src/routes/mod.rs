//! HTTP handlers.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod stock;

use std::str::FromStr;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use ::stock::ItemQuantity;

use crate::error::ApiError;

/// Unwraps a JSON body, turning extractor rejections into `{"error": ...}` responses.
pub(crate) fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    Ok(payload?.0)
}

pub(crate) fn parse_id<T: FromStr>(id: &str) -> Result<T, ApiError>
where
    T::Err: std::fmt::Display,
{
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}

/// Rejects an empty item list or a line without an item id.
pub(crate) fn require_items(items: &[ItemQuantity]) -> Result<(), ApiError> {
    if items.is_empty() {
        return Err(ApiError::BadRequest("items must not be empty".into()));
    }
    if items.iter().any(|line| line.item_id.is_blank()) {
        return Err(ApiError::BadRequest("every item needs an item_id".into()));
    }
    Ok(())
}
