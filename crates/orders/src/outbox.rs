//! Messages stored next to order rows and relayed to the bus afterwards.

use chrono::{DateTime, Utc};
use common::topics;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Order, Result};

/// A message waiting to be published.
///
/// Written in the same transaction as the order change it describes, so a
/// crash between the write and the publish cannot lose the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// The "orders.created" announcement for a freshly booked order.
    pub fn order_created(order: &Order) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            topic: topics::ORDERS_CREATED.to_string(),
            key: order.id.to_string(),
            payload: serde_json::to_value(order)?,
            created_at: order.updated_at,
        })
    }

    /// The payload as bytes, ready for the bus.
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.payload)?)
    }
}
