use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use orders::Order;
use serde::{Deserialize, Serialize};

use crate::KitchenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    /// Received and being prepared.
    Accepted,
    /// Prepared; completion has been (or is being) announced.
    Finished,
    /// Given up on for a reason that retrying cannot fix.
    Failed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Accepted => "ACCEPTED",
            TicketStatus::Finished => "FINISHED",
            TicketStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = KitchenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCEPTED" => Ok(TicketStatus::Accepted),
            "FINISHED" => Ok(TicketStatus::Finished),
            "FAILED" => Ok(TicketStatus::Failed),
            other => Err(KitchenError::UnknownStatus(other.to_string())),
        }
    }
}

/// The kitchen's record of one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KitchenTicket {
    /// The order as it was received.
    pub order: Order,
    pub status: TicketStatus,
    pub accepted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<String>,
}

impl KitchenTicket {
    pub(crate) fn accepted(order: Order, now: DateTime<Utc>) -> Self {
        Self {
            order,
            status: TicketStatus::Accepted,
            accepted_at: now,
            finished_at: None,
            failure: None,
        }
    }
}

/// Rejects orders the kitchen cannot prepare.
pub(crate) fn check_order(order: &Order) -> crate::Result<()> {
    order
        .validate()
        .map_err(|e| KitchenError::InvalidOrder(format!("order {}: {e}", order.id)))
}
