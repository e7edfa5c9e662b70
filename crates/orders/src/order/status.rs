//! Order status machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::OrderError;

/// The status of an order in its lifecycle.
///
/// ```text
/// Pending ──► Booked ──► Processing ──► Finalized ──► Finished
///    │           │            │              │
///    └───────────┴────────────┴──────────────┴──► Cancelled
/// ```
///
/// `Finished` and `Cancelled` are terminal. Operational corrections may
/// jump between non-terminal statuses, but never back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Validated, stock not yet held.
    #[default]
    Pending,

    /// Stock is booked for the order.
    Booked,

    /// Accepted by fulfillment, preparation under way.
    Processing,

    /// Booked stock has been deducted permanently.
    Finalized,

    /// Fulfillment complete (terminal state).
    Finished,

    /// Abandoned or compensated (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Finished | OrderStatus::Cancelled)
    }

    /// Returns true if fulfillment may start from this status.
    pub fn can_start_processing(&self) -> bool {
        matches!(self, OrderStatus::Booked)
    }

    /// Returns true if the stock deduction has already happened.
    pub fn is_finalized(&self) -> bool {
        matches!(self, OrderStatus::Finalized | OrderStatus::Finished)
    }

    /// Returns true if the order can be cancelled from this status.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if a direct change to `next` is allowed.
    ///
    /// Re-applying the current status is always allowed (a no-op).
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next != OrderStatus::Pending
    }

    /// Returns the status name as used on the wire and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Booked => "BOOKED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Finalized => "FINALIZED",
            OrderStatus::Finished => "FINISHED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "BOOKED" => Ok(OrderStatus::Booked),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "FINALIZED" => Ok(OrderStatus::Finalized),
            "FINISHED" => Ok(OrderStatus::Finished),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            _ => Err(OrderError::UnknownStatus(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Finished.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Booked.is_terminal());
        assert!(!OrderStatus::Finalized.is_terminal());
    }

    #[test]
    fn test_terminal_statuses_only_accept_themselves() {
        for next in [
            OrderStatus::Pending,
            OrderStatus::Booked,
            OrderStatus::Processing,
            OrderStatus::Finalized,
            OrderStatus::Cancelled,
        ] {
            assert!(!OrderStatus::Finished.can_transition_to(next));
        }
        assert!(OrderStatus::Finished.can_transition_to(OrderStatus::Finished));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Booked));
    }

    #[test]
    fn test_never_back_to_pending() {
        assert!(!OrderStatus::Booked.can_transition_to(OrderStatus::Pending));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn test_forward_path_allowed() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Booked));
        assert!(OrderStatus::Booked.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Finalized));
        assert!(OrderStatus::Finalized.can_transition_to(OrderStatus::Finished));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_string(&OrderStatus::Finalized).unwrap();
        assert_eq!(json, "\"FINALIZED\"");
        let parsed: OrderStatus = serde_json::from_str("\"BOOKED\"").unwrap();
        assert_eq!(parsed, OrderStatus::Booked);
    }

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!(
            "processing".parse::<OrderStatus>().unwrap(),
            OrderStatus::Processing
        );
        assert!(matches!(
            "SHIPPED".parse::<OrderStatus>(),
            Err(OrderError::UnknownStatus(_))
        ));
    }
}
