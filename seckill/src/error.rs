//! Error taxonomy for the seckill core.
//!
//! Four kinds reach callers, and only one of them is worth retrying:
//!
//! | Kind | Retry? |
//! |------|--------|
//! | [`SeckillError::Validation`] | never, the request or the state is wrong |
//! | [`SeckillError::InsufficientStock`] | not with the same quantity |
//! | [`SeckillError::LockTimeout`] | yes, with backoff |
//! | [`SeckillError::Persistence`] | no, the attempt was rolled back |

use crate::types::{ActivityId, ActivityStatus, Money, OrderId, OrderStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Caller supplied invalid data, or invoked an operation the current state does not allow
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Activity name is empty after trimming
    #[error("Activity name must not be empty")]
    NameEmpty,

    /// Activity name is outside the allowed length
    #[error("Activity name must be between {min} and {max} characters, got {actual}")]
    NameLength {
        /// Trimmed length in characters
        actual: usize,
        /// Minimum length
        min: usize,
        /// Maximum length
        max: usize,
    },

    /// A price is zero
    #[error("{field} must be positive")]
    NonPositivePrice {
        /// Which price
        field: &'static str,
    },

    /// Seckill price is not strictly below the original price
    #[error("Seckill price {seckill} must be lower than original price {original}")]
    PriceNotDiscounted {
        /// Original price
        original: Money,
        /// Offered seckill price
        seckill: Money,
    },

    /// Total stock is zero
    #[error("Total stock must be greater than zero")]
    ZeroStock,

    /// End time is not after start time
    #[error("End time {end} must be after start time {start}")]
    InvalidWindow {
        /// Start of the sale window
        start: DateTime<Utc>,
        /// End of the sale window
        end: DateTime<Utc>,
    },

    /// Quantity is zero
    #[error("Quantity must be greater than zero")]
    ZeroQuantity,

    /// Release would give back more than was sold
    #[error("Cannot release {requested} units, only {sold} sold")]
    ReleaseExceedsSold {
        /// Units to release
        requested: u32,
        /// Units currently sold
        sold: u32,
    },

    /// An identifier is blank
    #[error("{field} must not be empty")]
    EmptyIdentifier {
        /// Which identifier
        field: &'static str,
    },

    /// Unit price times quantity does not fit
    #[error("Order amount overflows")]
    AmountOverflow,

    /// Activity status does not allow the operation
    #[error("Cannot {action} activity in status {from}")]
    InvalidActivityTransition {
        /// Current status
        from: ActivityStatus,
        /// Attempted operation
        action: &'static str,
    },

    /// Order status does not allow the operation
    #[error("Cannot {action} order in status {from}")]
    InvalidOrderTransition {
        /// Current status
        from: OrderStatus,
        /// Attempted operation
        action: &'static str,
    },

    /// Activity is not accepting participation (wrong status or outside its window)
    #[error("Activity {activity_id} is not open for participation (status {status})")]
    ActivityNotOpen {
        /// Activity ID
        activity_id: ActivityId,
        /// Status at the time of the request
        status: ActivityStatus,
    },

    /// No activity with this ID
    #[error("Activity {0} not found")]
    ActivityNotFound(ActivityId),

    /// No order with this ID
    #[error("Order {0} not found")]
    OrderNotFound(OrderId),
}

/// Every failure the seckill core reports
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeckillError {
    /// Invalid request or state
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Not enough remaining stock; nothing was decremented
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        /// Units requested
        requested: u32,
        /// Units remaining
        available: u32,
    },

    /// Activity lock not acquired within the bounded wait
    #[error("Timed out after {waited:?} waiting for lock '{key}'")]
    LockTimeout {
        /// Lock key
        key: String,
        /// Time spent waiting
        waited: Duration,
    },

    /// Unit of work failed to commit; nothing was persisted
    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl SeckillError {
    /// True only for transient conditions worth retrying with backoff
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

/// Convenience alias
pub type Result<T, E = SeckillError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lock_timeout_is_retryable() {
        let timeout = SeckillError::LockTimeout {
            key: "seckill:lock:activity:1".to_string(),
            waited: Duration::from_millis(10),
        };
        let stock = SeckillError::InsufficientStock {
            requested: 6,
            available: 5,
        };

        assert!(timeout.is_retryable());
        assert!(!stock.is_retryable());
        assert!(!SeckillError::Persistence("disk full".to_string()).is_retryable());
        assert!(!SeckillError::from(ValidationError::ZeroQuantity).is_retryable());
    }

    #[test]
    fn validation_messages_name_the_rule() {
        let error = ValidationError::PriceNotDiscounted {
            original: Money::from_cents(1000),
            seckill: Money::from_cents(1000),
        };
        assert_eq!(
            error.to_string(),
            "Seckill price 10.00 must be lower than original price 10.00"
        );

        let error = ValidationError::InvalidOrderTransition {
            from: OrderStatus::Paid,
            action: "pay",
        };
        assert_eq!(error.to_string(), "Cannot pay order in status paid");
    }
}
