//! Business metrics for the seckill core.
//!
//! Recorded through the `metrics` facade; without an installed recorder every
//! call is a no-op.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `seckill_participations_total{outcome}` - Participation attempts by outcome
//! - `seckill_units_reserved_total` - Units taken from stock
//! - `seckill_units_released_total` - Units given back to stock
//! - `seckill_orders_total{status}` - Order transitions by resulting status
//! - `seckill_publish_failures_total` - Events the publisher rejected
//!
//! ## Histograms
//! - `seckill_lock_wait_seconds` - Time spent acquiring an activity lock

use crate::error::SeckillError;
use crate::types::OrderStatus;
use metrics::{describe_counter, describe_histogram};
use std::time::Duration;

/// Register all metric descriptions.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "seckill_participations_total",
        "Participation attempts by outcome (reserved, insufficient_stock, lock_timeout, invalid, persistence_error)"
    );
    describe_counter!(
        "seckill_units_reserved_total",
        "Total units reserved from activity stock"
    );
    describe_counter!(
        "seckill_units_released_total",
        "Total units released back to activity stock"
    );
    describe_counter!(
        "seckill_orders_total",
        "Order transitions by resulting status (pending, paid, cancelled, expired)"
    );
    describe_counter!(
        "seckill_publish_failures_total",
        "Domain events the publisher failed to accept"
    );
    describe_histogram!(
        "seckill_lock_wait_seconds",
        "Time spent waiting for an activity lock"
    );

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record the outcome of one `participate` call.
pub fn record_participation(result: Result<u32, &SeckillError>) {
    let outcome = match result {
        Ok(quantity) => {
            metrics::counter!("seckill_units_reserved_total").increment(u64::from(quantity));
            "reserved"
        }
        Err(SeckillError::InsufficientStock { .. }) => "insufficient_stock",
        Err(SeckillError::LockTimeout { .. }) => "lock_timeout",
        Err(SeckillError::Validation(_)) => "invalid",
        Err(SeckillError::Persistence(_)) => "persistence_error",
    };
    metrics::counter!("seckill_participations_total", "outcome" => outcome).increment(1);
}

/// Record units given back to stock.
pub fn record_units_released(quantity: u32) {
    metrics::counter!("seckill_units_released_total").increment(u64::from(quantity));
}

/// Record an order reaching `status`.
pub fn record_order_transition(status: OrderStatus) {
    let label = match status {
        OrderStatus::Pending => "pending",
        OrderStatus::Paid => "paid",
        OrderStatus::Cancelled => "cancelled",
        OrderStatus::Expired => "expired",
    };
    metrics::counter!("seckill_orders_total", "status" => label).increment(1);
}

/// Record how long a lock acquisition took (successful or not).
pub fn record_lock_wait(waited: Duration) {
    metrics::histogram!("seckill_lock_wait_seconds").record(waited.as_secs_f64());
}

/// Record an event the publisher rejected.
pub fn record_publish_failure() {
    metrics::counter!("seckill_publish_failures_total").increment(1);
}
