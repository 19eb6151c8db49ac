//! Domain events emitted by the seckill aggregates.
//!
//! Aggregates append these to a private buffer while handling an operation.
//! The coordinator drains the buffer after the unit of work commits and
//! forwards each event to the configured
//! [`EventPublisher`](flashsale_core::publisher::EventPublisher).

use crate::types::{ActivityId, EndReason, Money, OrderId, ProductId, UserId};
use chrono::{DateTime, Utc};
use flashsale_core::event::{Event, EventError, SerializedEvent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Topic for activity lifecycle and stock events
pub const ACTIVITY_TOPIC: &str = "seckill-activity-events";

/// Topic for order lifecycle events
pub const ORDER_TOPIC: &str = "seckill-order-events";

/// Aggregate an event belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateId {
    /// A [`SeckillActivity`](crate::aggregates::SeckillActivity)
    Activity(ActivityId),
    /// A [`SeckillOrder`](crate::aggregates::SeckillOrder)
    Order(OrderId),
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Activity(id) => write!(f, "activity:{id}"),
            Self::Order(id) => write!(f, "order:{id}"),
        }
    }
}

/// Everything that can happen to an activity or an order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeckillEvent {
    /// Activity was created in `Pending` status
    ActivityCreated {
        /// Activity ID
        activity_id: ActivityId,
        /// Product on sale
        product_id: ProductId,
        /// Units available in this sale
        total_stock: u32,
        /// Discounted unit price
        seckill_price: Money,
        /// When it happened
        occurred_at: DateTime<Utc>,
    },
    /// Activity opened for participation
    ActivityStarted {
        /// Activity ID
        activity_id: ActivityId,
        /// When it happened
        occurred_at: DateTime<Utc>,
    },
    /// Activity closed
    ActivityEnded {
        /// Activity ID
        activity_id: ActivityId,
        /// Units sold at close
        sold: u32,
        /// Units left at close
        remaining: u32,
        /// Manual end or sell-out
        reason: EndReason,
        /// When it happened
        occurred_at: DateTime<Utc>,
    },
    /// Units were taken from remaining stock
    StockReserved {
        /// Activity ID
        activity_id: ActivityId,
        /// Units reserved
        quantity: u32,
        /// Remaining stock after the reservation
        remaining: u32,
        /// When it happened
        occurred_at: DateTime<Utc>,
    },
    /// Units were given back to remaining stock
    StockReleased {
        /// Activity ID
        activity_id: ActivityId,
        /// Units released
        quantity: u32,
        /// Remaining stock after the release
        remaining: u32,
        /// When it happened
        occurred_at: DateTime<Utc>,
    },
    /// Order created for a successful reservation
    OrderCreated {
        /// Order ID
        order_id: OrderId,
        /// Activity the stock came from
        activity_id: ActivityId,
        /// Buyer
        user_id: UserId,
        /// Units bought
        quantity: u32,
        /// Unit price times quantity
        total_amount: Money,
        /// When it happened
        occurred_at: DateTime<Utc>,
    },
    /// Payment confirmed
    OrderPaid {
        /// Order ID
        order_id: OrderId,
        /// Activity the stock came from
        activity_id: ActivityId,
        /// Amount paid
        amount: Money,
        /// When it happened
        occurred_at: DateTime<Utc>,
    },
    /// Buyer cancelled a pending order
    OrderCancelled {
        /// Order ID
        order_id: OrderId,
        /// Activity whose stock may be released
        activity_id: ActivityId,
        /// Units to release
        quantity: u32,
        /// When it happened
        occurred_at: DateTime<Utc>,
    },
    /// Pending order was not paid in time
    OrderExpired {
        /// Order ID
        order_id: OrderId,
        /// Activity whose stock may be released
        activity_id: ActivityId,
        /// Units to release
        quantity: u32,
        /// When it happened
        occurred_at: DateTime<Utc>,
    },
}

impl SeckillEvent {
    /// The aggregate that emitted this event
    #[must_use]
    pub const fn aggregate_id(&self) -> AggregateId {
        match self {
            Self::ActivityCreated { activity_id, .. }
            | Self::ActivityStarted { activity_id, .. }
            | Self::ActivityEnded { activity_id, .. }
            | Self::StockReserved { activity_id, .. }
            | Self::StockReleased { activity_id, .. } => AggregateId::Activity(*activity_id),
            Self::OrderCreated { order_id, .. }
            | Self::OrderPaid { order_id, .. }
            | Self::OrderCancelled { order_id, .. }
            | Self::OrderExpired { order_id, .. } => AggregateId::Order(*order_id),
        }
    }

    /// When the event happened
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::ActivityCreated { occurred_at, .. }
            | Self::ActivityStarted { occurred_at, .. }
            | Self::ActivityEnded { occurred_at, .. }
            | Self::StockReserved { occurred_at, .. }
            | Self::StockReleased { occurred_at, .. }
            | Self::OrderCreated { occurred_at, .. }
            | Self::OrderPaid { occurred_at, .. }
            | Self::OrderCancelled { occurred_at, .. }
            | Self::OrderExpired { occurred_at, .. } => *occurred_at,
        }
    }

    /// Publisher topic for this event
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self.aggregate_id() {
            AggregateId::Activity(_) => ACTIVITY_TOPIC,
            AggregateId::Order(_) => ORDER_TOPIC,
        }
    }

    /// Serialize for publishing, with the aggregate id and timestamp as metadata
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if bincode encoding fails.
    pub fn to_serialized(&self) -> Result<SerializedEvent, EventError> {
        let metadata = serde_json::json!({
            "aggregate_id": self.aggregate_id().to_string(),
            "occurred_at": self.occurred_at().to_rfc3339(),
        });
        SerializedEvent::from_event(self, Some(metadata))
    }
}

impl Event for SeckillEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::ActivityCreated { .. } => "ActivityCreated.v1",
            Self::ActivityStarted { .. } => "ActivityStarted.v1",
            Self::ActivityEnded { .. } => "ActivityEnded.v1",
            Self::StockReserved { .. } => "StockReserved.v1",
            Self::StockReleased { .. } => "StockReleased.v1",
            Self::OrderCreated { .. } => "OrderCreated.v1",
            Self::OrderPaid { .. } => "OrderPaid.v1",
            Self::OrderCancelled { .. } => "OrderCancelled.v1",
            Self::OrderExpired { .. } => "OrderExpired.v1",
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;
    use flashsale_testing::test_clock;
    use flashsale_core::environment::Clock;

    #[test]
    fn topics_follow_the_aggregate() {
        let now = test_clock().now();
        let activity_id = ActivityId::new();

        let reserved = SeckillEvent::StockReserved {
            activity_id,
            quantity: 1,
            remaining: 9,
            occurred_at: now,
        };
        let paid = SeckillEvent::OrderPaid {
            order_id: OrderId::new(),
            activity_id,
            amount: Money::from_cents(100),
            occurred_at: now,
        };

        assert_eq!(reserved.topic(), ACTIVITY_TOPIC);
        assert_eq!(paid.topic(), ORDER_TOPIC);
        assert_eq!(reserved.aggregate_id(), AggregateId::Activity(activity_id));
        assert_eq!(reserved.event_type(), "StockReserved.v1");
    }

    #[test]
    fn serialized_event_decodes_back_with_metadata() {
        let event = SeckillEvent::ActivityEnded {
            activity_id: ActivityId::new(),
            sold: 10,
            remaining: 0,
            reason: EndReason::SoldOut,
            occurred_at: test_clock().now(),
        };

        let serialized = event.to_serialized().expect("serialization should succeed");
        assert_eq!(serialized.event_type, "ActivityEnded.v1");

        let metadata = serialized.metadata.clone().expect("metadata present");
        assert_eq!(
            metadata["aggregate_id"],
            serde_json::Value::String(event.aggregate_id().to_string())
        );

        let decoded = SeckillEvent::from_bytes(&serialized.data).expect("decodes");
        assert_eq!(decoded, event);
    }
}
