//! Seckill order aggregate.
//!
//! An order only exists because stock was reserved for it, so construction is
//! crate-private and performed by the coordinator right after
//! [`SeckillActivity::reserve_stock`](super::SeckillActivity::reserve_stock)
//! succeeds.
//!
//! ```text
//!          ┌──pay────▶ Paid
//! Pending ─┼──cancel─▶ Cancelled
//!          └──expire─▶ Expired
//! ```
//!
//! Cancelling or expiring does not touch the activity. Giving the units back is
//! a separate, explicit release step.

use crate::error::ValidationError;
use crate::events::SeckillEvent;
use crate::types::{ActivityId, Money, OrderId, OrderStatus, ProductId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One buyer's successful reservation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillOrder {
    id: OrderId,
    user_id: UserId,
    activity_id: ActivityId,
    product_id: ProductId,
    quantity: u32,
    unit_price: Money,
    total_amount: Money,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped on every committed write
    version: u64,
    #[serde(skip)]
    events: SmallVec<[SeckillEvent; 2]>,
}

impl SeckillOrder {
    /// Create a `Pending` order priced at `unit_price * quantity`.
    ///
    /// Emits `OrderCreated`.
    pub(crate) fn create(
        user_id: UserId,
        activity_id: ActivityId,
        product_id: ProductId,
        quantity: u32,
        unit_price: Money,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if user_id.is_blank() {
            return Err(ValidationError::EmptyIdentifier { field: "user_id" });
        }
        if product_id.is_blank() {
            return Err(ValidationError::EmptyIdentifier {
                field: "product_id",
            });
        }
        if quantity == 0 {
            return Err(ValidationError::ZeroQuantity);
        }
        if unit_price.is_zero() {
            return Err(ValidationError::NonPositivePrice {
                field: "unit_price",
            });
        }
        let total_amount = unit_price
            .checked_multiply(quantity)
            .ok_or(ValidationError::AmountOverflow)?;

        let mut order = Self {
            id: OrderId::new(),
            user_id,
            activity_id,
            product_id,
            quantity,
            unit_price,
            total_amount,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            version: 0,
            events: SmallVec::new(),
        };

        order.events.push(SeckillEvent::OrderCreated {
            order_id: order.id,
            activity_id,
            user_id: order.user_id.clone(),
            quantity,
            total_amount,
            occurred_at: now,
        });

        Ok(order)
    }

    /// `Pending -> Paid`. Emits `OrderPaid`.
    ///
    /// A second payment is an error, not a no-op; duplicate settlement
    /// callbacks must be deduplicated upstream.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidOrderTransition`] unless `Pending`.
    pub fn pay(&mut self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        self.leave_pending(OrderStatus::Paid, "pay", now)?;
        self.events.push(SeckillEvent::OrderPaid {
            order_id: self.id,
            activity_id: self.activity_id,
            amount: self.total_amount,
            occurred_at: now,
        });
        Ok(())
    }

    /// `Pending -> Cancelled`. Emits `OrderCancelled` with the quantity to release.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidOrderTransition`] unless `Pending`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        self.leave_pending(OrderStatus::Cancelled, "cancel", now)?;
        self.events.push(SeckillEvent::OrderCancelled {
            order_id: self.id,
            activity_id: self.activity_id,
            quantity: self.quantity,
            occurred_at: now,
        });
        Ok(())
    }

    /// `Pending -> Expired`. Emits `OrderExpired` with the quantity to release.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidOrderTransition`] unless `Pending`.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        self.leave_pending(OrderStatus::Expired, "expire", now)?;
        self.events.push(SeckillEvent::OrderExpired {
            order_id: self.id,
            activity_id: self.activity_id,
            quantity: self.quantity,
            occurred_at: now,
        });
        Ok(())
    }

    fn leave_pending(
        &mut self,
        to: OrderStatus,
        action: &'static str,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if self.status != OrderStatus::Pending {
            return Err(ValidationError::InvalidOrderTransition {
                from: self.status,
                action,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Order ID
    #[must_use]
    pub const fn id(&self) -> OrderId {
        self.id
    }

    /// Buyer
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Activity the stock came from
    #[must_use]
    pub const fn activity_id(&self) -> ActivityId {
        self.activity_id
    }

    /// Product bought
    #[must_use]
    pub const fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    /// Units bought
    #[must_use]
    pub const fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Price per unit at reservation time
    #[must_use]
    pub const fn unit_price(&self) -> Money {
        self.unit_price
    }

    /// `unit_price * quantity`
    #[must_use]
    pub const fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Lifecycle status
    #[must_use]
    pub const fn status(&self) -> OrderStatus {
        self.status
    }

    /// Creation time
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last transition time
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Version this instance was loaded at (0 before the first commit)
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Advance the version after a successful write.
    ///
    /// Repository implementations call this on the copy they store.
    pub const fn mark_committed(&mut self) {
        self.version += 1;
    }

    /// Events produced since the last drain
    #[must_use]
    pub fn pending_events(&self) -> &[SeckillEvent] {
        &self.events
    }

    /// Drain and return the pending events
    pub fn take_events(&mut self) -> SmallVec<[SeckillEvent; 2]> {
        std::mem::take(&mut self.events)
    }
}
