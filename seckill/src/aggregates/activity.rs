//! Seckill activity aggregate.
//!
//! Owns the stock counters of one flash sale. [`SeckillActivity::reserve_stock`]
//! is the only operation that takes stock away, and it must only ever run
//! while the caller holds the activity lock (see
//! [`StockReservationCoordinator`](crate::coordinator::StockReservationCoordinator)).
//!
//! ```text
//! Pending ──start──▶ Active ──end / sold out──▶ Ended
//! ```

use crate::error::{SeckillError, ValidationError};
use crate::events::SeckillEvent;
use crate::types::{ActivityId, ActivityStatus, EndReason, Money, ProductId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Minimum activity name length, in characters after trimming
pub const NAME_MIN_CHARS: usize = 2;

/// Maximum activity name length, in characters after trimming
pub const NAME_MAX_CHARS: usize = 100;

/// Parameters for [`SeckillActivity::create`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewActivity {
    /// Display name
    pub name: String,
    /// Product on sale
    pub product_id: ProductId,
    /// Regular price
    pub original_price: Money,
    /// Discounted price, strictly below `original_price`
    pub seckill_price: Money,
    /// Units available
    pub total_stock: u32,
    /// Window start (inclusive)
    pub start_time: DateTime<Utc>,
    /// Window end (inclusive), strictly after `start_time`
    pub end_time: DateTime<Utc>,
}

/// One flash-sale campaign for one product
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeckillActivity {
    id: ActivityId,
    name: String,
    product_id: ProductId,
    original_price: Money,
    seckill_price: Money,
    total_stock: u32,
    remaining_stock: u32,
    status: ActivityStatus,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped on every committed write
    version: u64,
    #[serde(skip)]
    events: SmallVec<[SeckillEvent; 4]>,
}

impl SeckillActivity {
    /// Validate `params` and create a `Pending` activity with full stock.
    ///
    /// Emits `ActivityCreated`.
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationError`] for the first rule `params` breaks.
    pub fn create(params: NewActivity, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        let name = params.name.trim();
        if name.is_empty() {
            return Err(ValidationError::NameEmpty);
        }
        let name_chars = name.chars().count();
        if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&name_chars) {
            return Err(ValidationError::NameLength {
                actual: name_chars,
                min: NAME_MIN_CHARS,
                max: NAME_MAX_CHARS,
            });
        }
        if params.product_id.is_blank() {
            return Err(ValidationError::EmptyIdentifier {
                field: "product_id",
            });
        }
        if params.original_price.is_zero() {
            return Err(ValidationError::NonPositivePrice {
                field: "original_price",
            });
        }
        if params.seckill_price.is_zero() {
            return Err(ValidationError::NonPositivePrice {
                field: "seckill_price",
            });
        }
        if params.seckill_price >= params.original_price {
            return Err(ValidationError::PriceNotDiscounted {
                original: params.original_price,
                seckill: params.seckill_price,
            });
        }
        if params.total_stock == 0 {
            return Err(ValidationError::ZeroStock);
        }
        if params.end_time <= params.start_time {
            return Err(ValidationError::InvalidWindow {
                start: params.start_time,
                end: params.end_time,
            });
        }

        let mut activity = Self {
            id: ActivityId::new(),
            name: name.to_string(),
            product_id: params.product_id,
            original_price: params.original_price,
            seckill_price: params.seckill_price,
            total_stock: params.total_stock,
            remaining_stock: params.total_stock,
            status: ActivityStatus::Pending,
            start_time: params.start_time,
            end_time: params.end_time,
            created_at: now,
            updated_at: now,
            version: 0,
            events: SmallVec::new(),
        };

        activity.events.push(SeckillEvent::ActivityCreated {
            activity_id: activity.id,
            product_id: activity.product_id.clone(),
            total_stock: activity.total_stock,
            seckill_price: activity.seckill_price,
            occurred_at: now,
        });

        Ok(activity)
    }

    /// `Pending -> Active`. Emits `ActivityStarted`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidActivityTransition`] unless the
    /// activity is `Pending`. A second start is reported, not ignored.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if self.status != ActivityStatus::Pending {
            return Err(ValidationError::InvalidActivityTransition {
                from: self.status,
                action: "start",
            });
        }

        self.status = ActivityStatus::Active;
        self.updated_at = now;
        self.events.push(SeckillEvent::ActivityStarted {
            activity_id: self.id,
            occurred_at: now,
        });
        Ok(())
    }

    /// `Active -> Ended`. Emits `ActivityEnded` with the final counters.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidActivityTransition`] unless the
    /// activity is `Active`.
    pub fn end(&mut self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if self.status != ActivityStatus::Active {
            return Err(ValidationError::InvalidActivityTransition {
                from: self.status,
                action: "end",
            });
        }

        self.finish(EndReason::Manual, now);
        Ok(())
    }

    /// Take `quantity` units from remaining stock.
    ///
    /// Emits `StockReserved`. When this takes the last unit the activity ends
    /// in the same step and `ActivityEnded` follows, so an `Active` activity
    /// with zero stock is never observable.
    ///
    /// Callers must hold the activity lock.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::ZeroQuantity`] for `quantity == 0`
    /// - [`ValidationError::ActivityNotOpen`] while `Pending`, or once `Ended`
    ///   with enough stock left (manual end)
    /// - [`SeckillError::InsufficientStock`] when `quantity > remaining`,
    ///   including every request after a sell-out; nothing is decremented
    pub fn reserve_stock(&mut self, quantity: u32, now: DateTime<Utc>) -> Result<(), SeckillError> {
        if quantity == 0 {
            return Err(ValidationError::ZeroQuantity.into());
        }
        if self.status == ActivityStatus::Pending {
            return Err(self.not_open());
        }
        // Checked before the Ended case so late buyers of a sold-out sale see
        // the stock shortage rather than a closed activity.
        if self.remaining_stock < quantity {
            return Err(SeckillError::InsufficientStock {
                requested: quantity,
                available: self.remaining_stock,
            });
        }
        if self.status == ActivityStatus::Ended {
            return Err(self.not_open());
        }

        self.remaining_stock -= quantity;
        self.updated_at = now;
        self.events.push(SeckillEvent::StockReserved {
            activity_id: self.id,
            quantity,
            remaining: self.remaining_stock,
            occurred_at: now,
        });

        if self.remaining_stock == 0 {
            self.finish(EndReason::SoldOut, now);
        }

        Ok(())
    }

    /// Give `quantity` sold units back to remaining stock.
    ///
    /// Emits `StockReleased`. Status is left alone: an ended activity stays
    /// ended.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::ZeroQuantity`] for `quantity == 0`
    /// - [`ValidationError::ReleaseExceedsSold`] when `quantity > sold`
    pub fn release_stock(&mut self, quantity: u32, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if quantity == 0 {
            return Err(ValidationError::ZeroQuantity);
        }
        let sold = self.sold();
        if quantity > sold {
            return Err(ValidationError::ReleaseExceedsSold {
                requested: quantity,
                sold,
            });
        }

        self.remaining_stock += quantity;
        self.updated_at = now;
        self.events.push(SeckillEvent::StockReleased {
            activity_id: self.id,
            quantity,
            remaining: self.remaining_stock,
            occurred_at: now,
        });
        Ok(())
    }

    /// True iff `Active` and `as_of` is within `[start_time, end_time]`.
    #[must_use]
    pub fn is_active(&self, as_of: DateTime<Utc>) -> bool {
        self.status == ActivityStatus::Active && self.start_time <= as_of && as_of <= self.end_time
    }

    fn not_open(&self) -> SeckillError {
        ValidationError::ActivityNotOpen {
            activity_id: self.id,
            status: self.status,
        }
        .into()
    }

    fn finish(&mut self, reason: EndReason, now: DateTime<Utc>) {
        self.status = ActivityStatus::Ended;
        self.updated_at = now;
        self.events.push(SeckillEvent::ActivityEnded {
            activity_id: self.id,
            sold: self.sold(),
            remaining: self.remaining_stock,
            reason,
            occurred_at: now,
        });
    }

    /// Activity ID
    #[must_use]
    pub const fn id(&self) -> ActivityId {
        self.id
    }

    /// Display name (trimmed)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Product on sale
    #[must_use]
    pub const fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    /// Regular price
    #[must_use]
    pub const fn original_price(&self) -> Money {
        self.original_price
    }

    /// Discounted price charged per unit
    #[must_use]
    pub const fn seckill_price(&self) -> Money {
        self.seckill_price
    }

    /// Units offered, fixed at creation
    #[must_use]
    pub const fn total_stock(&self) -> u32 {
        self.total_stock
    }

    /// Units still available
    #[must_use]
    pub const fn remaining_stock(&self) -> u32 {
        self.remaining_stock
    }

    /// Units sold, always `total_stock - remaining_stock`
    #[must_use]
    pub const fn sold(&self) -> u32 {
        self.total_stock - self.remaining_stock
    }

    /// Lifecycle status
    #[must_use]
    pub const fn status(&self) -> ActivityStatus {
        self.status
    }

    /// Window start
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Window end
    #[must_use]
    pub const fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Creation time
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last mutation time
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
    pub fn take_events(&mut self) -> SmallVec<[SeckillEvent; 4]> {
        std::mem::take(&mut self.events)
    }
}
