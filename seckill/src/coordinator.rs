//! Stock Reservation Coordinator.
//!
//! The single choke point for every operation that touches an activity's
//! stock. For one activity, the coordinator holds the activity lock across
//! the whole read-modify-write cycle:
//!
//! ```text
//! acquire lock(activity) ──▶ load activity ──▶ reserve stock ──▶ create order
//!          ▲                                                        │
//!          │                                                        ▼
//!   release lock ◀──────────────── commit(activity + order) ◀───────┘
//!          │
//!          ▼
//!   publish drained events
//! ```
//!
//! Holding the lock only around the decrement is not enough: two callers
//! could both load the same remaining count, both decrement in memory, and
//! both commit. The lock therefore spans load through commit.
//!
//! Different activities use different lock keys and never contend.
//!
//! The coordinator does not retry. [`SeckillError::is_retryable`] tells
//! callers which failures are worth another attempt.

use crate::aggregates::{NewActivity, SeckillActivity, SeckillOrder};
use crate::error::{Result, SeckillError, ValidationError};
use crate::events::SeckillEvent;
use crate::lock::LeaseWatchdog;
use crate::metrics;
use crate::repository::{SeckillRepository, UnitOfWork};
use crate::types::{ActivityId, ActivityStatus, Money, OrderId, OrderStatus, UserId};
use chrono::{DateTime, Utc};
use flashsale_core::environment::Clock;
use flashsale_core::lock::{DistributedLock, LockError, LockToken};
use flashsale_core::publisher::EventPublisher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// State change applied to a loaded order
type OrderTransition =
    fn(&mut SeckillOrder, DateTime<Utc>) -> std::result::Result<(), ValidationError>;

/// Lock timings and key namespace used by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Lease per acquired activity lock; must comfortably exceed one
    /// load-reserve-commit cycle
    pub lock_lease: Duration,
    /// Bounded wait for the activity lock
    pub lock_wait: Duration,
    /// Renew the lease at this interval while held (`None` disables renewal)
    pub renew_interval: Option<Duration>,
    /// Lock key namespace
    pub key_prefix: String,
}

impl CoordinatorSettings {
    /// Lock key for an activity: `{prefix}:activity:{id}`
    #[must_use]
    pub fn lock_key(&self, activity_id: ActivityId) -> String {
        format!("{}:activity:{activity_id}", self.key_prefix)
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            lock_lease: Duration::from_secs(5),
            lock_wait: Duration::from_secs(2),
            renew_interval: None,
            key_prefix: "seckill:lock".to_string(),
        }
    }
}

/// Read-only summary of an activity and its orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityReport {
    /// Activity ID
    pub activity_id: ActivityId,
    /// Activity name
    pub name: String,
    /// Current status
    pub status: ActivityStatus,
    /// Units offered
    pub total_stock: u32,
    /// Units left
    pub remaining_stock: u32,
    /// Units sold
    pub sold: u32,
    /// Orders awaiting payment
    pub pending_orders: usize,
    /// Paid orders
    pub paid_orders: usize,
    /// Cancelled orders
    pub cancelled_orders: usize,
    /// Expired orders
    pub expired_orders: usize,
    /// Sum of paid order amounts
    pub paid_revenue: Money,
}

impl fmt::Display for ActivityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Activity {} ({})", self.name, self.activity_id)?;
        writeln!(f, "  status:    {}", self.status)?;
        writeln!(
            f,
            "  stock:     {} total, {} sold, {} remaining",
            self.total_stock, self.sold, self.remaining_stock
        )?;
        writeln!(
            f,
            "  orders:    {} pending, {} paid, {} cancelled, {} expired",
            self.pending_orders, self.paid_orders, self.cancelled_orders, self.expired_orders
        )?;
        write!(f, "  revenue:   {}", self.paid_revenue)
    }
}

struct ActivityGuard {
    key: String,
    token: LockToken,
    watchdog: Option<LeaseWatchdog>,
}

/// Serializes every stock mutation of an activity behind its lock.
pub struct StockReservationCoordinator {
    repository: Arc<dyn SeckillRepository>,
    lock: Arc<dyn DistributedLock>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    settings: CoordinatorSettings,
}

impl StockReservationCoordinator {
    /// Wire a coordinator from its collaborators.
    #[must_use]
    pub fn new(
        repository: Arc<dyn SeckillRepository>,
        lock: Arc<dyn DistributedLock>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            repository,
            lock,
            publisher,
            clock,
            settings,
        }
    }

    /// Current settings
    #[must_use]
    pub const fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    // ========================================================================
    // Activity lifecycle
    // ========================================================================

    /// Validate and persist a new `Pending` activity.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::Validation`] if `params` break a creation rule
    /// - [`SeckillError::Persistence`] if the commit fails
    #[tracing::instrument(skip_all, fields(product_id = %params.product_id, total_stock = params.total_stock))]
    pub async fn create_activity(&self, params: NewActivity) -> Result<SeckillActivity> {
        let mut activity = SeckillActivity::create(params, self.clock.now())?;

        let mut work = UnitOfWork::new();
        work.save_activity(&activity);
        self.commit(work).await?;
        activity.mark_committed();

        let events = activity.take_events();
        tracing::info!(activity_id = %activity.id(), "Activity created");
        self.publish(events).await;
        Ok(activity)
    }

    /// `Pending -> Active`, serialized with reservations.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::LockTimeout`] if the activity lock is busy
    /// - [`SeckillError::Validation`] if the activity is missing or not `Pending`
    /// - [`SeckillError::Persistence`] if the commit fails
    #[tracing::instrument(skip(self), fields(activity_id = %activity_id))]
    pub async fn start_activity(&self, activity_id: ActivityId) -> Result<SeckillActivity> {
        let (activity, events) = self
            .with_activity_lock(activity_id, || {
                self.mutate_activity_locked(activity_id, SeckillActivity::start)
            })
            .await?;

        tracing::info!("Activity started");
        self.publish(events).await;
        Ok(activity)
    }

    /// `Active -> Ended`, serialized with reservations.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::LockTimeout`] if the activity lock is busy
    /// - [`SeckillError::Validation`] if the activity is missing or not `Active`
    /// - [`SeckillError::Persistence`] if the commit fails
    #[tracing::instrument(skip(self), fields(activity_id = %activity_id))]
    pub async fn end_activity(&self, activity_id: ActivityId) -> Result<SeckillActivity> {
        let (activity, events) = self
            .with_activity_lock(activity_id, || {
                self.mutate_activity_locked(activity_id, SeckillActivity::end)
            })
            .await?;

        tracing::info!(sold = activity.sold(), "Activity ended");
        self.publish(events).await;
        Ok(activity)
    }

    // ========================================================================
    // Participation
    // ========================================================================

    /// Reserve `quantity` units for `user_id` and create their order.
    ///
    /// Across any number of concurrent calls for the same activity, the
    /// quantities of created orders never add up to more than its total stock.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::LockTimeout`] if the lock is not acquired in time (retryable)
    /// - [`SeckillError::Validation`] for a zero quantity, blank user, unknown
    ///   activity, or an activity that is not open (status or window)
    /// - [`SeckillError::InsufficientStock`] if fewer than `quantity` units remain
    /// - [`SeckillError::Persistence`] if the commit fails; nothing is decremented
    #[tracing::instrument(
        skip_all,
        fields(activity_id = %activity_id, user_id = %user_id, quantity = quantity)
    )]
    pub async fn participate(
        &self,
        user_id: UserId,
        activity_id: ActivityId,
        quantity: u32,
    ) -> Result<SeckillOrder> {
        let result = self.try_participate(&user_id, activity_id, quantity).await;
        metrics::record_participation(result.as_ref().map(|_| quantity));

        let (order, events) = result?;
        self.publish(events).await;
        Ok(order)
    }

    async fn try_participate(
        &self,
        user_id: &UserId,
        activity_id: ActivityId,
        quantity: u32,
    ) -> Result<(SeckillOrder, Vec<SeckillEvent>)> {
        // Cheap rejections before queueing on the lock
        if quantity == 0 {
            return Err(ValidationError::ZeroQuantity.into());
        }
        if user_id.is_blank() {
            return Err(ValidationError::EmptyIdentifier { field: "user_id" }.into());
        }

        self.with_activity_lock(activity_id, || {
            self.participate_locked(user_id, activity_id, quantity)
        })
        .await
    }

    async fn participate_locked(
        &self,
        user_id: &UserId,
        activity_id: ActivityId,
        quantity: u32,
    ) -> Result<(SeckillOrder, Vec<SeckillEvent>)> {
        let now = self.clock.now();
        let mut activity = self.require_activity(activity_id).await?;

        if activity.status() == ActivityStatus::Active && !activity.is_active(now) {
            return Err(ValidationError::ActivityNotOpen {
                activity_id,
                status: activity.status(),
            }
            .into());
        }

        if let Err(e) = activity.reserve_stock(quantity, now) {
            if let SeckillError::InsufficientStock { available, .. } = &e {
                tracing::debug!(available, "Not enough stock");
            }
            return Err(e);
        }

        let mut order = SeckillOrder::create(
            user_id.clone(),
            activity_id,
            activity.product_id().clone(),
            quantity,
            activity.seckill_price(),
            now,
        )?;

        let mut work = UnitOfWork::new();
        work.save_activity(&activity).save_order(&order);
        self.commit(work).await?;
        order.mark_committed();

        tracing::info!(
            order_id = %order.id(),
            remaining = activity.remaining_stock(),
            "Stock reserved"
        );
        metrics::record_order_transition(OrderStatus::Pending);

        let mut events: Vec<SeckillEvent> = activity.take_events().into_iter().collect();
        events.extend(order.take_events());
        Ok((order, events))
    }

    // ========================================================================
    // Order transitions
    // ========================================================================

    /// `Pending -> Paid`.
    ///
    /// Runs under the owning activity's lock so a payment cannot land on an
    /// order that a concurrent release already returned to stock.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::LockTimeout`] if the activity lock is busy
    /// - [`SeckillError::Validation`] if the order is missing or not `Pending`
    /// - [`SeckillError::Persistence`] if the commit fails
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn pay_order(&self, order_id: OrderId) -> Result<SeckillOrder> {
        self.transition_order(order_id, SeckillOrder::pay).await
    }

    /// `Pending -> Cancelled`. Stock is not released; see
    /// [`cancel_order_and_release`](Self::cancel_order_and_release).
    ///
    /// # Errors
    ///
    /// - [`SeckillError::LockTimeout`] if the activity lock is busy
    /// - [`SeckillError::Validation`] if the order is missing or not `Pending`
    /// - [`SeckillError::Persistence`] if the commit fails
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<SeckillOrder> {
        self.transition_order(order_id, SeckillOrder::cancel).await
    }

    /// `Pending -> Expired`. Stock is not released; see
    /// [`expire_stale_orders`](Self::expire_stale_orders).
    ///
    /// # Errors
    ///
    /// - [`SeckillError::LockTimeout`] if the activity lock is busy
    /// - [`SeckillError::Validation`] if the order is missing or not `Pending`
    /// - [`SeckillError::Persistence`] if the commit fails
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn expire_order(&self, order_id: OrderId) -> Result<SeckillOrder> {
        self.transition_order(order_id, SeckillOrder::expire).await
    }

    async fn transition_order(
        &self,
        order_id: OrderId,
        transition: OrderTransition,
    ) -> Result<SeckillOrder> {
        let activity_id = self.require_order(order_id).await?.activity_id();

        let (order, events) = self
            .with_activity_lock(activity_id, || {
                self.transition_order_locked(order_id, transition)
            })
            .await?;

        tracing::info!(status = %order.status(), "Order updated");
        metrics::record_order_transition(order.status());
        self.publish(events).await;
        Ok(order)
    }

    async fn transition_order_locked(
        &self,
        order_id: OrderId,
        transition: OrderTransition,
    ) -> Result<(SeckillOrder, Vec<SeckillEvent>)> {
        // Reload under the lock; a release may have settled the order already.
        let mut order = self.require_order(order_id).await?;
        transition(&mut order, self.clock.now())?;

        let mut work = UnitOfWork::new();
        work.save_order(&order);
        self.commit(work).await?;
        order.mark_committed();

        let events: Vec<SeckillEvent> = order.take_events().into_iter().collect();
        Ok((order, events))
    }

    // ========================================================================
    // Stock release
    // ========================================================================

    /// Give `quantity` sold units back to the activity.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::LockTimeout`] if the activity lock is busy
    /// - [`SeckillError::Validation`] if the activity is missing, `quantity`
    ///   is zero, or exceeds the units sold
    /// - [`SeckillError::Persistence`] if the commit fails
    #[tracing::instrument(skip(self), fields(activity_id = %activity_id))]
    pub async fn release_stock(
        &self,
        activity_id: ActivityId,
        quantity: u32,
    ) -> Result<SeckillActivity> {
        let (activity, events) = self
            .with_activity_lock(activity_id, || {
                self.mutate_activity_locked(activity_id, |activity, now| {
                    activity.release_stock(quantity, now)
                })
            })
            .await?;

        tracing::info!(remaining = activity.remaining_stock(), "Stock released");
        metrics::record_units_released(quantity);
        self.publish(events).await;
        Ok(activity)
    }

    /// Cancel a pending order and release its units in one commit.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::LockTimeout`] if the activity lock is busy
    /// - [`SeckillError::Validation`] if the order or activity is missing, or
    ///   the order is not `Pending`
    /// - [`SeckillError::Persistence`] if the commit fails; neither aggregate changes
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order_and_release(
        &self,
        order_id: OrderId,
    ) -> Result<(SeckillOrder, SeckillActivity)> {
        let activity_id = self.require_order(order_id).await?.activity_id();

        let (order, activity, events) = self
            .with_activity_lock(activity_id, || self.cancel_and_release_locked(order_id))
            .await?;

        tracing::info!(
            activity_id = %activity_id,
            remaining = activity.remaining_stock(),
            "Order cancelled and stock released"
        );
        metrics::record_order_transition(OrderStatus::Cancelled);
        metrics::record_units_released(order.quantity());
        self.publish(events).await;
        Ok((order, activity))
    }

    async fn cancel_and_release_locked(
        &self,
        order_id: OrderId,
    ) -> Result<(SeckillOrder, SeckillActivity, Vec<SeckillEvent>)> {
        let now = self.clock.now();
        // Reload under the lock; the order may have moved on since.
        let mut order = self.require_order(order_id).await?;
        let mut activity = self.require_activity(order.activity_id()).await?;

        order.cancel(now)?;
        activity.release_stock(order.quantity(), now)?;

        let mut work = UnitOfWork::new();
        work.save_order(&order).save_activity(&activity);
        self.commit(work).await?;
        order.mark_committed();
        activity.mark_committed();

        let mut events: Vec<SeckillEvent> = order.take_events().into_iter().collect();
        events.extend(activity.take_events());
        Ok((order, activity, events))
    }

    /// Expire every `Pending` order older than `max_age` and release its units.
    ///
    /// Orders are processed per activity, each activity in one commit under
    /// its lock. Returns the orders that were expired.
    ///
    /// # Errors
    ///
    /// Stops at the first activity that fails (lock timeout, inconsistent
    /// stock, persistence). Activities handled before it stay committed; the
    /// next run picks up the rest.
    #[tracing::instrument(skip(self))]
    pub async fn expire_stale_orders(&self, max_age: chrono::Duration) -> Result<Vec<SeckillOrder>> {
        let now = self.clock.now();
        let cutoff = now.checked_sub_signed(max_age).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let stale = self
            .repository
            .pending_orders_created_before(cutoff)
            .await
            .map_err(|e| SeckillError::Persistence(e.to_string()))?;

        let mut by_activity: BTreeMap<ActivityId, Vec<OrderId>> = BTreeMap::new();
        for order in &stale {
            by_activity.entry(order.activity_id()).or_default().push(order.id());
        }

        let mut expired = Vec::with_capacity(stale.len());
        for (activity_id, order_ids) in by_activity {
            let (orders, events) = self
                .with_activity_lock(activity_id, || self.expire_locked(activity_id, &order_ids))
                .await?;

            for order in &orders {
                metrics::record_order_transition(OrderStatus::Expired);
                metrics::record_units_released(order.quantity());
            }
            self.publish(events).await;
            expired.extend(orders);
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired stale orders");
        }
        Ok(expired)
    }

    async fn expire_locked(
        &self,
        activity_id: ActivityId,
        order_ids: &[OrderId],
    ) -> Result<(Vec<SeckillOrder>, Vec<SeckillEvent>)> {
        let now = self.clock.now();
        let mut activity = self.require_activity(activity_id).await?;
        let mut work = UnitOfWork::new();
        let mut expired = Vec::new();
        let mut events = Vec::new();

        for &order_id in order_ids {
            let Some(mut order) = self.load_order(order_id).await? else {
                continue;
            };
            // Paid or cancelled since the scan
            if order.status() != OrderStatus::Pending {
                continue;
            }

            order.expire(now)?;
            activity.release_stock(order.quantity(), now)?;
            work.save_order(&order);
            events.extend(order.take_events());
            expired.push(order);
        }

        if expired.is_empty() {
            return Ok((expired, events));
        }

        work.save_activity(&activity);
        self.commit(work).await?;
        for order in &mut expired {
            order.mark_committed();
        }
        events.extend(activity.take_events());
        Ok((expired, events))
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    /// Counters, status and order breakdown for one activity.
    ///
    /// # Errors
    ///
    /// - [`SeckillError::Validation`] if the activity is missing or revenue overflows
    /// - [`SeckillError::Persistence`] if the store fails
    #[tracing::instrument(skip(self), fields(activity_id = %activity_id))]
    pub async fn activity_report(&self, activity_id: ActivityId) -> Result<ActivityReport> {
        let activity = self.require_activity(activity_id).await?;
        let orders = self
            .repository
            .orders_for_activity(activity_id)
            .await
            .map_err(|e| SeckillError::Persistence(e.to_string()))?;

        let count = |status: OrderStatus| orders.iter().filter(|o| o.status() == status).count();
        let paid_revenue = orders
            .iter()
            .filter(|o| o.status() == OrderStatus::Paid)
            .try_fold(Money::ZERO, |sum, o| sum.checked_add(o.total_amount()))
            .ok_or(ValidationError::AmountOverflow)?;

        Ok(ActivityReport {
            activity_id,
            name: activity.name().to_string(),
            status: activity.status(),
            total_stock: activity.total_stock(),
            remaining_stock: activity.remaining_stock(),
            sold: activity.sold(),
            pending_orders: count(OrderStatus::Pending),
            paid_orders: count(OrderStatus::Paid),
            cancelled_orders: count(OrderStatus::Cancelled),
            expired_orders: count(OrderStatus::Expired),
            paid_revenue,
        })
    }

    // ========================================================================
    // Locking
    // ========================================================================

    /// Run `critical` while holding the activity lock. The lock is released
    /// whether `critical` succeeds or fails.
    async fn with_activity_lock<T, F, Fut>(&self, activity_id: ActivityId, critical: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.lock_activity(activity_id).await?;
        let outcome = critical().await;
        self.unlock(guard).await;
        outcome
    }

    async fn lock_activity(&self, activity_id: ActivityId) -> Result<ActivityGuard> {
        let key = self.settings.lock_key(activity_id);
        let started = Instant::now();

        let acquired = self
            .lock
            .acquire(&key, self.settings.lock_lease, self.settings.lock_wait)
            .await;
        let waited = started.elapsed();
        metrics::record_lock_wait(waited);

        match acquired {
            Ok(token) => {
                tracing::debug!(key = %key, waited_ms = waited.as_millis(), "Activity lock acquired");
                let watchdog = self.settings.renew_interval.map(|interval| {
                    LeaseWatchdog::spawn(
                        Arc::clone(&self.lock),
                        key.clone(),
                        token.clone(),
                        self.settings.lock_lease,
                        interval,
                    )
                });
                Ok(ActivityGuard {
                    key,
                    token,
                    watchdog,
                })
            }
            Err(LockError::Timeout { key, waited }) => {
                tracing::warn!(key = %key, waited_ms = waited.as_millis(), "Timed out waiting for activity lock");
                Err(SeckillError::LockTimeout { key, waited })
            }
            Err(LockError::Backend(reason)) => {
                // Could not acquire within the bounded wait, whatever the cause.
                tracing::warn!(key = %key, error = %reason, "Lock backend failed during acquisition");
                Err(SeckillError::LockTimeout { key, waited })
            }
        }
    }

    async fn unlock(&self, guard: ActivityGuard) {
        if let Some(watchdog) = guard.watchdog {
            if watchdog.ownership_lost() {
                tracing::error!(key = %guard.key, "Lease was lost while the activity lock was held");
            }
            watchdog.stop().await;
        }

        // The lease expires on its own if this fails.
        if let Err(e) = self.lock.release(&guard.key, &guard.token).await {
            tracing::error!(key = %guard.key, error = %e, "Failed to release activity lock");
        } else {
            tracing::debug!(key = %guard.key, "Activity lock released");
        }
    }

    async fn mutate_activity_locked<F>(
        &self,
        activity_id: ActivityId,
        mutate: F,
    ) -> Result<(SeckillActivity, Vec<SeckillEvent>)>
    where
        F: FnOnce(&mut SeckillActivity, DateTime<Utc>) -> std::result::Result<(), ValidationError>,
    {
        let mut activity = self.require_activity(activity_id).await?;
        mutate(&mut activity, self.clock.now())?;

        let mut work = UnitOfWork::new();
        work.save_activity(&activity);
        self.commit(work).await?;
        activity.mark_committed();

        let events = activity.take_events().into_iter().collect();
        Ok((activity, events))
    }

    // ========================================================================
    // Repository and publishing helpers
    // ========================================================================

    async fn require_activity(&self, activity_id: ActivityId) -> Result<SeckillActivity> {
        self.repository
            .load_activity(activity_id)
            .await
            .map_err(|e| SeckillError::Persistence(e.to_string()))?
            .ok_or_else(|| ValidationError::ActivityNotFound(activity_id).into())
    }

    async fn load_order(&self, order_id: OrderId) -> Result<Option<SeckillOrder>> {
        self.repository
            .load_order(order_id)
            .await
            .map_err(|e| SeckillError::Persistence(e.to_string()))
    }

    async fn require_order(&self, order_id: OrderId) -> Result<SeckillOrder> {
        self.load_order(order_id)
            .await?
            .ok_or_else(|| ValidationError::OrderNotFound(order_id).into())
    }

    async fn commit(&self, work: UnitOfWork) -> Result<()> {
        self.repository.commit(work).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to commit unit of work");
            SeckillError::Persistence(e.to_string())
        })
    }

    /// Forward committed events. Failures are logged and never undo the commit.
    async fn publish(&self, events: impl IntoIterator<Item = SeckillEvent>) {
        for event in events {
            let serialized = match event.to_serialized() {
                Ok(serialized) => serialized,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize event for publishing");
                    metrics::record_publish_failure();
                    continue;
                }
            };

            if let Err(e) = self.publisher.publish(event.topic(), &serialized).await {
                tracing::warn!(
                    topic = event.topic(),
                    event_type = %serialized.event_type,
                    error = %e,
                    "Failed to publish event"
                );
                metrics::record_publish_failure();
            }
        }
    }
}
