//! Persistence contract for activities and orders.
//!
//! Writes go through a [`UnitOfWork`] so that an activity's stock change and
//! the order it produced land together or not at all.
//!
//! # Optimistic concurrency
//!
//! Every stored activity and order carries a version. A commit whose activity
//! was loaded at an older version is rejected with [`RepositoryError::Conflict`],
//! and a stale order with [`RepositoryError::OrderConflict`]. Under correct
//! locking this never fires; it catches the case where a lease expired
//! mid-operation and a second holder already wrote.

use crate::aggregates::{SeckillActivity, SeckillOrder};
use crate::types::{ActivityId, OrderId, OrderStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors reported by repository implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The activity was written by someone else since it was loaded
    #[error("Activity {activity_id} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        /// Activity ID
        activity_id: ActivityId,
        /// Version the writer loaded
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// The order was written by someone else since it was loaded
    #[error("Order {order_id} was modified concurrently (expected version {expected}, found {actual})")]
    OrderConflict {
        /// Order ID
        order_id: OrderId,
        /// Version the writer loaded
        expected: u64,
        /// Version currently stored
        actual: u64,
    },

    /// The storage backend failed
    #[error("Storage error: {0}")]
    Backend(String),
}

/// Boxed future returned by [`SeckillRepository`] methods.
pub type RepositoryFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Writes to commit atomically.
#[derive(Clone, Debug, Default)]
pub struct UnitOfWork {
    activities: Vec<SeckillActivity>,
    orders: Vec<SeckillOrder>,
}

impl UnitOfWork {
    /// Create an empty unit of work
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a snapshot of `activity` (pending events are not copied).
    pub fn save_activity(&mut self, activity: &SeckillActivity) -> &mut Self {
        let mut snapshot = activity.clone();
        snapshot.take_events();
        self.activities.push(snapshot);
        self
    }

    /// Stage a snapshot of `order` (pending events are not copied).
    pub fn save_order(&mut self, order: &SeckillOrder) -> &mut Self {
        let mut snapshot = order.clone();
        snapshot.take_events();
        self.orders.push(snapshot);
        self
    }

    /// Staged activities
    #[must_use]
    pub fn activities(&self) -> &[SeckillActivity] {
        &self.activities
    }

    /// Staged orders
    #[must_use]
    pub fn orders(&self) -> &[SeckillOrder] {
        &self.orders
    }

    /// True if nothing is staged
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.activities.is_empty() && self.orders.is_empty()
    }

    /// Split into the staged activities and orders
    #[must_use]
    pub fn into_parts(self) -> (Vec<SeckillActivity>, Vec<SeckillOrder>) {
        (self.activities, self.orders)
    }
}

/// Durable store for activities and orders.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the coordinator can hold an
/// `Arc<dyn SeckillRepository>`.
pub trait SeckillRepository: Send + Sync {
    /// Load an activity by ID.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] if the store fails.
    fn load_activity(&self, id: ActivityId) -> RepositoryFuture<'_, Option<SeckillActivity>>;

    /// Load an order by ID.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] if the store fails.
    fn load_order(&self, id: OrderId) -> RepositoryFuture<'_, Option<SeckillOrder>>;

    /// All orders created against an activity, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] if the store fails.
    fn orders_for_activity(&self, id: ActivityId) -> RepositoryFuture<'_, Vec<SeckillOrder>>;

    /// `Pending` orders created strictly before `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] if the store fails.
    fn pending_orders_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> RepositoryFuture<'_, Vec<SeckillOrder>>;

    /// Persist every staged write atomically.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::Conflict`] if a staged activity is stale; nothing
    ///   is written
    /// - [`RepositoryError::OrderConflict`] if a staged order is stale; nothing
    ///   is written
    /// - [`RepositoryError::Backend`] if the store fails; nothing is written
    fn commit(&self, work: UnitOfWork) -> RepositoryFuture<'_, ()>;
}

#[derive(Debug, Default)]
struct Tables {
    activities: HashMap<ActivityId, SeckillActivity>,
    orders: HashMap<OrderId, SeckillOrder>,
}

/// In-process repository backed by hash maps.
///
/// One lock guards both tables, which makes every commit atomic.
#[derive(Clone, Debug, Default)]
pub struct InMemorySeckillRepository {
    tables: Arc<RwLock<Tables>>,
}

impl InMemorySeckillRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored activities
    #[must_use]
    pub fn activity_count(&self) -> usize {
        self.tables.read().map_or(0, |t| t.activities.len())
    }

    /// Number of stored orders
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.tables.read().map_or(0, |t| t.orders.len())
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, RepositoryError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| RepositoryError::Backend("repository lock poisoned".to_string()))?;
        Ok(f(&tables))
    }

    fn apply(&self, work: UnitOfWork) -> Result<(), RepositoryError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| RepositoryError::Backend("repository lock poisoned".to_string()))?;

        for activity in work.activities() {
            let actual = tables
                .activities
                .get(&activity.id())
                .map_or(0, SeckillActivity::version);
            if actual != activity.version() {
                return Err(RepositoryError::Conflict {
                    activity_id: activity.id(),
                    expected: activity.version(),
                    actual,
                });
            }
        }

        for order in work.orders() {
            let actual = tables
                .orders
                .get(&order.id())
                .map_or(0, SeckillOrder::version);
            if actual != order.version() {
                return Err(RepositoryError::OrderConflict {
                    order_id: order.id(),
                    expected: order.version(),
                    actual,
                });
            }
        }

        let (activities, orders) = work.into_parts();
        for mut activity in activities {
            activity.mark_committed();
            tables.activities.insert(activity.id(), activity);
        }
        for mut order in orders {
            order.mark_committed();
            tables.orders.insert(order.id(), order);
        }
        Ok(())
    }
}

impl SeckillRepository for InMemorySeckillRepository {
    fn load_activity(&self, id: ActivityId) -> RepositoryFuture<'_, Option<SeckillActivity>> {
        Box::pin(async move { self.read(|t| t.activities.get(&id).cloned()) })
    }

    fn load_order(&self, id: OrderId) -> RepositoryFuture<'_, Option<SeckillOrder>> {
        Box::pin(async move { self.read(|t| t.orders.get(&id).cloned()) })
    }

    fn orders_for_activity(&self, id: ActivityId) -> RepositoryFuture<'_, Vec<SeckillOrder>> {
        Box::pin(async move {
            self.read(|t| {
                let mut orders: Vec<SeckillOrder> = t
                    .orders
                    .values()
                    .filter(|o| o.activity_id() == id)
                    .cloned()
                    .collect();
                orders.sort_by_key(SeckillOrder::created_at);
                orders
            })
        })
    }

    fn pending_orders_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> RepositoryFuture<'_, Vec<SeckillOrder>> {
        Box::pin(async move {
            self.read(|t| {
                let mut orders: Vec<SeckillOrder> = t
                    .orders
                    .values()
                    .filter(|o| o.status() == OrderStatus::Pending && o.created_at() < cutoff)
                    .cloned()
                    .collect();
                orders.sort_by_key(SeckillOrder::created_at);
                orders
            })
        })
    }

    fn commit(&self, work: UnitOfWork) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            let activities = work.activities().len();
            let orders = work.orders().len();
            self.apply(work)?;
            tracing::trace!(activities, orders, "Committed unit of work");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::aggregates::NewActivity;
    use crate::types::{Money, ProductId, UserId};
    use chrono::Duration;
    use flashsale_core::environment::Clock;
    use flashsale_testing::test_clock;

    fn activity() -> SeckillActivity {
        let now = test_clock().now();
        SeckillActivity::create(
            NewActivity {
                name: "Flash".to_string(),
                product_id: ProductId::new("p-1"),
                original_price: Money::from_cents(1000),
                seckill_price: Money::from_cents(500),
                total_stock: 5,
                start_time: now,
                end_time: now + Duration::hours(1),
            },
            now,
        )
        .unwrap()
    }

    fn order_for(activity: &SeckillActivity, at: DateTime<Utc>) -> SeckillOrder {
        SeckillOrder::create(
            UserId::new("u-1"),
            activity.id(),
            activity.product_id().clone(),
            1,
            activity.seckill_price(),
            at,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn commit_bumps_version_and_strips_events() {
        let repo = InMemorySeckillRepository::new();
        let activity = activity();
        assert!(!activity.pending_events().is_empty());

        let mut work = UnitOfWork::new();
        work.save_activity(&activity);
        repo.commit(work).await.unwrap();

        let stored = repo.load_activity(activity.id()).await.unwrap().unwrap();
        assert_eq!(stored.version(), 1);
        assert!(stored.pending_events().is_empty());
    }

    #[tokio::test]
    async fn stale_activity_is_rejected_and_nothing_is_written() {
        let repo = InMemorySeckillRepository::new();
        let activity = activity();
        let mut work = UnitOfWork::new();
        work.save_activity(&activity);
        repo.commit(work).await.unwrap();

        // Two writers load the same version
        let first = repo.load_activity(activity.id()).await.unwrap().unwrap();
        let second = first.clone();

        let mut work = UnitOfWork::new();
        work.save_activity(&first);
        repo.commit(work).await.unwrap();

        let order = order_for(&second, test_clock().now());
        let mut work = UnitOfWork::new();
        work.save_activity(&second).save_order(&order);
        let result = repo.commit(work).await;

        assert_eq!(
            result,
            Err(RepositoryError::Conflict {
                activity_id: activity.id(),
                expected: 1,
                actual: 2,
            })
        );
        assert_eq!(repo.order_count(), 0);
    }

    #[tokio::test]
    async fn stale_order_is_rejected_and_nothing_is_written() {
        let repo = InMemorySeckillRepository::new();
        let activity = activity();
        let now = test_clock().now();
        let order = order_for(&activity, now);
        let mut work = UnitOfWork::new();
        work.save_activity(&activity).save_order(&order);
        repo.commit(work).await.unwrap();

        // One writer pays, another cancels from the same snapshot
        let mut paid = repo.load_order(order.id()).await.unwrap().unwrap();
        let mut cancelled = paid.clone();
        assert_eq!(paid.version(), 1);

        cancelled.cancel(now).unwrap();
        let mut work = UnitOfWork::new();
        work.save_order(&cancelled);
        repo.commit(work).await.unwrap();

        paid.pay(now).unwrap();
        let stored_activity = repo.load_activity(activity.id()).await.unwrap().unwrap();
        let mut work = UnitOfWork::new();
        work.save_activity(&stored_activity).save_order(&paid);
        let result = repo.commit(work).await;

        assert_eq!(
            result,
            Err(RepositoryError::OrderConflict {
                order_id: order.id(),
                expected: 1,
                actual: 2,
            })
        );
        let stored = repo.load_order(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Cancelled);
        let untouched = repo.load_activity(activity.id()).await.unwrap().unwrap();
        assert_eq!(untouched.version(), 1);
    }

    #[tokio::test]
    async fn pending_orders_before_cutoff() {
        let repo = InMemorySeckillRepository::new();
        let activity = activity();
        let now = test_clock().now();

        let old = order_for(&activity, now - Duration::minutes(30));
        let fresh = order_for(&activity, now);
        let mut paid = order_for(&activity, now - Duration::hours(2));
        paid.pay(now).unwrap();

        let mut work = UnitOfWork::new();
        work.save_order(&old).save_order(&fresh).save_order(&paid);
        repo.commit(work).await.unwrap();

        let stale = repo
            .pending_orders_created_before(now - Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id(), old.id());

        let all = repo.orders_for_activity(activity.id()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id(), paid.id());
    }
}
