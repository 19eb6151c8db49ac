//! Order transitions racing stock releases.
//!
//! A payment and a release of the same order must never both commit. Each
//! test parks one writer just before its commit, while it still holds the
//! activity lock, and checks what the competing writer gets.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use chrono::{DateTime, Duration, Utc};
use flashsale_core::environment::Clock;
use flashsale_core::publisher::EventPublisher;
use flashsale_testing::helpers::init_test_tracing;
use flashsale_testing::{ManualClock, RecordingPublisher, test_clock};
use seckill::repository::RepositoryFuture;
use seckill::{
    ActivityId, CoordinatorSettings, InMemorySeckillRepository, LocalLock, Money, NewActivity,
    OrderId, OrderStatus, ProductId, SeckillActivity, SeckillError, SeckillOrder,
    SeckillRepository, StockReservationCoordinator, UnitOfWork, UserId, ValidationError,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

const PAYMENT_TIMEOUT: i64 = 15;

/// Repository that can park the next commit until told to go on.
#[derive(Default)]
struct GatedRepository {
    inner: InMemorySeckillRepository,
    hold_next_commit: AtomicBool,
    parked: Notify,
    resume: Notify,
}

impl GatedRepository {
    fn hold_next_commit(&self) {
        self.hold_next_commit.store(true, Ordering::SeqCst);
    }

    async fn wait_until_parked(&self) {
        self.parked.notified().await;
    }

    fn release(&self) {
        self.resume.notify_one();
    }
}

impl SeckillRepository for GatedRepository {
    fn load_activity(&self, id: ActivityId) -> RepositoryFuture<'_, Option<SeckillActivity>> {
        self.inner.load_activity(id)
    }

    fn load_order(&self, id: OrderId) -> RepositoryFuture<'_, Option<SeckillOrder>> {
        self.inner.load_order(id)
    }

    fn orders_for_activity(&self, id: ActivityId) -> RepositoryFuture<'_, Vec<SeckillOrder>> {
        self.inner.orders_for_activity(id)
    }

    fn pending_orders_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> RepositoryFuture<'_, Vec<SeckillOrder>> {
        self.inner.pending_orders_created_before(cutoff)
    }

    fn commit(&self, work: UnitOfWork) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            if self.hold_next_commit.swap(false, Ordering::SeqCst) {
                self.parked.notify_one();
                self.resume.notified().await;
            }
            self.inner.commit(work).await
        })
    }
}

struct Harness {
    coordinator: Arc<StockReservationCoordinator>,
    repository: Arc<GatedRepository>,
    clock: ManualClock,
}

fn harness() -> Harness {
    init_test_tracing();
    let repository = Arc::new(GatedRepository::default());
    let clock = ManualClock::new(test_clock().now());

    let coordinator = StockReservationCoordinator::new(
        Arc::clone(&repository) as Arc<dyn SeckillRepository>,
        Arc::new(LocalLock::default()),
        Arc::new(RecordingPublisher::new()) as Arc<dyn EventPublisher>,
        Arc::new(clock.clone()),
        CoordinatorSettings {
            lock_wait: std::time::Duration::from_millis(50),
            ..CoordinatorSettings::default()
        },
    );

    Harness {
        coordinator: Arc::new(coordinator),
        repository,
        clock,
    }
}

async fn open_sale(h: &Harness, total_stock: u32) -> ActivityId {
    let now = h.clock.now();
    let activity = h
        .coordinator
        .create_activity(NewActivity {
            name: "Race Sale".to_string(),
            product_id: ProductId::new("sku-race"),
            original_price: Money::from_cents(600),
            seckill_price: Money::from_cents(300),
            total_stock,
            start_time: now,
            end_time: now + Duration::hours(2),
        })
        .await
        .unwrap();
    h.coordinator.start_activity(activity.id()).await.unwrap();
    activity.id()
}

async fn remaining(h: &Harness, activity_id: ActivityId) -> u32 {
    h.repository
        .load_activity(activity_id)
        .await
        .unwrap()
        .unwrap()
        .remaining_stock()
}

async fn order_status(h: &Harness, order_id: OrderId) -> OrderStatus {
    h.repository
        .load_order(order_id)
        .await
        .unwrap()
        .unwrap()
        .status()
}

#[tokio::test]
async fn release_cannot_slip_in_while_payment_commits() {
    let h = harness();
    let activity_id = open_sale(&h, 2).await;
    let order = h
        .coordinator
        .participate(UserId::new("alice"), activity_id, 1)
        .await
        .unwrap();

    h.repository.hold_next_commit();
    let coordinator = Arc::clone(&h.coordinator);
    let order_id = order.id();
    let payment = tokio::spawn(async move { coordinator.pay_order(order_id).await });
    h.repository.wait_until_parked().await;

    // The payment holds the activity lock until its commit lands
    let blocked = h.coordinator.cancel_order_and_release(order.id()).await;
    assert!(matches!(blocked, Err(SeckillError::LockTimeout { .. })));

    h.repository.release();
    let paid = payment.await.unwrap().unwrap();
    assert_eq!(paid.status(), OrderStatus::Paid);

    let late = h.coordinator.cancel_order_and_release(order.id()).await;
    assert_eq!(
        late.unwrap_err(),
        SeckillError::Validation(ValidationError::InvalidOrderTransition {
            from: OrderStatus::Paid,
            action: "cancel",
        })
    );
    assert_eq!(order_status(&h, order.id()).await, OrderStatus::Paid);
    assert_eq!(remaining(&h, activity_id).await, 1);

    // The paid unit stays sold
    let oversell = h
        .coordinator
        .participate(UserId::new("bob"), activity_id, 2)
        .await;
    assert_eq!(
        oversell.unwrap_err(),
        SeckillError::InsufficientStock {
            requested: 2,
            available: 1,
        }
    );
}

#[tokio::test]
async fn payment_after_release_is_rejected() {
    let h = harness();
    let activity_id = open_sale(&h, 2).await;
    let order = h
        .coordinator
        .participate(UserId::new("alice"), activity_id, 1)
        .await
        .unwrap();

    h.repository.hold_next_commit();
    let coordinator = Arc::clone(&h.coordinator);
    let order_id = order.id();
    let release =
        tokio::spawn(async move { coordinator.cancel_order_and_release(order_id).await });
    h.repository.wait_until_parked().await;

    let blocked = h.coordinator.pay_order(order.id()).await;
    assert!(matches!(blocked, Err(SeckillError::LockTimeout { .. })));

    h.repository.release();
    let (cancelled, activity) = release.await.unwrap().unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    assert_eq!(activity.remaining_stock(), 2);

    let late = h.coordinator.pay_order(order.id()).await;
    assert_eq!(
        late.unwrap_err(),
        SeckillError::Validation(ValidationError::InvalidOrderTransition {
            from: OrderStatus::Cancelled,
            action: "pay",
        })
    );
    assert_eq!(order_status(&h, order.id()).await, OrderStatus::Cancelled);
    assert_eq!(remaining(&h, activity_id).await, 2);
}

#[tokio::test]
async fn reaper_skips_an_order_paid_during_its_sweep() {
    let h = harness();
    let activity_id = open_sale(&h, 2).await;
    let order = h
        .coordinator
        .participate(UserId::new("alice"), activity_id, 1)
        .await
        .unwrap();

    h.repository.hold_next_commit();
    let coordinator = Arc::clone(&h.coordinator);
    let order_id = order.id();
    let payment = tokio::spawn(async move { coordinator.pay_order(order_id).await });
    h.repository.wait_until_parked().await;

    // The order looks stale to the reaper, but the payment owns the lock
    h.clock.advance(Duration::minutes(PAYMENT_TIMEOUT + 1));
    let timeout = Duration::minutes(PAYMENT_TIMEOUT);
    let blocked = h.coordinator.expire_stale_orders(timeout).await;
    assert!(matches!(blocked, Err(SeckillError::LockTimeout { .. })));

    h.repository.release();
    let paid = payment.await.unwrap().unwrap();
    assert_eq!(paid.status(), OrderStatus::Paid);

    let expired = h.coordinator.expire_stale_orders(timeout).await.unwrap();
    assert!(expired.is_empty());
    assert_eq!(order_status(&h, order.id()).await, OrderStatus::Paid);
    assert_eq!(remaining(&h, activity_id).await, 1);

    let report = h.coordinator.activity_report(activity_id).await.unwrap();
    assert_eq!(report.sold, 1);
    assert_eq!(report.expired_orders, 0);
}
