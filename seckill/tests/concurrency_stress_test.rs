//! Concurrency stress tests for flash-sale stock.
//!
//! Many buyers race for a handful of units. Whatever the interleaving, the
//! units handed out never exceed the stock and the counters stay consistent.
//!
//! Run with: `cargo test --test concurrency_stress_test -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/expect

use chrono::Duration;
use flashsale_core::environment::{Clock, SystemClock};
use flashsale_core::lock::DistributedLock;
use flashsale_core::publisher::{EventPublisher, NoopPublisher};
use flashsale_testing::helpers::init_test_tracing;
use flashsale_core::retry::{RetryPolicy, retry_with_predicate};
use seckill::{
    ActivityId, ActivityStatus, CoordinatorSettings, InMemorySeckillRepository, LocalLock, Money,
    NewActivity, ProductId, SeckillError, SeckillOrder, SeckillRepository,
    StockReservationCoordinator, UserId,
};
use std::sync::Arc;

struct Harness {
    coordinator: Arc<StockReservationCoordinator>,
    repository: Arc<InMemorySeckillRepository>,
    lock: Arc<LocalLock>,
}

fn harness() -> Harness {
    init_test_tracing();
    let repository = Arc::new(InMemorySeckillRepository::new());
    let lock = Arc::new(LocalLock::default());

    let coordinator = StockReservationCoordinator::new(
        Arc::clone(&repository) as Arc<dyn SeckillRepository>,
        Arc::clone(&lock) as Arc<dyn DistributedLock>,
        Arc::new(NoopPublisher) as Arc<dyn EventPublisher>,
        Arc::new(SystemClock),
        CoordinatorSettings {
            // Generous wait so that no buyer gives up during the test
            lock_wait: std::time::Duration::from_secs(10),
            ..CoordinatorSettings::default()
        },
    );

    Harness {
        coordinator: Arc::new(coordinator),
        repository,
        lock,
    }
}

async fn open_sale(h: &Harness, total_stock: u32) -> ActivityId {
    let now = SystemClock.now();
    let activity = h
        .coordinator
        .create_activity(NewActivity {
            name: "Stress Sale".to_string(),
            product_id: ProductId::new("sku-stress"),
            original_price: Money::from_cents(2000),
            seckill_price: Money::from_cents(999),
            total_stock,
            start_time: now - Duration::minutes(1),
            end_time: now + Duration::hours(1),
        })
        .await
        .unwrap();
    h.coordinator.start_activity(activity.id()).await.unwrap();
    activity.id()
}

async fn race(
    h: &Harness,
    activity_id: ActivityId,
    buyers: usize,
    quantity: u32,
) -> Vec<Result<SeckillOrder, SeckillError>> {
    let handles: Vec<_> = (0..buyers)
        .map(|i| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move {
                coordinator
                    .participate(UserId::new(format!("buyer-{i}")), activity_id, quantity)
                    .await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(buyers);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

/// Test: 100 concurrent buyers for 10 units.
///
/// Verifies that:
/// - Exactly 10 orders are created
/// - Exactly 90 buyers are told the stock ran out
/// - The activity ends sold out with consistent counters
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn hundred_buyers_ten_units() {
    let h = harness();
    let activity_id = open_sale(&h, 10).await;

    let results = race(&h, activity_id, 100, 1).await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let sold_out = results
        .iter()
        .filter(|r| matches!(r, Err(SeckillError::InsufficientStock { .. })))
        .count();
    println!("winners: {winners}, sold out: {sold_out}");
    assert_eq!(winners, 10, "Exactly 10 buyers should get a unit");
    assert_eq!(sold_out, 90, "Every other buyer should see the shortage");

    let activity = h.repository.load_activity(activity_id).await.unwrap().unwrap();
    assert_eq!(activity.remaining_stock(), 0);
    assert_eq!(activity.sold(), 10);
    assert_eq!(activity.status(), ActivityStatus::Ended);

    let orders = h.repository.orders_for_activity(activity_id).await.unwrap();
    assert_eq!(orders.len(), 10);
    let units: u32 = orders.iter().map(SeckillOrder::quantity).sum();
    assert_eq!(units, 10);

    assert_eq!(h.lock.held_keys(), 0, "Every lock should be released");
}

/// Test: mixed quantities never overshoot the stock.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn mixed_quantities_never_oversell() {
    let h = harness();
    let activity_id = open_sale(&h, 25).await;

    let handles: Vec<_> = (0..60u32)
        .map(|i| {
            let coordinator = Arc::clone(&h.coordinator);
            tokio::spawn(async move {
                coordinator
                    .participate(UserId::new(format!("buyer-{i}")), activity_id, i % 3 + 1)
                    .await
            })
        })
        .collect();

    let mut reserved = 0;
    for handle in handles {
        if let Ok(order) = handle.await.unwrap() {
            reserved += order.quantity();
        }
    }

    let activity = h.repository.load_activity(activity_id).await.unwrap().unwrap();
    assert!(reserved <= 25, "Reserved {reserved} units out of 25");
    assert_eq!(activity.sold(), reserved);
    assert_eq!(activity.remaining_stock() + activity.sold(), activity.total_stock());

    let orders = h.repository.orders_for_activity(activity_id).await.unwrap();
    let units: u32 = orders.iter().map(SeckillOrder::quantity).sum();
    assert_eq!(units, reserved);
}

/// Test: buyers racing with cancellations keep the counters consistent.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn cancellations_racing_buyers_stay_consistent() {
    let h = harness();
    let activity_id = open_sale(&h, 20).await;

    let first_wave = race(&h, activity_id, 10, 1).await;
    let to_cancel: Vec<_> = first_wave
        .into_iter()
        .map(|r| r.unwrap().id())
        .collect();

    let mut handles = Vec::new();
    for order_id in to_cancel {
        let coordinator = Arc::clone(&h.coordinator);
        handles.push(tokio::spawn(async move {
            coordinator.cancel_order_and_release(order_id).await.map(|_| 0_u32)
        }));
    }
    for i in 0..20 {
        let coordinator = Arc::clone(&h.coordinator);
        handles.push(tokio::spawn(async move {
            coordinator
                .participate(UserId::new(format!("late-{i}")), activity_id, 1)
                .await
                .map(|o| o.quantity())
        }));
    }
    for handle in handles {
        let _ = handle.await.unwrap();
    }

    let activity = h.repository.load_activity(activity_id).await.unwrap().unwrap();
    let orders = h.repository.orders_for_activity(activity_id).await.unwrap();
    let live_units: u32 = orders
        .iter()
        .filter(|o| o.status() == seckill::OrderStatus::Pending)
        .map(SeckillOrder::quantity)
        .sum();

    assert_eq!(activity.sold(), live_units);
    assert!(activity.sold() <= activity.total_stock());
}

/// Test: activities are locked independently.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn separate_activities_sell_out_independently() {
    let h = harness();
    let first = open_sale(&h, 5).await;
    let second = open_sale(&h, 7).await;

    let (a, b) = tokio::join!(race(&h, first, 30, 1), race(&h, second, 30, 1));

    assert_eq!(a.iter().filter(|r| r.is_ok()).count(), 5);
    assert_eq!(b.iter().filter(|r| r.is_ok()).count(), 7);
}

/// Test: with a short lock wait, losers of the lock race can retry.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn lock_timeouts_are_retryable() {
    let repository = Arc::new(InMemorySeckillRepository::new());
    let h = Harness {
        coordinator: Arc::new(StockReservationCoordinator::new(
            Arc::clone(&repository) as Arc<dyn SeckillRepository>,
            Arc::new(LocalLock::default()),
            Arc::new(NoopPublisher),
            Arc::new(SystemClock),
            CoordinatorSettings {
                lock_wait: std::time::Duration::from_millis(1),
                ..CoordinatorSettings::default()
            },
        )),
        repository,
        lock: Arc::new(LocalLock::default()),
    };
    let activity_id = open_sale(&h, 10).await;

    let policy = RetryPolicy::builder()
        .max_retries(200)
        .initial_delay(std::time::Duration::from_millis(1))
        .max_delay(std::time::Duration::from_millis(20))
        .build();

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let coordinator = Arc::clone(&h.coordinator);
            let policy = policy.clone();
            tokio::spawn(async move {
                let user_id = UserId::new(format!("buyer-{i}"));
                retry_with_predicate(
                    &policy,
                    || coordinator.participate(user_id.clone(), activity_id, 1),
                    SeckillError::is_retryable,
                )
                .await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(SeckillError::InsufficientStock { .. }) => {}
            Err(e) => panic!("unexpected failure after retries: {e}"),
        }
    }

    assert_eq!(winners, 10);
    let activity = h.repository.load_activity(activity_id).await.unwrap().unwrap();
    assert_eq!(activity.remaining_stock(), 0);
}
