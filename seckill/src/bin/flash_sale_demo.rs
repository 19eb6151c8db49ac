//! Flash Sale Demo
//!
//! Runs one flash sale end to end:
//! - Creates and starts an activity with 10 units
//! - Lets 100 concurrent buyers race for them
//! - Pays a few orders, cancels one, and expires the rest
//! - Prints the activity report
//!
//! # Usage
//!
//! ```bash
//! # In-process lock
//! cargo run --bin flash_sale_demo
//!
//! # Redis lock
//! docker compose up -d redis
//! SECKILL_LOCK_BACKEND=redis cargo run --bin flash_sale_demo
//! ```

use chrono::Duration as ChronoDuration;
use flashsale_core::environment::{Clock, SystemClock};
use flashsale_core::lock::DistributedLock;
use flashsale_core::publisher::NoopPublisher;
use flashsale_core::retry::{RetryPolicy, retry_with_predicate};
use flashsale_redis::RedisLock;
use seckill::metrics::register_business_metrics;
use seckill::{
    Config, InMemorySeckillRepository, LocalLock, LockBackend, Money, NewActivity, ProductId,
    SeckillError, StockReservationCoordinator, UserId,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BUYERS: usize = 100;
const STOCK: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    register_business_metrics();

    println!("\n============================================");
    println!("   Flash Sale - Live Demo");
    println!("============================================\n");

    let lock: Arc<dyn DistributedLock> = match config.lock.backend {
        LockBackend::Local => Arc::new(LocalLock::new(config.lock_retry_policy())),
        LockBackend::Redis => Arc::new(
            RedisLock::new(&config.redis.url)
                .await?
                .with_retry_policy(config.lock_retry_policy()),
        ),
    };
    println!("Lock backend: {:?}", config.lock.backend);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let coordinator = Arc::new(StockReservationCoordinator::new(
        Arc::new(InMemorySeckillRepository::new()),
        lock,
        Arc::new(NoopPublisher),
        Arc::clone(&clock),
        config.coordinator_settings(),
    ));

    // Step 1: create and open the sale
    let now = clock.now();
    let activity = coordinator
        .create_activity(NewActivity {
            name: "Midnight Headphones Drop".to_string(),
            product_id: ProductId::new("sku-headphones-01"),
            original_price: Money::from_cents(19_900),
            seckill_price: Money::from_cents(9_900),
            total_stock: STOCK,
            start_time: now,
            end_time: now + ChronoDuration::minutes(30),
        })
        .await?;
    let activity_id = activity.id();
    coordinator.start_activity(activity_id).await?;
    println!("1. Activity {activity_id} started with {STOCK} units\n");

    // Step 2: the rush
    println!("2. {BUYERS} buyers racing...");
    let retry = RetryPolicy::builder()
        .max_retries(5)
        .initial_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(200))
        .build();

    let attempts = (0..BUYERS).map(|i| {
        let coordinator = Arc::clone(&coordinator);
        let retry = retry.clone();
        tokio::spawn(async move {
            let user_id = UserId::new(format!("user-{i:03}"));
            retry_with_predicate(
                &retry,
                || coordinator.participate(user_id.clone(), activity_id, 1),
                SeckillError::is_retryable,
            )
            .await
        })
    });

    let mut orders = Vec::new();
    let mut sold_out = 0;
    let mut other_failures = 0;
    for outcome in futures::future::join_all(attempts).await {
        match outcome? {
            Ok(order) => orders.push(order),
            Err(SeckillError::InsufficientStock { .. }) => sold_out += 1,
            Err(e) => {
                tracing::warn!(error = %e, "Participation failed");
                other_failures += 1;
            }
        }
    }
    println!(
        "   {} orders created, {sold_out} buyers turned away, {other_failures} other failures\n",
        orders.len()
    );

    // Step 3: settle the orders
    println!("3. Settling orders...");
    let mut pending = orders.iter().map(seckill::SeckillOrder::id);
    for order_id in pending.by_ref().take(6) {
        coordinator.pay_order(order_id).await?;
    }
    if let Some(order_id) = pending.next() {
        let (_, activity) = coordinator.cancel_order_and_release(order_id).await?;
        println!(
            "   Order {order_id} cancelled, {} unit(s) now remaining",
            activity.remaining_stock()
        );
    }

    // Everything still pending counts as abandoned
    let expired = coordinator.expire_stale_orders(ChronoDuration::zero()).await?;
    println!("   {} unpaid orders expired\n", expired.len());

    // Step 4: report
    println!("4. Final report");
    let report = coordinator.activity_report(activity_id).await?;
    println!("{report}\n");

    Ok(())
}
