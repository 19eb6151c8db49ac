//! Flash-sale (seckill) core - oversell-free stock reservation under contention.
//!
//! A seckill activity offers a fixed number of units of one product at a
//! discounted price inside a time window. Large numbers of users compete for
//! those units at once; every successful participation reserves stock and
//! creates a pending order that is later paid, cancelled, or expired.
//!
//! # Architecture
//!
//! ```text
//!           participate(user, activity, qty)
//!                         │
//!                         ▼
//!        ┌──────────────────────────────────┐
//!        │   StockReservationCoordinator    │
//!        │                                  │
//!        │  lock(activity) ─▶ load ─▶ mutate│
//!        │        ▲                     │   │
//!        │        └── release ◀─ commit ┘   │
//!        └──────────────────────────────────┘
//!             │            │            │
//!             ▼            ▼            ▼
//!    DistributedLock  SeckillRepository  EventPublisher
//!    (LocalLock /     (in-memory)       (drained events,
//!     RedisLock)                         after release)
//! ```
//!
//! # Key Guarantee
//!
//! For any activity, `remaining_stock + sold == total_stock` and the sum of
//! quantities of all orders ever created never exceeds `total_stock`, no
//! matter how many callers race. Losers get
//! [`SeckillError::InsufficientStock`](error::SeckillError::InsufficientStock)
//! or a retryable [`SeckillError::LockTimeout`](error::SeckillError::LockTimeout).
//!
//! # Modules
//!
//! - [`types`]: identifiers, money, statuses
//! - [`aggregates`]: `SeckillActivity` and `SeckillOrder` state machines
//! - [`events`]: domain events drained from aggregates
//! - [`repository`]: persistence contract and in-memory store
//! - [`lock`]: in-process lock and lease watchdog
//! - [`coordinator`]: the serialized read-modify-write path
//! - [`config`]: environment configuration
//! - [`metrics`]: business metrics

pub mod aggregates;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod lock;
pub mod metrics;
pub mod repository;
pub mod types;

pub use aggregates::{NewActivity, SeckillActivity, SeckillOrder};
pub use config::{Config, ConfigError, LockBackend};
pub use coordinator::{ActivityReport, CoordinatorSettings, StockReservationCoordinator};
pub use error::{Result, SeckillError, ValidationError};
pub use events::SeckillEvent;
pub use lock::{LeaseWatchdog, LocalLock};
pub use repository::{InMemorySeckillRepository, RepositoryError, SeckillRepository, UnitOfWork};
pub use types::{ActivityId, ActivityStatus, EndReason, Money, OrderId, OrderStatus, ProductId, UserId};
