//! # Flash-Sale Redis
//!
//! Redis implementation of [`DistributedLock`](flashsale_core::lock::DistributedLock)
//! for deployments where several processes reserve stock against the same
//! activities.
//!
//! # Protocol
//!
//! | Operation | Redis command |
//! |-----------|---------------|
//! | acquire   | `SET key token NX PX lease` (polled with backoff until the wait runs out) |
//! | release   | Lua: `DEL key` only if `GET key == token` |
//! | extend    | Lua: `PEXPIRE key lease` only if `GET key == token` |
//!
//! Tokens are random UUIDs, so a process whose lease expired cannot release
//! or renew a lock that has since been handed to someone else.
//!
//! # Example
//!
//! ```no_run
//! use flashsale_core::lock::DistributedLock;
//! use flashsale_redis::RedisLock;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let lock = RedisLock::new("redis://127.0.0.1:6379").await?;
//!
//! let key = "seckill:lock:activity:42";
//! let token = lock
//!     .acquire(key, Duration::from_secs(5), Duration::from_secs(2))
//!     .await?;
//! // ... critical section ...
//! lock.release(key, &token).await?;
//! # Ok(())
//! # }
//! ```

mod lock;

pub use lock::RedisLock;
