//! # Flash-Sale Core
//!
//! Core traits and types shared by the flash-sale crates.
//!
//! The domain crate (`seckill`) depends only on the seams defined here, so the
//! infrastructure behind them can be swapped without touching business logic:
//!
//! - **Clock**: where "now" comes from ([`environment::Clock`])
//! - **Event**: versioned, binary-serializable domain events ([`event::Event`])
//! - **Publisher**: the sink that drained events are forwarded to ([`publisher::EventPublisher`])
//! - **Lock**: keyed mutual exclusion with leases ([`lock::DistributedLock`])
//! - **Retry**: exponential backoff used by lock polling and by callers ([`retry::RetryPolicy`])
//!
//! ## Architecture Principles
//!
//! - Pure aggregates, imperative coordinator
//! - Explicit effects: events are returned to the caller, never published implicitly
//! - Dependency injection via trait objects (`Arc<dyn Trait>`)

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod event;
pub mod lock;
pub mod publisher;
pub mod retry;

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// into the coordinator at construction time.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use flashsale_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
