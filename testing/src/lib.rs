//! # Flash-Sale Testing
//!
//! Testing utilities and test doubles for the flash-sale crates.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - A publisher that records everything it is given ([`RecordingPublisher`])
//! - A one-line tracing setup for tests ([`helpers::init_test_tracing`])
//!
//! ## Example
//!
//! ```
//! use flashsale_testing::{ManualClock, test_clock};
//! use flashsale_core::environment::Clock;
//! use chrono::Duration;
//!
//! let clock = ManualClock::new(test_clock().now());
//! let before = clock.now();
//! clock.advance(Duration::minutes(5));
//! assert_eq!(clock.now() - before, Duration::minutes(5));
//! ```

use chrono::{DateTime, Utc};
use flashsale_core::environment::Clock;

/// Mock implementations of the core traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use flashsale_core::event::SerializedEvent;
    use flashsale_core::publisher::{EventPublisher, PublishError};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to.
    ///
    /// Shared between clones, so a test can hand one copy to the code under
    /// test and advance time through another.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a manual clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward (or backward, with a negative duration).
        pub fn advance(&self, by: chrono::Duration) {
            let mut guard = self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, time: DateTime<Utc>) {
            let mut guard = self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *guard = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Publisher that keeps every published event in memory.
    ///
    /// Can be switched into a failing mode to exercise publish-error paths.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingPublisher {
        published: Arc<Mutex<Vec<(String, SerializedEvent)>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingPublisher {
        /// Create an empty recording publisher.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent publish fail (or succeed again).
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// All `(topic, event)` pairs published so far, in order.
        #[must_use]
        pub fn published(&self) -> Vec<(String, SerializedEvent)> {
            self.published
                .lock()
                .map(|events| events.clone())
                .unwrap_or_default()
        }

        /// Event type names published so far, in order.
        #[must_use]
        pub fn event_types(&self) -> Vec<String> {
            self.published()
                .into_iter()
                .map(|(_, event)| event.event_type)
                .collect()
        }

        /// Number of published events with the given type name.
        #[must_use]
        pub fn count_of(&self, event_type: &str) -> usize {
            self.published()
                .iter()
                .filter(|(_, event)| event.event_type == event_type)
                .count()
        }

        /// Forget everything recorded so far.
        pub fn clear(&self) {
            if let Ok(mut events) = self.published.lock() {
                events.clear();
            }
        }
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(
            &self,
            topic: &str,
            event: &SerializedEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>> {
            let topic = topic.to_string();
            let event = event.clone();
            Box::pin(async move {
                if self.failing.load(Ordering::SeqCst) {
                    return Err(PublishError::PublishFailed {
                        topic,
                        reason: "recording publisher set to fail".to_string(),
                    });
                }

                let mut events = self.published.lock().map_err(|_| PublishError::PublishFailed {
                    topic: topic.clone(),
                    reason: "mutex poisoned".to_string(),
                })?;
                events.push((topic, event));
                Ok(())
            })
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a `tracing` subscriber for tests, honouring `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs anything.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, RecordingPublisher, test_clock};
