//! Event publisher abstraction for forwarding drained domain events.
//!
//! Aggregates never publish anything themselves. After a transaction commits,
//! the application layer drains each aggregate's pending events and forwards
//! them through an [`EventPublisher`] to whatever transport the deployment
//! uses (notification, analytics, inventory sync).
//!
//! ```text
//! ┌─────────────────┐
//! │   Aggregate     │  accumulates events in memory
//! └────────┬────────┘
//!          │ take_events()
//!          ▼
//! ┌─────────────────┐
//! │ 1. Commit to    │◄─── Source of truth
//! │   repository    │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ 2. Publish to   │◄─── Best effort, no retry imposed here
//! │   EventPublisher│
//! └─────────────────┘
//! ```
//!
//! # Topic Naming Convention
//!
//! Topics follow the pattern `{bounded-context}-{aggregate}-events`, e.g.
//! `seckill-activity-events` and `seckill-order-events`.
//!
//! # Implementations
//!
//! - `RecordingPublisher` in `flashsale-testing` captures events for assertions
//! - [`NoopPublisher`] drops everything (useful when nobody listens)

use crate::event::SerializedEvent;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur while publishing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to serialize the event before publishing
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Sink for drained domain events.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be held as `Arc<dyn EventPublisher>` by the coordinator.
pub trait EventPublisher: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::PublishFailed`] if the transport rejects the event.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>>;
}

/// Publisher that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>> {
        tracing::trace!(topic, event_type = %event.event_type, "Dropping event (no-op publisher)");
        Box::pin(async { Ok(()) })
    }
}
