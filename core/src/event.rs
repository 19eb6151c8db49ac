//! Event trait and related types for domain events.
//!
//! Events represent facts about things that have happened in the past and are
//! immutable. Aggregates accumulate them while handling an operation; the
//! application layer drains them after a successful commit and hands them to an
//! [`EventPublisher`](crate::publisher::EventPublisher).
//!
//! # Design
//!
//! Events are serialized with `bincode`. They are not human-readable on the
//! wire, but every consumer in this system is a Rust service and the format is
//! small and fast.
//!
//! # Example
//!
//! ```
//! use flashsale_core::event::Event;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum StockEvent {
//!     Reserved { quantity: u32 },
//!     Released { quantity: u32 },
//! }
//!
//! impl Event for StockEvent {
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             StockEvent::Reserved { .. } => "StockReserved.v1",
//!             StockEvent::Released { .. } => "StockReleased.v1",
//!         }
//!     }
//! }
//! ```

use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),
}

/// A domain event that can be serialized and forwarded to external consumers.
///
/// # Event Naming Convention
///
/// `event_type()` returns a stable identifier with a version suffix so that
/// consumers can evolve independently:
///
/// - `"ActivityStarted.v1"`
/// - `"OrderPaid.v1"`
///
/// # Thread Safety
///
/// Events must be `Send + Sync + 'static` so they can cross task boundaries.
pub trait Event: Send + Sync + 'static {
    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes do not decode into
    /// this event type (corruption, wrong type, incompatible schema change).
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// A serialized event ready for publishing.
///
/// Contains the event type name, the serialized bytes, and optional JSON
/// metadata (aggregate id, correlation id, ...).
#[derive(Clone, Debug, PartialEq)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., "StockReserved.v1").
    pub event_type: String,

    /// The bincode-serialized event data.
    pub data: Vec<u8>,

    /// Optional metadata.
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Create a serialized event from an [`Event`].
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    ///
    /// # Examples
    ///
    /// ```
    /// use flashsale_core::event::{Event, SerializedEvent};
    /// # use serde::{Serialize, Deserialize};
    /// # #[derive(Clone, Debug, Serialize, Deserialize)]
    /// # enum StockEvent { Reserved { quantity: u32 } }
    /// # impl Event for StockEvent {
    /// #     fn event_type(&self) -> &'static str { "StockReserved.v1" }
    /// # }
    ///
    /// let event = StockEvent::Reserved { quantity: 2 };
    /// let serialized = SerializedEvent::from_event(&event, None).unwrap();
    /// assert_eq!(serialized.event_type, "StockReserved.v1");
    /// ```
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
            metadata,
        })
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}
