//! Aggregates for the flash-sale domain.
//!
//! Both aggregates are plain state machines: every mutator takes the current
//! time, validates, mutates, and appends to a private event buffer. Locking,
//! persistence and publishing live in the coordinator.

pub mod activity;
pub mod order;

pub use activity::{NewActivity, SeckillActivity};
pub use order::SeckillOrder;
