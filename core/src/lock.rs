//! Keyed mutual exclusion with leases.
//!
//! A [`DistributedLock`] hands out exclusive ownership of a string key for a
//! bounded lease. Every acquisition attempt has a bounded wait, and ownership
//! is proven with a [`LockToken`] so that only the acquirer can release or
//! renew the lock.
//!
//! # Contract
//!
//! - `acquire(key, lease, wait)` returns a fresh token, or [`LockError::Timeout`]
//!   once `wait` has elapsed without success.
//! - A lease that is not released expires on its own (crash safety).
//! - `release(key, token)` is idempotent and a no-op when `token` is not the
//!   current holder (for example after the lease expired and someone else
//!   acquired the key).
//! - `extend(key, token, lease)` resets the lease to `lease` from now and
//!   returns `false` when `token` no longer holds the key.
//!
//! # Implementations
//!
//! - `LocalLock` (crate `seckill`): in-process, one table of keys per process
//! - `RedisLock` (crate `flashsale-redis`): cross-process via Redis `SET NX PX`

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Proof of ownership for an acquired lock.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Wrap an owner token produced by a lock implementation.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur during lock operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The lock could not be acquired within the bounded wait.
    #[error("Timed out after {waited:?} waiting for lock '{key}'")]
    Timeout {
        /// The contended key
        key: String,
        /// How long the caller waited
        waited: Duration,
    },

    /// The backing store failed (connection, script error, poisoned state).
    #[error("Lock backend error: {0}")]
    Backend(String),
}

/// Boxed future returned by [`DistributedLock`] methods.
pub type LockFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LockError>> + Send + 'a>>;

/// Keyed mutual exclusion with leases and owner tokens.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the lock can be shared as
/// `Arc<dyn DistributedLock>`.
pub trait DistributedLock: Send + Sync {
    /// Acquire exclusive ownership of `key` for `lease`, waiting at most `wait_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the key stays held for the whole wait,
    /// or [`LockError::Backend`] if the backing store fails in a way the
    /// implementation does not treat as transient.
    fn acquire<'a>(
        &'a self,
        key: &'a str,
        lease: Duration,
        wait_timeout: Duration,
    ) -> LockFuture<'a, LockToken>;

    /// Release `key` if `token` still holds it. No-op otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Backend`] if the backing store fails.
    fn release<'a>(&'a self, key: &'a str, token: &'a LockToken) -> LockFuture<'a, ()>;

    /// Reset the lease of `key` to `lease` from now if `token` still holds it.
    ///
    /// Returns `false` when ownership has been lost.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Backend`] if the backing store fails.
    fn extend<'a>(
        &'a self,
        key: &'a str,
        token: &'a LockToken,
        lease: Duration,
    ) -> LockFuture<'a, bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_error_display() {
        let error = LockError::Timeout {
            key: "seckill:lock:activity:42".to_string(),
            waited: Duration::from_millis(250),
        };

        let display = format!("{error}");
        assert!(display.contains("seckill:lock:activity:42"));
        assert!(display.contains("250ms"));
    }

    #[test]
    fn token_round_trips_through_display() {
        let token = LockToken::new("owner-1");
        assert_eq!(token.to_string(), "owner-1");
        assert_eq!(token.as_str(), "owner-1");
    }
}
