//! `SET NX PX` lock with owner tokens.

use flashsale_core::lock::{DistributedLock, LockError, LockFuture, LockToken};
use flashsale_core::retry::RetryPolicy;
use redis::Client;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Deletes the key only while it still holds the caller's token.
const RELEASE_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    else
        return 0
    end
";

/// Resets the TTL only while the key still holds the caller's token.
const EXTEND_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('PEXPIRE', KEYS[1], ARGV[2])
    else
        return 0
    end
";

/// Redis-backed [`DistributedLock`].
///
/// Cheap to clone: clones share the underlying [`ConnectionManager`].
#[derive(Clone)]
pub struct RedisLock {
    /// Connection manager for connection pooling and reconnects.
    conn_manager: ConnectionManager,
    /// Spacing between `SET NX` attempts while the key is held.
    retry_policy: RetryPolicy,
    release_script: redis::Script,
    extend_script: redis::Script,
}

impl RedisLock {
    /// Connect to Redis with the default polling policy.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Backend`] if the URL is invalid or the initial
    /// connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, LockError> {
        let client = Client::open(redis_url)
            .map_err(|e| LockError::Backend(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            LockError::Backend(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!(redis_url, "Connected Redis lock backend");

        Ok(Self {
            conn_manager,
            retry_policy: RetryPolicy::builder()
                .max_retries(usize::MAX)
                .initial_delay(Duration::from_millis(5))
                .max_delay(Duration::from_millis(100))
                .build(),
            release_script: redis::Script::new(RELEASE_SCRIPT),
            extend_script: redis::Script::new(EXTEND_SCRIPT),
        })
    }

    /// Replace the backoff used between acquisition attempts.
    ///
    /// Only the delays matter; the bounded wait passed to `acquire` decides
    /// when to give up.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Lease in milliseconds as Redis expects it (`PX` rejects 0).
    fn lease_millis(lease: Duration) -> u64 {
        u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1)
    }

    async fn try_set(
        &self,
        key: &str,
        token: &LockToken,
        lease: Duration,
    ) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn_manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(Self::lease_millis(lease))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

impl DistributedLock for RedisLock {
    fn acquire<'a>(
        &'a self,
        key: &'a str,
        lease: Duration,
        wait_timeout: Duration,
    ) -> LockFuture<'a, LockToken> {
        Box::pin(async move {
            let started = Instant::now();
            let deadline = started + wait_timeout;
            let token = LockToken::new(uuid::Uuid::new_v4().to_string());
            let mut attempt = 0;

            loop {
                match self.try_set(key, &token, lease).await {
                    Ok(true) => {
                        tracing::debug!(
                            key,
                            attempts = attempt + 1,
                            waited_ms = started.elapsed().as_millis(),
                            "Acquired Redis lock"
                        );
                        return Ok(token);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        // Connection hiccups are retried until the wait runs out.
                        tracing::warn!(key, error = %e, "Redis error while acquiring lock");
                    }
                }

                let now = Instant::now();
                if now >= deadline {
                    return Err(LockError::Timeout {
                        key: key.to_string(),
                        waited: started.elapsed(),
                    });
                }

                let delay = self.retry_policy.delay_for_attempt(attempt);
                sleep(delay.min(deadline - now)).await;
                attempt += 1;
            }
        })
    }

    fn release<'a>(&'a self, key: &'a str, token: &'a LockToken) -> LockFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let deleted: i64 = self
                .release_script
                .key(key)
                .arg(token.as_str())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend(format!("Failed to release lock '{key}': {e}")))?;

            if deleted == 0 {
                tracing::debug!(key, "Release skipped, token no longer holds the lock");
            } else {
                tracing::debug!(key, "Released Redis lock");
            }
            Ok(())
        })
    }

    fn extend<'a>(
        &'a self,
        key: &'a str,
        token: &'a LockToken,
        lease: Duration,
    ) -> LockFuture<'a, bool> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let extended: i64 = self
                .extend_script
                .key(key)
                .arg(token.as_str())
                .arg(Self::lease_millis(lease))
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LockError::Backend(format!("Failed to extend lock '{key}': {e}")))?;

            Ok(extended == 1)
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    // Note: These tests require a running Redis instance
    // Run with: docker run -d -p 6379:6379 redis:7-alpine

    fn test_key(label: &str) -> String {
        format!("test:seckill:lock:{label}:{}", uuid::Uuid::new_v4())
    }

    #[test]
    fn lease_millis_never_zero() {
        assert_eq!(RedisLock::lease_millis(Duration::ZERO), 1);
        assert_eq!(RedisLock::lease_millis(Duration::from_secs(5)), 5000);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn acquire_then_release_allows_reacquire() {
        let lock = RedisLock::new("redis://127.0.0.1:6379").await.unwrap();
        let key = test_key("reacquire");

        let token = lock
            .acquire(&key, Duration::from_secs(5), Duration::from_millis(100))
            .await
            .unwrap();
        lock.release(&key, &token).await.unwrap();

        let again = lock
            .acquire(&key, Duration::from_secs(5), Duration::from_millis(100))
            .await
            .unwrap();
        assert_ne!(token, again);
        lock.release(&key, &again).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn held_key_times_out() {
        let lock = RedisLock::new("redis://127.0.0.1:6379").await.unwrap();
        let key = test_key("timeout");

        let token = lock
            .acquire(&key, Duration::from_secs(5), Duration::from_millis(100))
            .await
            .unwrap();

        let result = lock
            .acquire(&key, Duration::from_secs(5), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(LockError::Timeout { .. })));

        lock.release(&key, &token).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn foreign_token_cannot_release_or_extend() {
        let lock = RedisLock::new("redis://127.0.0.1:6379").await.unwrap();
        let key = test_key("foreign");

        let token = lock
            .acquire(&key, Duration::from_secs(5), Duration::from_millis(100))
            .await
            .unwrap();
        let stranger = LockToken::new("not-the-owner");

        lock.release(&key, &stranger).await.unwrap();
        assert!(!lock.extend(&key, &stranger, Duration::from_secs(5)).await.unwrap());

        // Still held by the real owner
        let result = lock
            .acquire(&key, Duration::from_secs(5), Duration::from_millis(30))
            .await;
        assert!(result.is_err());

        assert!(lock.extend(&key, &token, Duration::from_secs(5)).await.unwrap());
        lock.release(&key, &token).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn expired_lease_frees_the_key() {
        let lock = RedisLock::new("redis://127.0.0.1:6379").await.unwrap();
        let key = test_key("expiry");

        let _abandoned = lock
            .acquire(&key, Duration::from_millis(50), Duration::from_millis(100))
            .await
            .unwrap();

        let token = lock
            .acquire(&key, Duration::from_secs(5), Duration::from_millis(500))
            .await
            .unwrap();
        lock.release(&key, &token).await.unwrap();
    }
}
