//! In-process activity lock and lease renewal.
//!
//! [`LocalLock`] implements [`DistributedLock`] for single-process
//! deployments: one holder table keyed by lock key, so different activities
//! never contend. Multi-process deployments use `flashsale_redis::RedisLock`
//! with identical keys.
//!
//! [`LeaseWatchdog`] keeps a lease alive while a long critical section runs.

use flashsale_core::lock::{DistributedLock, LockError, LockFuture, LockToken};
use flashsale_core::retry::RetryPolicy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug)]
struct Holder {
    token: LockToken,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    holder: Option<Holder>,
    released: Arc<Notify>,
}

enum Attempt {
    Acquired(LockToken),
    Held(Arc<Notify>),
}

/// Keyed in-process lock with leases and owner tokens.
///
/// Waiters are woken on release and otherwise poll on the configured backoff,
/// which is also how expired leases get noticed.
#[derive(Debug)]
pub struct LocalLock {
    slots: Mutex<HashMap<String, Slot>>,
    retry_policy: RetryPolicy,
}

impl LocalLock {
    /// Create a lock that polls with `retry_policy` delays while a key is held.
    #[must_use]
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            retry_policy,
        }
    }

    /// Number of keys currently held (expired leases included until touched)
    #[must_use]
    pub fn held_keys(&self) -> usize {
        self.slots
            .lock()
            .map_or(0, |slots| slots.values().filter(|s| s.holder.is_some()).count())
    }

    fn poisoned() -> LockError {
        LockError::Backend("local lock table poisoned".to_string())
    }

    fn try_acquire(&self, key: &str, lease: Duration) -> Result<Attempt, LockError> {
        let mut slots = self.slots.lock().map_err(|_| Self::poisoned())?;
        let slot = slots.entry(key.to_string()).or_default();
        let now = Instant::now();

        if let Some(holder) = &slot.holder {
            if holder.expires_at > now {
                return Ok(Attempt::Held(Arc::clone(&slot.released)));
            }
            tracing::warn!(key, "Taking over lock whose lease expired");
        }

        let token = LockToken::new(uuid::Uuid::new_v4().to_string());
        slot.holder = Some(Holder {
            token: token.clone(),
            expires_at: now + lease,
        });
        Ok(Attempt::Acquired(token))
    }
}

impl Default for LocalLock {
    fn default() -> Self {
        Self::new(
            RetryPolicy::builder()
                .max_retries(usize::MAX)
                .initial_delay(Duration::from_millis(5))
                .max_delay(Duration::from_millis(100))
                .build(),
        )
    }
}

impl DistributedLock for LocalLock {
    fn acquire<'a>(
        &'a self,
        key: &'a str,
        lease: Duration,
        wait_timeout: Duration,
    ) -> LockFuture<'a, LockToken> {
        Box::pin(async move {
            let started = Instant::now();
            let deadline = started + wait_timeout;
            let mut attempt = 0;

            loop {
                let released = match self.try_acquire(key, lease)? {
                    Attempt::Acquired(token) => {
                        tracing::debug!(
                            key,
                            attempts = attempt + 1,
                            waited_ms = started.elapsed().as_millis(),
                            "Acquired local lock"
                        );
                        return Ok(token);
                    }
                    Attempt::Held(released) => released,
                };

                let now = Instant::now();
                if now >= deadline {
                    return Err(LockError::Timeout {
                        key: key.to_string(),
                        waited: started.elapsed(),
                    });
                }

                let pause = self.retry_policy.delay_for_attempt(attempt).min(deadline - now);
                // Either a release wakes us or the pause runs out; both mean retry.
                let _ = tokio::time::timeout(pause, released.notified()).await;
                attempt += 1;
            }
        })
    }

    fn release<'a>(&'a self, key: &'a str, token: &'a LockToken) -> LockFuture<'a, ()> {
        Box::pin(async move {
            let mut slots = self.slots.lock().map_err(|_| Self::poisoned())?;
            let owned = slots
                .get(key)
                .and_then(|slot| slot.holder.as_ref())
                .is_some_and(|holder| &holder.token == token);

            if owned {
                if let Some(slot) = slots.remove(key) {
                    slot.released.notify_waiters();
                }
                tracing::debug!(key, "Released local lock");
            } else {
                tracing::debug!(key, "Release skipped, token no longer holds the lock");
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
            let mut slots = self.slots.lock().map_err(|_| Self::poisoned())?;
            let now = Instant::now();

            let holder = slots.get_mut(key).and_then(|slot| slot.holder.as_mut());
            match holder {
                Some(holder) if &holder.token == token && holder.expires_at > now => {
                    holder.expires_at = now + lease;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}

/// Background task renewing a held lease every `interval`.
///
/// Stops on [`LeaseWatchdog::stop`] or when dropped. If renewal reports that
/// ownership was lost the watchdog logs it, flags it and exits.
#[derive(Debug)]
pub struct LeaseWatchdog {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    lost: Arc<AtomicBool>,
}

impl LeaseWatchdog {
    /// Spawn the renewal task on the current tokio runtime.
    #[must_use]
    pub fn spawn(
        lock: Arc<dyn DistributedLock>,
        key: String,
        token: LockToken,
        lease: Duration,
        interval: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    () = tokio::time::sleep(interval) => {
                        match lock.extend(&key, &token, lease).await {
                            Ok(true) => tracing::trace!(key = %key, "Renewed lock lease"),
                            Ok(false) => {
                                tracing::error!(key = %key, "Lost lock ownership before release");
                                lost_flag.store(true, Ordering::SeqCst);
                                break;
                            }
                            Err(e) => {
                                tracing::warn!(key = %key, error = %e, "Failed to renew lock lease");
                            }
                        }
                    }
                }
            }
        });

        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
            lost,
        }
    }

    /// True once a renewal found the lock held by someone else (or expired)
    #[must_use]
    pub fn ownership_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Stop renewing and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Lease watchdog task failed");
            }
        }
    }
}

impl Drop for LeaseWatchdog {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
