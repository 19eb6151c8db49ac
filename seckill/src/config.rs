//! Configuration management for the seckill service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Binaries call [`Config::load`], which first reads a `.env` file if present.

use crate::coordinator::CoordinatorSettings;
use flashsale_core::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Unknown lock backend name
    #[error("Unknown lock backend '{0}' (expected 'local' or 'redis')")]
    UnknownLockBackend(String),

    /// A duration that must be positive is zero
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// Renewal would not happen before the lease runs out
    #[error("Lock renew interval ({renew_ms}ms) must be shorter than the lease ({lease_ms}ms)")]
    RenewNotShorterThanLease {
        /// Renewal interval in milliseconds
        renew_ms: u64,
        /// Lease in milliseconds
        lease_ms: u64,
    },

    /// A lock timing is set but is not a whole number of milliseconds
    #[error("{name} must be a whole number of milliseconds, got '{value}'")]
    InvalidNumber {
        /// Variable name
        name: &'static str,
        /// Raw value as found in the environment
        value: String,
    },
}

/// Lock timings that must parse when present
const LOCK_TIMING_VARS: [&str; 3] = [
    "SECKILL_LOCK_LEASE_MS",
    "SECKILL_LOCK_WAIT_MS",
    "SECKILL_LOCK_RENEW_MS",
];

/// Which [`DistributedLock`](flashsale_core::lock::DistributedLock) to wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockBackend {
    /// In-process `LocalLock`
    Local,
    /// `RedisLock`, for several processes sharing activities
    Redis,
}

impl std::str::FromStr for LockBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::UnknownLockBackend(other.to_string())),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Activity lock configuration
    pub lock: LockConfig,
    /// Redis configuration (lock backend)
    pub redis: RedisConfig,
    /// Order configuration
    pub orders: OrderConfig,
    /// Log filter (`RUST_LOG` syntax)
    pub log_level: String,
}

/// Activity lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock implementation
    pub backend: LockBackend,
    /// Lease per acquired lock in milliseconds
    pub lease_ms: u64,
    /// Bounded acquisition wait in milliseconds
    pub wait_ms: u64,
    /// Watchdog renewal interval in milliseconds (0 disables renewal)
    pub renew_ms: u64,
    /// First polling delay while a key is held, in milliseconds
    pub retry_initial_ms: u64,
    /// Polling delay cap, in milliseconds
    pub retry_max_ms: u64,
    /// Lock key namespace
    pub key_prefix: String,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
}

/// Order configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    /// Pending orders older than this are expired by the reaper
    pub payment_timeout_secs: u64,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            lock: LockConfig {
                backend: env_parse("SECKILL_LOCK_BACKEND", LockBackend::Local),
                lease_ms: env_parse("SECKILL_LOCK_LEASE_MS", 5000),
                wait_ms: env_parse("SECKILL_LOCK_WAIT_MS", 2000),
                renew_ms: env_parse("SECKILL_LOCK_RENEW_MS", 0),
                retry_initial_ms: env_parse("SECKILL_LOCK_RETRY_INITIAL_MS", 5),
                retry_max_ms: env_parse("SECKILL_LOCK_RETRY_MAX_MS", 100),
                key_prefix: env::var("SECKILL_LOCK_KEY_PREFIX")
                    .unwrap_or_else(|_| "seckill:lock".to_string()),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            orders: OrderConfig {
                payment_timeout_secs: env_parse("SECKILL_ORDER_PAYMENT_TIMEOUT_SECS", 900),
            },
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Read `.env` (if any), load from the environment, and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if [`Config::check_raw_values`] or
    /// [`Config::validate`] rejects the values.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::check_raw_values(|name| env::var(name).ok())?;
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }

    /// Reject raw values that [`Config::from_env`] would silently replace
    /// with a default: the lock backend and the lock timings.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnknownLockBackend`] for an unrecognised backend
    /// - [`ConfigError::InvalidNumber`] for a lock timing that is not a `u64`
    pub fn check_raw_values(lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("SECKILL_LOCK_BACKEND") {
            raw.parse::<LockBackend>()?;
        }
        for name in LOCK_TIMING_VARS {
            match lookup(name) {
                Some(value) if value.parse::<u64>().is_err() => {
                    return Err(ConfigError::InvalidNumber { name, value });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ZeroDuration`] for a zero lease or wait
    /// - [`ConfigError::RenewNotShorterThanLease`] when renewal is enabled but
    ///   not shorter than the lease
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock.lease_ms == 0 {
            return Err(ConfigError::ZeroDuration("SECKILL_LOCK_LEASE_MS"));
        }
        if self.lock.wait_ms == 0 {
            return Err(ConfigError::ZeroDuration("SECKILL_LOCK_WAIT_MS"));
        }
        if self.lock.renew_ms != 0 && self.lock.renew_ms >= self.lock.lease_ms {
            return Err(ConfigError::RenewNotShorterThanLease {
                renew_ms: self.lock.renew_ms,
                lease_ms: self.lock.lease_ms,
            });
        }
        Ok(())
    }

    /// Backoff used while polling a held lock
    #[must_use]
    pub fn lock_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(usize::MAX)
            .initial_delay(Duration::from_millis(self.lock.retry_initial_ms))
            .max_delay(Duration::from_millis(self.lock.retry_max_ms))
            .build()
    }

    /// Coordinator settings derived from the lock configuration
    #[must_use]
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            lock_lease: Duration::from_millis(self.lock.lease_ms),
            lock_wait: Duration::from_millis(self.lock.wait_ms),
            renew_interval: (self.lock.renew_ms > 0)
                .then_some(Duration::from_millis(self.lock.renew_ms)),
            key_prefix: self.lock.key_prefix.clone(),
        }
    }

    /// Age after which a pending order is expired
    #[must_use]
    pub fn payment_timeout(&self) -> chrono::Duration {
        i64::try_from(self.orders.payment_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock: LockConfig {
                backend: LockBackend::Local,
                lease_ms: 5000,
                wait_ms: 2000,
                renew_ms: 0,
                retry_initial_ms: 5,
                retry_max_ms: 100,
                key_prefix: "seckill:lock".to_string(),
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
            },
            orders: OrderConfig {
                payment_timeout_secs: 900,
            },
            log_level: "info".to_string(),
        }
    }
}
