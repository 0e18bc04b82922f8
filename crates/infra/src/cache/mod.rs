//! Statement cache: raw key/value backends and the versioned cache on top.
//!
//! The cache is an accelerator only. `CacheService` never reports a failure to
//! its callers: a backend that is down reads as a miss (or version 0) and writes
//! are dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod versioned;

pub use in_memory::InMemoryCacheBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisCacheBackend;
pub use versioned::VersionedCache;

/// Failure of a single backend command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheBackendError {
    #[error("cache transport error: {0}")]
    Transport(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache protocol error: {0}")]
    Protocol(String),
}

impl CacheBackendError {
    /// Transport and timeout failures; the ones the circuit breaker counts.
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheBackendError::Transport(_) | CacheBackendError::Timeout(_))
    }
}

/// String key/value store with per-key TTL and atomic increment.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheBackendError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheBackendError>;

    /// Atomically increment an integer key (a missing key counts as 0).
    async fn incr(&self, key: &str) -> Result<i64, CacheBackendError>;

    /// Set a TTL on an existing key; a missing key is not an error.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheBackendError>;
}

#[async_trait]
impl<B> CacheBackend for Arc<B>
where
    B: CacheBackend + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<String>, CacheBackendError> {
        (**self).get(key).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheBackendError> {
        (**self).set_ex(key, value, ttl).await
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheBackendError> {
        (**self).incr(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheBackendError> {
        (**self).expire(key, ttl).await
    }
}

/// Best-effort cache with version-counter invalidation.
#[async_trait]
pub trait CacheService: Send + Sync {
    /// Cached value, or `None` on a miss or any failure.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store `value`; failures are swallowed.
    async fn set(&self, key: &str, value: &str, ttl: Duration);

    /// Advance the invalidation counter for `prefix`; failures are swallowed.
    async fn increment_version(&self, prefix: &str);

    /// Current counter for `prefix`; `0` when absent or on any failure.
    async fn get_version(&self, prefix: &str) -> u64;
}

/// `<prefix>:version`
pub fn version_key(prefix: &str) -> String {
    format!("{prefix}:version")
}

/// `<prefix>:statement:v<version>`
pub fn statement_key(prefix: &str, version: u64) -> String {
    format!("{prefix}:statement:v{version}")
}

/// Whole seconds for a backend TTL, never below one.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats() {
        let prefix = "student:0190b5a8-6e5e-7cc2-9d3e-3b1f7f0a9c11";
        assert_eq!(
            version_key(prefix),
            "student:0190b5a8-6e5e-7cc2-9d3e-3b1f7f0a9c11:version"
        );
        assert_eq!(
            statement_key(prefix, 3),
            "student:0190b5a8-6e5e-7cc2-9d3e-3b1f7f0a9c11:statement:v3"
        );
    }

    #[test]
    fn only_transport_and_timeout_are_transient() {
        assert!(CacheBackendError::Transport("reset".into()).is_transient());
        assert!(CacheBackendError::Timeout(Duration::from_millis(5)).is_transient());
        assert!(!CacheBackendError::Protocol("WRONGTYPE".into()).is_transient());
    }

    #[test]
    fn ttl_rounds_up_to_whole_seconds() {
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }
}
