use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitError};

use super::{CacheBackend, CacheBackendError, CacheService, version_key};

/// [`CacheService`] over a raw backend, with every command routed through a
/// circuit breaker that counts transport and timeout failures.
///
/// Version keys carry a TTL that is refreshed on each increment, so counters for
/// owners that stop changing eventually disappear. An expired counter reads as 0,
/// which only ever matches statements cached long before.
pub struct VersionedCache<B> {
    backend: B,
    breaker: CircuitBreaker<CacheBackendError>,
    version_ttl: Duration,
}

impl<B> std::fmt::Debug for VersionedCache<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedCache")
            .field("breaker", &self.breaker)
            .field("version_ttl", &self.version_ttl)
            .finish()
    }
}

impl<B: CacheBackend> VersionedCache<B> {
    pub fn new(backend: B, breaker: CircuitBreakerConfig, version_ttl: Duration) -> Self {
        Self {
            backend,
            breaker: CircuitBreaker::new("cache", breaker, CacheBackendError::is_transient),
            version_ttl,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker<CacheBackendError> {
        &self.breaker
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

fn log_degraded(op: &'static str, key: &str, err: CircuitError<CacheBackendError>) {
    match err {
        CircuitError::Open => debug!(op, key, "cache circuit open, skipping"),
        CircuitError::Inner(e) => warn!(op, key, error = %e, "cache operation failed"),
    }
}

#[async_trait]
impl<B: CacheBackend> CacheService for VersionedCache<B> {
    async fn get(&self, key: &str) -> Option<String> {
        match self.breaker.call(|| self.backend.get(key)).await {
            Ok(value) => value,
            Err(e) => {
                log_degraded("get", key, e);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        if let Err(e) = self.breaker.call(|| self.backend.set_ex(key, value, ttl)).await {
            log_degraded("set", key, e);
        }
    }

    async fn increment_version(&self, prefix: &str) {
        let key = version_key(prefix);
        if let Err(e) = self.breaker.call(|| self.backend.incr(&key)).await {
            log_degraded("increment_version", &key, e);
            return;
        }
        if let Err(e) = self
            .breaker
            .call(|| self.backend.expire(&key, self.version_ttl))
            .await
        {
            log_degraded("expire_version", &key, e);
        }
    }

    async fn get_version(&self, prefix: &str) -> u64 {
        let key = version_key(prefix);
        match self.breaker.call(|| self.backend.get(&key)).await {
            Ok(Some(raw)) => raw.parse().unwrap_or_else(|_| {
                warn!(key = %key, value = %raw, "version key is not a counter");
                0
            }),
            Ok(None) => 0,
            Err(e) => {
                log_degraded("get_version", &key, e);
                0
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Backend whose every command fails with a transport error.
    #[derive(Debug, Default)]
    pub(crate) struct UnreachableCacheBackend {
        calls: AtomicUsize,
    }

    impl UnreachableCacheBackend {
        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail<T>(&self) -> Result<T, CacheBackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CacheBackendError::Transport("connection refused".into()))
        }
    }

    #[async_trait]
    impl CacheBackend for UnreachableCacheBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheBackendError> {
            self.fail()
        }

        async fn set_ex(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheBackendError> {
            self.fail()
        }

        async fn incr(&self, _key: &str) -> Result<i64, CacheBackendError> {
            self.fail()
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), CacheBackendError> {
            self.fail()
        }
    }
}
