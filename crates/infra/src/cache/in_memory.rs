use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{CacheBackend, CacheBackendError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Minimum spacing between full sweeps of expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, Entry>,
    last_sweep: Option<Instant>,
}

impl Store {
    /// Drop every expired entry, at most once per `SWEEP_INTERVAL`.
    fn sweep(&mut self, now: Instant) {
        if self
            .last_sweep
            .is_some_and(|at| now.duration_since(at) < SWEEP_INTERVAL)
        {
            return;
        }
        self.entries.retain(|_, e| e.is_live(now));
        self.last_sweep = Some(now);
    }
}

/// In-process cache backend for tests/dev, and the fallback when no Redis URL
/// is configured.
///
/// An expired key is removed when a read finds it, and writes periodically
/// sweep the whole map, so rotated statement keys nobody reads again are
/// still reclaimed.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    store: RwLock<Store>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.store
            .read()
            .map(|store| store.entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a live key, `None` when absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let store = self.store.read().ok()?;
        let entry = store.entries.get(key).filter(|e| e.is_live(now))?;
        entry.expires_at.map(|at| at - now)
    }
}

fn poisoned() -> CacheBackendError {
    CacheBackendError::Transport("in-memory cache lock poisoned".to_string())
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheBackendError> {
        let now = Instant::now();
        {
            let store = self.store.read().map_err(|_| poisoned())?;
            match store.entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: reclaim it unless a writer refreshed it in the meantime.
        let mut store = self.store.write().map_err(|_| poisoned())?;
        if store.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            store.entries.remove(key);
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheBackendError> {
        let now = Instant::now();
        let mut store = self.store.write().map_err(|_| poisoned())?;
        store.sweep(now);
        store.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheBackendError> {
        let now = Instant::now();
        let mut store = self.store.write().map_err(|_| poisoned())?;
        store.sweep(now);

        let (current, expires_at) = match store.entries.get(key).filter(|e| e.is_live(now)) {
            Some(entry) => {
                let n = entry.value.parse::<i64>().map_err(|_| {
                    CacheBackendError::Protocol(format!("value at '{key}' is not an integer"))
                })?;
                (n, entry.expires_at)
            }
            None => (0, None),
        };

        let next = current
            .checked_add(1)
            .ok_or_else(|| CacheBackendError::Protocol(format!("increment of '{key}' overflows")))?;
        store.entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheBackendError> {
        let now = Instant::now();
        let mut store = self.store.write().map_err(|_| poisoned())?;
        if let Some(entry) = store.entries.get_mut(key).filter(|e| e.is_live(now)) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }
}
