//! Redis-backed cache (feature `redis`).
//!
//! Uses a multiplexed `ConnectionManager`, created lazily on first use so an
//! unreachable Redis at startup does not stop the service. Every command is
//! bounded by `op_timeout`.

use std::future::Future;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{Client, RedisError};
use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::{CacheBackend, CacheBackendError, ttl_secs};

pub struct RedisCacheBackend {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    op_timeout: Duration,
}

impl std::fmt::Debug for RedisCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheBackend")
            .field("connected", &self.conn.initialized())
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl RedisCacheBackend {
    /// Validate `redis_url`; the connection itself is established on first use.
    pub fn new(redis_url: impl AsRef<str>, op_timeout: Duration) -> Result<Self, CacheBackendError> {
        let client = Client::open(redis_url.as_ref())
            .map_err(|e| CacheBackendError::Protocol(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            op_timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheBackendError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                self.bounded("connect", ConnectionManager::new(self.client.clone()))
                    .await
            })
            .await?;
        Ok(conn.clone())
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, CacheBackendError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(|e| map_redis_error(op, self.op_timeout, e)),
            Err(_) => Err(CacheBackendError::Timeout(self.op_timeout)),
        }
    }
}

fn map_redis_error(op: &'static str, op_timeout: Duration, err: RedisError) -> CacheBackendError {
    if err.is_timeout() {
        CacheBackendError::Timeout(op_timeout)
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        CacheBackendError::Transport(format!("{op}: {err}"))
    } else {
        CacheBackendError::Protocol(format!("{op}: {err}"))
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheBackendError> {
        let mut conn = self.connection().await?;
        let cmd = ::redis::cmd("GET").arg(key).to_owned();
        let value: Option<String> = self.bounded("get", cmd.query_async(&mut conn)).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheBackendError> {
        let mut conn = self.connection().await?;
        let cmd = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs(ttl))
            .to_owned();
        let _: () = self.bounded("set", cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheBackendError> {
        let mut conn = self.connection().await?;
        let cmd = ::redis::cmd("INCR").arg(key).to_owned();
        let value: i64 = self.bounded("incr", cmd.query_async(&mut conn)).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheBackendError> {
        let mut conn = self.connection().await?;
        let cmd = ::redis::cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)).to_owned();
        let _: i64 = self.bounded("expire", cmd.query_async(&mut conn)).await?;
        Ok(())
    }
}
