//! Infrastructure wiring: ledger store, statement cache, handlers and auth.
//!
//! Backends are chosen from `Settings`: Postgres when `DATABASE_URL` is set
//! (in-memory otherwise) and Redis when `REDIS_URL` is set (in-memory otherwise).

use std::sync::Arc;

use anyhow::Context;

use bursar_auth::{Hs256Jwt, Role, User, UserDirectory};
use bursar_infra::cache::{CacheService, InMemoryCacheBackend, VersionedCache};
use bursar_infra::config::{AuthSettings, CacheSettings, Settings, DEV_JWT_SECRET};
use bursar_infra::handlers::{self, CommandHandlers, QueryHandlers};
use bursar_infra::ledger::{InMemoryLedger, Ledger, PostgresLedger};
use bursar_infra::resilience::CircuitBreakerConfig;

#[derive(Clone, Debug)]
pub struct AppServices {
    pub commands: CommandHandlers,
    pub queries: QueryHandlers,
    pub auth: AuthServices,
}

/// Token signer/validator and the operator accounts allowed to log in.
#[derive(Clone, Debug)]
pub struct AuthServices {
    pub tokens: Arc<Hs256Jwt>,
    pub users: Arc<UserDirectory>,
}

impl AppServices {
    fn new(
        ledger: Ledger,
        cache: Arc<dyn CacheService>,
        payment_retry_attempts: u32,
        auth: AuthServices,
    ) -> Self {
        let (commands, queries) = handlers::build(ledger, cache, payment_retry_attempts);
        Self {
            commands,
            queries,
            auth,
        }
    }
}

pub fn build_auth(settings: &AuthSettings) -> anyhow::Result<AuthServices> {
    if settings.jwt_secret == DEV_JWT_SECRET {
        tracing::warn!("BURSAR_JWT_SECRET not set; signing tokens with the development secret");
    }
    let ttl = chrono::Duration::from_std(settings.token_ttl).context("token TTL out of range")?;
    let users = UserDirectory::new();

    match (&settings.admin_email, &settings.admin_password) {
        (Some(email), Some(password)) => {
            let admin = User::create(email, password, Role::Admin)
                .context("invalid bootstrap admin account")?;
            tracing::info!(email = %admin.email(), "seeded admin user");
            users.insert(admin).context("failed to seed admin user")?;
        }
        _ => tracing::warn!("no admin account configured; all writes will be refused"),
    }

    Ok(AuthServices {
        tokens: Arc::new(Hs256Jwt::new(settings.jwt_secret.as_bytes(), ttl)),
        users: Arc::new(users),
    })
}

pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    let ledger = match &settings.database_url {
        Some(url) => {
            let store = PostgresLedger::connect(url)
                .await
                .context("failed to connect to Postgres")?;
            store.migrate().await.context("failed to migrate ledger schema")?;
            tracing::info!("using Postgres ledger");
            Ledger::from_store(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory ledger");
            Ledger::from_store(Arc::new(InMemoryLedger::new()))
        }
    };

    let cache = build_cache(&settings.cache)?;
    let auth = build_auth(&settings.auth)?;
    Ok(AppServices::new(ledger, cache, settings.payment_retry_attempts, auth))
}

/// Fully in-memory services (dev/test).
pub fn build_in_memory_services(auth: &AuthSettings) -> anyhow::Result<AppServices> {
    let defaults = Settings::default();
    Ok(AppServices::new(
        Ledger::from_store(Arc::new(InMemoryLedger::new())),
        in_memory_cache(&defaults.cache),
        defaults.payment_retry_attempts,
        build_auth(auth)?,
    ))
}

fn breaker_config(settings: &CacheSettings) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: settings.failure_threshold,
        recovery_timeout: settings.recovery_timeout,
    }
}

fn in_memory_cache(settings: &CacheSettings) -> Arc<dyn CacheService> {
    Arc::new(VersionedCache::new(
        InMemoryCacheBackend::new(),
        breaker_config(settings),
        settings.version_ttl,
    ))
}

#[cfg(feature = "redis")]
fn build_cache(settings: &CacheSettings) -> anyhow::Result<Arc<dyn CacheService>> {
    use bursar_infra::cache::RedisCacheBackend;

    let Some(url) = &settings.redis_url else {
        tracing::warn!("REDIS_URL not set; using in-memory statement cache");
        return Ok(in_memory_cache(settings));
    };

    // Connects lazily: an unreachable Redis only degrades statement caching.
    let backend = RedisCacheBackend::new(url, settings.op_timeout).context("invalid REDIS_URL")?;
    tracing::info!("using Redis statement cache");
    Ok(Arc::new(VersionedCache::new(
        backend,
        breaker_config(settings),
        settings.version_ttl,
    )))
}

#[cfg(not(feature = "redis"))]
fn build_cache(settings: &CacheSettings) -> anyhow::Result<Arc<dyn CacheService>> {
    if settings.redis_url.is_some() {
        tracing::warn!("REDIS_URL set but redis feature not enabled, falling back to in-memory");
    }
    Ok(in_memory_cache(settings))
}
