//! Configuration loading and representation.
//!
//! `Settings` is built once at process start (see `Settings::from_env`) and handed
//! to the wiring code by value. Nothing below the wiring layer reads the
//! environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::statements::STATEMENT_TTL;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: cannot parse '{value}'")]
    Parse { key: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

/// Log output format for the tracing subscriber.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Circuit breaker and transport settings for the statement cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub redis_url: Option<String>,
    /// Consecutive transport/timeout failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a probe.
    pub recovery_timeout: Duration,
    /// Upper bound on a single backend command.
    pub op_timeout: Duration,
    /// Retention of `<prefix>:version` keys, refreshed on every bump.
    pub version_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            op_timeout: Duration::from_millis(250),
            version_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Fallback signing secret for local runs; never suitable outside development.
pub const DEV_JWT_SECRET: &str = "bursar-dev-secret-change-me";

/// Token signing and the bootstrap operator account.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl: Duration,
    /// Seeded as the admin user when both email and password are set.
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl core::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("token_ttl", &self.token_ttl)
            .field("admin_email", &self.admin_email)
            .finish_non_exhaustive()
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl: Duration::from_secs(30 * 60),
            admin_email: None,
            admin_password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    /// Postgres connection string; the in-memory ledger is used when absent.
    pub database_url: Option<String>,
    pub cache: CacheSettings,
    /// Attempts for a payment before a write conflict is surfaced.
    pub payment_retry_attempts: u32,
    pub log_format: LogFormat,
    pub auth: AuthSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            cache: CacheSettings::default(),
            payment_retry_attempts: 5,
            log_format: LogFormat::default(),
            auth: AuthSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let settings = Settings {
            bind_addr: parse_or(&get, "BURSAR_BIND_ADDR", defaults.bind_addr)?,
            database_url: get("DATABASE_URL"),
            cache: CacheSettings {
                redis_url: get("REDIS_URL"),
                failure_threshold: parse_or(
                    &get,
                    "BURSAR_CACHE_FAILURE_THRESHOLD",
                    defaults.cache.failure_threshold,
                )?,
                recovery_timeout: Duration::from_secs(parse_or(
                    &get,
                    "BURSAR_CACHE_RECOVERY_TIMEOUT_SECS",
                    defaults.cache.recovery_timeout.as_secs(),
                )?),
                op_timeout: Duration::from_millis(parse_or(
                    &get,
                    "BURSAR_CACHE_OP_TIMEOUT_MS",
                    defaults.cache.op_timeout.as_millis() as u64,
                )?),
                version_ttl: Duration::from_secs(parse_or(
                    &get,
                    "BURSAR_CACHE_VERSION_TTL_SECS",
                    defaults.cache.version_ttl.as_secs(),
                )?),
            },
            payment_retry_attempts: parse_or(
                &get,
                "BURSAR_PAYMENT_RETRY_ATTEMPTS",
                defaults.payment_retry_attempts,
            )?,
            log_format: match get("BURSAR_LOG_FORMAT").as_deref().map(str::trim) {
                None => defaults.log_format,
                Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
                Some(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
                Some(other) => {
                    return Err(ConfigError::Parse {
                        key: "BURSAR_LOG_FORMAT",
                        value: other.to_string(),
                    });
                }
            },
            auth: AuthSettings {
                jwt_secret: get("BURSAR_JWT_SECRET").unwrap_or(defaults.auth.jwt_secret),
                token_ttl: Duration::from_secs(
                    parse_or(
                        &get,
                        "BURSAR_TOKEN_TTL_MINUTES",
                        defaults.auth.token_ttl.as_secs() / 60,
                    )?
                    .saturating_mul(60),
                ),
                admin_email: get("BURSAR_ADMIN_EMAIL"),
                admin_password: get("BURSAR_ADMIN_PASSWORD"),
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "cache failure threshold must be at least 1".into(),
            ));
        }
        if self.cache.op_timeout.is_zero() {
            return Err(ConfigError::Invalid("cache operation timeout must be non-zero".into()));
        }
        if self.cache.version_ttl <= STATEMENT_TTL {
            return Err(ConfigError::Invalid(format!(
                "cache version TTL ({}s) must exceed the statement TTL ({}s)",
                self.cache.version_ttl.as_secs(),
                STATEMENT_TTL.as_secs()
            )));
        }
        if self.payment_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "payment retry attempts must be at least 1".into(),
            ));
        }
        if self.auth.jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "JWT secret must be at least 16 bytes".into(),
            ));
        }
        if self.auth.token_ttl.is_zero() {
            return Err(ConfigError::Invalid("token TTL must be non-zero".into()));
        }
        if self.auth.admin_email.is_some() != self.auth.admin_password.is_some() {
            return Err(ConfigError::Invalid(
                "BURSAR_ADMIN_EMAIL and BURSAR_ADMIN_PASSWORD must be set together".into(),
            ));
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Ok(value),
            Err(_) => Err(ConfigError::Parse { key, value: raw }),
        },
    }
}
