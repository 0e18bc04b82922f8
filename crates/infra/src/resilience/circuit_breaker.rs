//! Generic circuit breaker.
//!
//! Wraps any fallible async call and stops invoking it once it keeps failing.
//!
//! ```text
//!            failures >= threshold              elapsed > recovery_timeout
//!  CLOSED ───────────────────────────► OPEN ───────────────────────────► HALF_OPEN
//!    ▲                                   ▲                                   │
//!    │                                   └────────── probe failed ───────────┤
//!    └──────────────────────────────── probe succeeded ──────────────────────┘
//! ```
//!
//! Only errors accepted by the breaker's classifier count as failures; any other
//! error passes through to the caller untouched. All state lives behind a single
//! mutex that is only held between awaits, never across one.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// A single probe call is allowed through.
    HalfOpen,
    /// Calls are rejected without invoking the wrapped operation.
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
            CircuitState::Open => write!(f, "OPEN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time after the last failure before a probe is allowed.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a call rejected or failed by the breaker.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The circuit is open (or a probe is already in flight); the call was not made.
    #[error("circuit is open")]
    Open,

    /// The wrapped call failed.
    #[error("{0}")]
    Inner(E),
}

/// Point-in-time view of the breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_time: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    probe_in_flight: bool,
}

type Classifier<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

pub struct CircuitBreaker<E> {
    name: String,
    config: CircuitBreakerConfig,
    is_failure: Classifier<E>,
    state: Mutex<BreakerState>,
}

impl<E> fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.snapshot())
            .finish()
    }
}

impl<E> CircuitBreaker<E> {
    /// Create a closed breaker.
    ///
    /// `is_failure` decides which errors of the wrapped call count towards the
    /// threshold (typically transport and timeout errors).
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        is_failure: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            is_failure: Box::new(is_failure),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_time: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let s = self.lock();
        CircuitSnapshot {
            state: s.state,
            consecutive_failures: s.consecutive_failures,
            last_failure_time: s.last_failure_time,
        }
    }

    /// Run `op` through the breaker.
    ///
    /// Returns `CircuitError::Open` without calling `op` while the circuit is open.
    /// A failure of `op` is always returned as `CircuitError::Inner`, whatever
    /// transition it triggers.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.admit()?;
        let outcome = op().await;

        match &outcome {
            Ok(_) => permit.succeeded(),
            Err(e) if (self.is_failure)(e) => permit.failed(),
            // Not ours to count; dropping the permit frees a probe slot.
            Err(_) => drop(permit),
        }

        outcome.map_err(CircuitError::Inner)
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Result<Permit<'_, E>, CircuitError<E>> {
        let mut s = self.lock();

        let probe = match s.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let recovered = s
                    .last_failure_time
                    .is_none_or(|t| t.elapsed() > self.config.recovery_timeout);
                if !recovered {
                    debug!(breaker = %self.name, "circuit open, rejecting call");
                    return Err(CircuitError::Open);
                }
                s.state = CircuitState::HalfOpen;
                s.probe_in_flight = true;
                info!(breaker = %self.name, "circuit half-open, allowing probe");
                true
            }
            CircuitState::HalfOpen => {
                if s.probe_in_flight {
                    debug!(breaker = %self.name, "probe in flight, rejecting call");
                    return Err(CircuitError::Open);
                }
                s.probe_in_flight = true;
                true
            }
        };

        Ok(Permit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    fn on_success(&self, probe: bool) {
        if !probe {
            return;
        }
        let mut s = self.lock();
        s.probe_in_flight = false;
        s.consecutive_failures = 0;
        s.state = CircuitState::Closed;
        info!(breaker = %self.name, "probe succeeded, circuit closed");
    }

    fn on_failure(&self, probe: bool) {
        let mut s = self.lock();
        s.consecutive_failures = s.consecutive_failures.saturating_add(1);
        s.last_failure_time = Some(Instant::now());

        if probe {
            s.probe_in_flight = false;
            s.state = CircuitState::Open;
            warn!(
                breaker = %self.name,
                failures = s.consecutive_failures,
                "probe failed, circuit re-opened"
            );
        } else if s.state == CircuitState::Closed
            && s.consecutive_failures >= self.config.failure_threshold
        {
            s.state = CircuitState::Open;
            warn!(
                breaker = %self.name,
                failures = s.consecutive_failures,
                "failure threshold reached, circuit opened"
            );
        }
    }
}

/// Admission ticket for one call; settles the breaker state when resolved.
///
/// A probe permit dropped without being settled (call cancelled, or an error the
/// breaker does not count) frees the probe slot and leaves the circuit half-open.
struct Permit<'a, E> {
    breaker: &'a CircuitBreaker<E>,
    probe: bool,
    settled: bool,
}

impl<E> Permit<'_, E> {
    fn succeeded(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    fn failed(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl<E> Drop for Permit<'_, E> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}
