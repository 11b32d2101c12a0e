//! Circuit breaker for unreliable async dependencies.
//!
//! Cloud sync and sensor reads fail in bursts on a field unit (no uplink,
//! unplugged dongle). A breaker per call site stops the platform from
//! hammering a known-bad dependency while still re-probing it after a
//! cooldown.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BreakerConfig;

/// Failure returned by [`CircuitBreaker::call`].
///
/// Callers must be able to distinguish "the circuit refused to try" from
/// "the operation itself failed", so the wrapped error is carried verbatim.
#[derive(Debug, Error)]
pub enum BreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The circuit is open; the wrapped operation was not invoked.
    #[error("circuit open")]
    Open,
    /// The wrapped operation ran and failed with its own error.
    #[error(transparent)]
    Operation(E),
}

impl<E> BreakerError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// True when this is a circuit-open rejection rather than a real failure.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

#[derive(Debug)]
struct BreakerState {
    failures: u32,
    last_failure: Option<Instant>,
    open: bool,
}

/// Guard around a single fallible async operation.
///
/// Tracks consecutive failures; after `max_failures` with no success in
/// between the circuit opens and calls fail fast. Once `reset_timeout` has
/// elapsed since the last recorded failure, the next call is allowed through
/// as a semi-open attempt: success closes the circuit and zeroes the failure
/// count, failure keeps it open and refreshes the failure timestamp.
///
/// State is mutated only through [`call`](Self::call) and never shared across
/// breakers; each guarded call site owns its own instance.
#[derive(Debug)]
pub struct CircuitBreaker {
    max_failures: u32,
    reset_timeout: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker tripping after `max_failures` consecutive failures
    /// and refusing calls for `reset_timeout` after the last one.
    #[must_use]
    pub const fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            max_failures,
            reset_timeout,
            state: Mutex::new(BreakerState {
                failures: 0,
                last_failure: None,
                open: false,
            }),
        }
    }

    /// Build a breaker from validated configuration.
    #[must_use]
    pub const fn from_config(cfg: &BreakerConfig) -> Self {
        Self::new(
            cfg.max_failures,
            Duration::from_millis(cfg.reset_timeout_ms),
        )
    }

    /// Invoke `operation` through the breaker.
    ///
    /// If the circuit is open and the cooldown has not elapsed, returns
    /// [`BreakerError::Open`] without invoking `operation`. Otherwise the
    /// operation runs; success resets the failure count and closes the
    /// circuit, failure increments the count, records the failure time, and
    /// re-raises the operation's own error as [`BreakerError::Operation`].
    ///
    /// # Errors
    ///
    /// [`BreakerError::Open`] on fail-fast rejection, otherwise whatever the
    /// operation itself returned.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        // Lock is never held across the await below.
        {
            let state = self.state.lock();
            if state.open {
                let cooling = state
                    .last_failure
                    .is_some_and(|at| at.elapsed() < self.reset_timeout);
                if cooling {
                    debug!("circuit open, rejecting call");
                    return Err(BreakerError::Open);
                }
                debug!("cooldown elapsed, allowing semi-open attempt");
            }
        }

        match operation().await {
            Ok(value) => {
                let mut state = self.state.lock();
                state.failures = 0;
                state.open = false;
                Ok(value)
            }
            Err(err) => {
                let mut state = self.state.lock();
                state.failures += 1;
                state.last_failure = Some(Instant::now());
                if state.failures >= self.max_failures {
                    if !state.open {
                        warn!(failures = state.failures, "circuit opened");
                    }
                    state.open = true;
                }
                Err(BreakerError::Operation(err))
            }
        }
    }

    /// True while the circuit is open.
    ///
    /// The flag stays set after the cooldown elapses; only the next
    /// successful (semi-open) call closes the circuit again.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Current consecutive-failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failures
    }
}

impl Default for CircuitBreaker {
    /// Breaker with the platform defaults: 3 failures, 30 second cooldown.
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}
