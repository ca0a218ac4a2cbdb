use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::ValidationError;

/// Runtime circuit state for one provider client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Result<Self, ValidationError> {
        if failure_threshold == 0 {
            return Err(ValidationError::InvalidBreakerThreshold);
        }
        Ok(Self {
            failure_threshold,
            cooldown,
        })
    }
}

/// Point-in-time view of a breaker, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub threshold: u32,
    /// Time left before the next call is let through, when open.
    pub retry_in_ms: Option<u64>,
    /// Open because the upstream reported a rate limit, not because of failures.
    pub rate_limited: bool,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    cooldown: Duration,
    rate_limited: bool,
}

impl CircuitInner {
    fn closed(cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            cooldown,
            rate_limited: false,
        }
    }

    fn remaining(&self) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        let elapsed = self
            .last_failure
            .map(|at| at.elapsed())
            .unwrap_or(self.cooldown);
        Some(self.cooldown.saturating_sub(elapsed))
    }
}

/// Thread-safe circuit breaker guarding a single upstream.
///
/// There is no background timer: an open circuit closes lazily on the first
/// [`allow_request`](Self::allow_request) after the cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("upstream", config)
    }

    /// Breaker whose log lines carry `name` (usually the provider id).
    pub fn named(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(CircuitInner::closed(config.cooldown)),
        }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if inner.remaining().is_some_and(|left| left.is_zero()) {
                    *inner = CircuitInner::closed(self.config.cooldown);
                    info!(breaker = self.name, "cooldown elapsed, closing circuit");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open || inner.failure_count > 0 {
            *inner = CircuitInner::closed(self.config.cooldown);
        }
    }

    /// Counts a failure. Returns `true` when this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        if inner.state == CircuitState::Closed
            && inner.failure_count >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            warn!(
                breaker = self.name,
                failures = inner.failure_count,
                cooldown_ms = duration_ms(inner.cooldown),
                "circuit opened after consecutive failures"
            );
            return true;
        }
        false
    }

    /// Opens the circuit immediately for `cooldown`, e.g. after an upstream rate-limit notice.
    /// The configured cooldown applies again once the circuit closes.
    pub fn trip_for(&self, cooldown: Duration) {
        let mut inner = self.lock();
        inner.state = CircuitState::Open;
        inner.last_failure = Some(Instant::now());
        inner.cooldown = cooldown;
        inner.rate_limited = true;
        warn!(
            breaker = self.name,
            cooldown_ms = duration_ms(cooldown),
            "circuit tripped by upstream rate limit"
        );
    }

    /// Manual override: closes the circuit and forgets past failures.
    pub fn reset(&self) {
        *self.lock() = CircuitInner::closed(self.config.cooldown);
        info!(breaker = self.name, "circuit manually reset");
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// `true` while the circuit is open because of [`trip_for`](Self::trip_for).
    pub fn is_rate_limited(&self) -> bool {
        let inner = self.lock();
        inner.state == CircuitState::Open && inner.rate_limited
    }

    /// Time left before an open circuit lets the next call through.
    pub fn retry_in(&self) -> Option<Duration> {
        self.lock().remaining()
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            threshold: self.config.failure_threshold,
            retry_in_ms: inner.remaining().map(duration_ms),
            rate_limited: inner.state == CircuitState::Open && inner.rate_limited,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
