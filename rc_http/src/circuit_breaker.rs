use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::clock;
use crate::clock::Clock;
use crate::clock::MonotonicClock;
use crate::errors::AppError;
use crate::errors::ErrorContext;
use crate::errors::ErrorKind;
use crate::errors::Result;
use crate::errors::Severity;
use crate::errors::keys;

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests pass through
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, probe requests test recovery
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the window needed to open the circuit
    pub failure_threshold: u32,

    /// Consecutive half-open successes needed to close the circuit
    pub success_threshold: u32,

    /// Deadline for a single guarded call, 0 disables it
    pub timeout_ms: u64,

    /// How long the circuit stays open before admitting a probe
    pub reset_timeout_ms: u64,

    /// Length of the counting window
    pub monitoring_period_ms: u64,

    /// Minimum requests in the window before the circuit may open
    pub volume_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_ms: 10_000,
            reset_timeout_ms: 60_000,
            monitoring_period_ms: 60_000,
            volume_threshold: 10,
        }
    }
}

impl CircuitBreakerConfig {
    /// Trip early and probe again quickly
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 5,
            timeout_ms: 5_000,
            reset_timeout_ms: 10_000,
            monitoring_period_ms: 30_000,
            volume_threshold: 5,
        }
    }

    /// Tolerate more failures before tripping
    pub fn conservative() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 2,
            timeout_ms: 30_000,
            reset_timeout_ms: 120_000,
            monitoring_period_ms: 120_000,
            volume_threshold: 20,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms == 0 { None } else { Some(Duration::from_millis(self.timeout_ms)) }
    }
}

/// Statistics about circuit breaker state
///
/// The `*_time` fields are milliseconds on the breaker's [`Clock`], which
/// counts from an arbitrary epoch. Compare them with each other or with
/// [`CircuitBreakerStats::as_of`], not with wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failures: u64,
    pub successes: u64,
    pub requests: u64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejections: u64,
    pub last_failure_time: Option<u64>,
    pub last_success_time: Option<u64>,
    pub next_attempt_time: Option<u64>,
    /// Clock reading when the snapshot was taken
    pub as_of: u64,
}

impl CircuitBreakerStats {
    /// Milliseconds until an open circuit admits its next probe
    pub fn retry_after_ms(&self) -> Option<u64> {
        self.next_attempt_time.map(|next| next.saturating_sub(self.as_of))
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u64,
    successes: u64,
    requests: u64,
    total_requests: u64,
    total_failures: u64,
    total_successes: u64,
    total_rejections: u64,
    last_failure_time: Option<u64>,
    last_success_time: Option<u64>,
    next_attempt_time: Option<u64>,
    monitoring_start: u64,
}

impl BreakerState {
    fn new(now: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            requests: 0,
            total_requests: 0,
            total_failures: 0,
            total_successes: 0,
            total_rejections: 0,
            last_failure_time: None,
            last_success_time: None,
            next_attempt_time: None,
            monitoring_start: now,
        }
    }

    fn clear_window(&mut self, now: u64) {
        self.failures = 0;
        self.successes = 0;
        self.requests = 0;
        self.monitoring_start = now;
    }

    /// Zero the window counters once the monitoring period has elapsed
    fn roll_window(&mut self, now: u64, period: u64) {
        if self.state != CircuitState::HalfOpen && now.saturating_sub(self.monitoring_start) > period {
            self.clear_window(now);
        }
    }
}

/// Circuit breaker guarding calls to one named service
///
/// Counter updates for an outcome happen under a single lock, so
/// `failures + successes == requests` holds for every snapshot even when
/// many calls complete concurrently.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker using the monotonic clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(MonotonicClock::new()))
    }

    /// Create a new circuit breaker driven by the given clock
    pub fn with_clock(name: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self { name: name.into(), config, clock, inner: Mutex::new(BreakerState::new(now)) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` if the circuit admits it, recording the outcome
    ///
    /// Fails fast with a `SERVICE_UNAVAILABLE` error while open. A call that
    /// exceeds `timeout_ms` is abandoned and recorded as a failure.
    pub async fn execute<F, Fut, T>(&self, operation: F, context: &ErrorContext) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit(context)?;

        let outcome = match self.config.timeout() {
            Some(deadline) => match tokio::time::timeout(deadline, operation()).await {
                Ok(result) => result,
                Err(_) => Err(self.timeout_error(context)),
            },
            None => operation().await,
        };

        match outcome {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Decide whether a call may proceed
    ///
    /// Moves an open circuit to half-open once the reset timeout has passed.
    pub fn admit(&self, context: &ErrorContext) -> Result<()> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        inner.roll_window(now, self.config.monitoring_period_ms);

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let next_attempt = inner.next_attempt_time.unwrap_or(0);
                if now >= next_attempt {
                    inner.state = CircuitState::HalfOpen;
                    inner.clear_window(now);
                    info!(breaker = %self.name, "Circuit breaker half-open, admitting probe");
                    Ok(())
                } else {
                    inner.total_rejections += 1;
                    Err(self.open_error(next_attempt, context))
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        inner.successes += 1;
        inner.requests += 1;
        inner.total_successes += 1;
        inner.total_requests += 1;
        inner.last_success_time = Some(now);

        let state = inner.state;
        match state {
            CircuitState::Closed => self.trip_if_over_threshold(&mut inner, now),
            CircuitState::HalfOpen if inner.successes >= u64::from(self.config.success_threshold) => {
                inner.state = CircuitState::Closed;
                inner.next_attempt_time = None;
                inner.clear_window(now);
                info!(breaker = %self.name, "Circuit breaker closed after successful probes");
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        inner.failures += 1;
        inner.requests += 1;
        inner.total_failures += 1;
        inner.total_requests += 1;
        inner.last_failure_time = Some(now);

        let state = inner.state;
        match state {
            CircuitState::Closed => self.trip_if_over_threshold(&mut inner, now),
            CircuitState::HalfOpen => {
                // Any failure while probing reopens the circuit
                self.trip(&mut inner, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state of the circuit
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot of the counters
    ///
    /// An elapsed monitoring window is rolled first, so window counters read
    /// zero once the period has passed without traffic.
    pub fn stats(&self) -> CircuitBreakerStats {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        inner.roll_window(now, self.config.monitoring_period_ms);
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            requests: inner.requests,
            total_requests: inner.total_requests,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_rejections: inner.total_rejections,
            last_failure_time: inner.last_failure_time,
            last_success_time: inner.last_success_time,
            next_attempt_time: inner.next_attempt_time,
            as_of: now,
        }
    }

    /// Force the circuit open
    pub fn open(&self) {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            self.trip(&mut inner, now);
        }
    }

    /// Force the circuit closed, keeping cumulative totals
    pub fn close(&self) {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            inner.state = CircuitState::Closed;
            inner.next_attempt_time = None;
            inner.clear_window(now);
            info!(breaker = %self.name, "Circuit breaker closed manually");
        }
    }

    /// Return to a fresh closed breaker with every counter at zero
    pub fn reset(&self) {
        let now = self.clock.now_millis();
        *self.inner.lock() = BreakerState::new(now);
    }

    /// Open a closed circuit once the window has enough volume and failures
    fn trip_if_over_threshold(&self, inner: &mut BreakerState, now: u64) {
        if inner.requests >= u64::from(self.config.volume_threshold) && inner.failures >= u64::from(self.config.failure_threshold) {
            self.trip(inner, now);
        }
    }

    fn trip(&self, inner: &mut BreakerState, now: u64) {
        inner.state = CircuitState::Open;
        inner.next_attempt_time = Some(now.saturating_add(self.config.reset_timeout_ms));
        warn!(
            breaker = %self.name,
            failures = inner.failures,
            requests = inner.requests,
            reset_timeout_ms = self.config.reset_timeout_ms,
            "Circuit breaker opened"
        );
    }

    fn open_error(&self, next_attempt: u64, context: &ErrorContext) -> AppError {
        AppError::new(format!("Circuit breaker '{}' is open", self.name), ErrorKind::ServiceUnavailable, Severity::High)
            .with_contexts(context)
            .with_context(keys::CIRCUIT_BREAKER, self.name.as_str())
            .with_context(keys::CIRCUIT_BREAKER_STATE, CircuitState::Open.as_str())
            .with_context(keys::NEXT_ATTEMPT_TIME, next_attempt)
            .with_context(keys::TIMESTAMP, clock::timestamp())
    }

    fn timeout_error(&self, context: &ErrorContext) -> AppError {
        AppError::new(
            format!("Call through circuit breaker '{}' timed out after {}ms", self.name, self.config.timeout_ms),
            ErrorKind::Timeout,
            Severity::Medium,
        )
        .with_contexts(context)
        .with_context(keys::CIRCUIT_BREAKER, self.name.as_str())
        .with_context(keys::TIMEOUT_MS, self.config.timeout_ms)
        .with_context(keys::TIMESTAMP, clock::timestamp())
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker").field("name", &self.name).field("state", &self.state()).finish()
    }
}
