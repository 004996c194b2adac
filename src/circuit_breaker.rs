//! Per-endpoint circuit breaker.
//!
//! Three states:
//!
//! - `Closed`: requests flow; failures accumulate toward the threshold.
//! - `Open`: requests are refused until the cooldown elapses. The cooldown
//!   doubles each time a half-open trial fails, capped at `max_cooldown`.
//! - `HalfOpen`: a bounded number of trial requests are admitted. Enough
//!   consecutive successes close the breaker; any failure re-opens it.
//!
//! State lives behind a `tokio::sync::RwLock` with a read-lock fast path;
//! transitions take the write lock and are re-checked under it. The lock is
//! never held across user code, and the optional transition callback runs
//! after the lock is released.

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-breaker tuning, usually derived from
/// [`FailoverConfig::breaker_config`](crate::config::FailoverConfig::breaker_config).
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub max_cooldown: Duration,
    pub half_open_trial_count: u32,
    pub required_successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            max_cooldown: Duration::from_secs(300),
            half_open_trial_count: 3,
            required_successes: 2,
        }
    }
}

/// Called with `(from, to)` on every state transition.
pub type TransitionCallback = Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Cumulative failures since the last close.
    failure_count: u32,
    /// Consecutive half-open successes toward `required_successes`.
    success_streak: u32,
    /// Failures since the last success, drives the Closed -> Open trip.
    failure_streak: u32,
    opened_at: Option<Instant>,
    /// Current cooldown; grows while recovery keeps failing.
    cooldown: Duration,
    /// Remaining half-open admissions.
    trial_permits: u32,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: RwLock<BreakerInner>,
    on_transition: Option<TransitionCallback>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_streak: 0,
                failure_streak: 0,
                opened_at: None,
                cooldown: config.cooldown,
                trial_permits: 0,
            }),
            config,
            on_transition: None,
        }
    }

    /// Register a transition observer. Panics inside the callback are
    /// caught and logged; they never reach the caller recording an outcome.
    pub fn with_transition_callback(
        mut self,
        callback: impl Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    ) -> Self {
        self.on_transition = Some(Box::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a request would be admitted right now, without consuming a
    /// half-open trial permit. Still moves an expired-cooldown breaker to
    /// half-open, arming the full trial budget. Use this to rank or filter
    /// endpoints; use [`allow_request`](Self::allow_request) at the moment
    /// a call is actually sent.
    pub async fn is_available(&self) -> bool {
        {
            let inner = self.inner.read().await;
            match inner.state {
                CircuitState::Closed => return true,
                CircuitState::HalfOpen => return inner.trial_permits > 0,
                CircuitState::Open => {
                    if !Self::cooldown_expired(&inner) {
                        return false;
                    }
                    // fall through to transition under the write lock
                }
            }
        }

        let mut transition = None;
        let available = {
            let mut inner = self.inner.write().await;
            match inner.state {
                CircuitState::Closed => true,
                CircuitState::HalfOpen => inner.trial_permits > 0,
                CircuitState::Open => {
                    if Self::cooldown_expired(&inner) {
                        self.enter_half_open(&mut inner);
                        transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                        true
                    } else {
                        false
                    }
                }
            }
        };

        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
        available
    }

    /// Whether a request may proceed right now. Admission has side effects:
    /// the first call after an expired cooldown moves the breaker to
    /// half-open, and every half-open admission consumes a trial permit.
    /// Call this once per call actually dispatched, never to rank
    /// candidates.
    pub async fn allow_request(&self) -> bool {
        {
            let inner = self.inner.read().await;
            match inner.state {
                CircuitState::Closed => return true,
                CircuitState::Open => {
                    if !Self::cooldown_expired(&inner) {
                        return false;
                    }
                    // fall through to transition under the write lock
                }
                CircuitState::HalfOpen => {
                    if inner.trial_permits == 0 {
                        return false;
                    }
                    // fall through to consume a permit under the write lock
                }
            }
        }

        let mut transition = None;
        let allowed = {
            let mut inner = self.inner.write().await;
            match inner.state {
                CircuitState::Closed => true,
                CircuitState::Open => {
                    if Self::cooldown_expired(&inner) {
                        self.enter_half_open(&mut inner);
                        transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                        inner.trial_permits = inner.trial_permits.saturating_sub(1);
                        true
                    } else {
                        false
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.trial_permits > 0 {
                        inner.trial_permits -= 1;
                        true
                    } else {
                        false
                    }
                }
            }
        };

        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
        allowed
    }

    /// Record a successful call outcome. Call exactly once per completed
    /// call; abandoned calls must record nothing.
    pub async fn record_success(&self) {
        let mut transition = None;
        {
            let mut inner = self.inner.write().await;
            inner.failure_streak = 0;
            match inner.state {
                CircuitState::Closed => {}
                CircuitState::HalfOpen => {
                    inner.success_streak += 1;
                    if inner.success_streak >= self.config.required_successes {
                        inner.state = CircuitState::Closed;
                        inner.failure_count = 0;
                        inner.success_streak = 0;
                        inner.trial_permits = 0;
                        inner.opened_at = None;
                        inner.cooldown = self.config.cooldown;
                        transition = Some((CircuitState::HalfOpen, CircuitState::Closed));
                        debug!(breaker = %self.name, "recovered, closing circuit");
                    }
                }
                // A call admitted before the trip finished late. Recovery
                // still has to go through half-open.
                CircuitState::Open => {}
            }
        }

        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
    }

    /// Record a failed call outcome.
    pub async fn record_failure(&self, reason: &str) {
        let mut transition = None;
        {
            let mut inner = self.inner.write().await;
            inner.failure_count += 1;
            inner.failure_streak += 1;
            match inner.state {
                CircuitState::Closed => {
                    if inner.failure_streak >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                        inner.success_streak = 0;
                        transition = Some((CircuitState::Closed, CircuitState::Open));
                        warn!(
                            breaker = %self.name,
                            failures = inner.failure_count,
                            cooldown_ms = inner.cooldown.as_millis() as u64,
                            reason,
                            "failure threshold reached, opening circuit"
                        );
                    }
                }
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.success_streak = 0;
                    inner.trial_permits = 0;
                    inner.cooldown = (inner.cooldown * 2).min(self.config.max_cooldown);
                    transition = Some((CircuitState::HalfOpen, CircuitState::Open));
                    warn!(
                        breaker = %self.name,
                        cooldown_ms = inner.cooldown.as_millis() as u64,
                        reason,
                        "half-open trial failed, re-opening circuit"
                    );
                }
                // Already open; the failure is counted, nothing else moves.
                CircuitState::Open => {}
            }
        }

        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    pub async fn get_failure_count(&self) -> u32 {
        self.inner.read().await.failure_count
    }

    /// Cooldown currently in effect (grows while recovery fails).
    pub async fn current_cooldown(&self) -> Duration {
        self.inner.read().await.cooldown
    }

    /// Time left before an open breaker starts admitting trials. Zero when
    /// not open or when the cooldown has already elapsed.
    pub async fn remaining_cooldown(&self) -> Duration {
        let inner = self.inner.read().await;
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                inner.cooldown.saturating_sub(opened_at.elapsed())
            }
            _ => Duration::ZERO,
        }
    }

    fn enter_half_open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::HalfOpen;
        inner.success_streak = 0;
        inner.trial_permits = self.config.half_open_trial_count;
        debug!(
            breaker = %self.name,
            trials = self.config.half_open_trial_count,
            "cooldown expired, entering half-open"
        );
    }

    fn cooldown_expired(inner: &BreakerInner) -> bool {
        match inner.opened_at {
            Some(opened_at) => opened_at.elapsed() >= inner.cooldown,
            None => true,
        }
    }

    fn notify(&self, from: CircuitState, to: CircuitState) {
        if let Some(callback) = &self.on_transition {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(from, to)));
            if result.is_err() {
                warn!(
                    breaker = %self.name,
                    ?from,
                    ?to,
                    "transition callback panicked"
                );
            }
        }
    }
}
