//! A registered endpoint: opaque handle plus its reliability state.
//!
//! Each endpoint owns its own circuit breaker and latency window. All
//! outcome recording funnels through [`Endpoint::dispatch`], so routed
//! calls and background probes update health through one path.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::FailoverConfig;
use crate::errors::{ErrorClass, EndpointError};
use crate::latency_window::LatencyWindow;
use crate::scoring;

/// Probe/dispatch history entries retained per endpoint.
const HEALTH_HISTORY_SIZE: usize = 100;

/// One health-probe outcome, oldest evicted first.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub checked_at: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// Point-in-time snapshot of an endpoint's reliability state.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub id: Arc<str>,
    pub priority: u32,
    pub state: CircuitState,
    pub health_score: f64,
    /// `None` when the window is empty (no evidence either way), like the
    /// latency percentiles.
    pub success_rate: Option<f64>,
    pub latency_p50_ms: Option<u64>,
    pub latency_p95_ms: Option<u64>,
    pub latency_p99_ms: Option<u64>,
    pub sample_count: usize,
    pub failure_count: u32,
}

pub struct Endpoint<T> {
    id: Arc<str>,
    handle: T,
    priority: u32,
    metadata: RwLock<BTreeMap<String, String>>,
    breaker: CircuitBreaker,
    window: LatencyWindow,
    history: Mutex<VecDeque<HealthCheckResult>>,
}

impl<T> Endpoint<T> {
    pub fn new(
        id: impl Into<Arc<str>>,
        handle: T,
        priority: u32,
        metadata: BTreeMap<String, String>,
        config: &FailoverConfig,
    ) -> Self {
        let id = id.into();
        Self {
            breaker: CircuitBreaker::new(id.to_string(), config.breaker_config()),
            window: LatencyWindow::new(config.window_size, config.sample_max_age()),
            id,
            handle,
            priority,
            metadata: RwLock::new(metadata),
            history: Mutex::new(VecDeque::with_capacity(HEALTH_HISTORY_SIZE)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn id_arc(&self) -> Arc<str> {
        Arc::clone(&self.id)
    }

    pub fn handle(&self) -> &T {
        &self.handle
    }

    /// Lower is preferred.
    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata.read().clone()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.write().insert(key.into(), value.into());
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn window(&self) -> &LatencyWindow {
        &self.window
    }

    pub async fn health_score(&self) -> f64 {
        scoring::health_score(
            self.window.success_rate(),
            self.window.p95(),
            self.breaker.get_state().await,
        )
    }

    pub async fn status(&self) -> EndpointStatus {
        EndpointStatus {
            id: Arc::clone(&self.id),
            priority: self.priority,
            state: self.breaker.get_state().await,
            health_score: self.health_score().await,
            success_rate: self.window.success_rate(),
            latency_p50_ms: self.window.p50().map(|d| d.as_millis() as u64),
            latency_p95_ms: self.window.p95().map(|d| d.as_millis() as u64),
            latency_p99_ms: self.window.p99().map(|d| d.as_millis() as u64),
            sample_count: self.window.sample_count(),
            failure_count: self.breaker.get_failure_count().await,
        }
    }

    /// Run one timed attempt against this endpoint and record its outcome
    /// exactly once. Deadline expiry is recorded as a penalized timeout;
    /// errors the classifier marks fatal leave breaker and window untouched.
    ///
    /// Admission is the caller's job (`breaker().allow_request()`); dispatch
    /// itself never consults the breaker, so an admitted call always runs.
    pub async fn dispatch<R, Fut, C>(
        &self,
        fut: Fut,
        timeout: Duration,
        classify: &C,
    ) -> Result<R, EndpointError>
    where
        Fut: Future<Output = Result<R, EndpointError>>,
        C: Fn(&EndpointError) -> ErrorClass + ?Sized,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(EndpointError::Timeout),
        };
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => {
                self.window.record(elapsed, true);
                self.breaker.record_success().await;
            }
            Err(error) => {
                if classify(error) == ErrorClass::Retryable {
                    self.window.record(elapsed, false);
                    self.breaker.record_failure(&error.to_string()).await;
                } else {
                    debug!(
                        endpoint = %self.id,
                        error = %error,
                        "fatal error, endpoint not penalized"
                    );
                }
            }
        }
        result
    }

    pub(crate) fn push_history(&self, entry: HealthCheckResult) {
        let mut history = self.history.lock();
        if history.len() == HEALTH_HISTORY_SIZE {
            history.pop_front();
        }
        history.push_back(entry);
    }

    /// Most recent probe outcomes, newest last.
    pub fn health_history(&self, limit: usize) -> Vec<HealthCheckResult> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}

impl<T> std::fmt::Debug for Endpoint<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
