//! Background health checker.
//!
//! Periodically probes every registered endpoint with a caller-supplied
//! probe operation. Probes run through the same dispatch path as routed
//! traffic, so they feed the same breaker and latency window: a probe can
//! trip an unhealthy endpoint's breaker, and after the cooldown a probe is
//! admitted as a half-open trial and can drive recovery without waiting
//! for live traffic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::endpoint::{Endpoint, HealthCheckResult};
use crate::errors::{default_classifier, EndpointError};
use crate::registry::EndpointRegistry;

/// Deadline for a single probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

type ProbeFn<T> =
    Arc<dyn Fn(Arc<Endpoint<T>>) -> BoxFuture<'static, Result<(), EndpointError>> + Send + Sync>;

pub struct HealthChecker<T> {
    registry: Arc<EndpointRegistry<T>>,
    probe: ProbeFn<T>,
    interval: Duration,
    probe_timeout: Duration,
}

impl<T: Send + Sync + 'static> HealthChecker<T> {
    /// Interval defaults to the registry's `health_check_interval_seconds`.
    pub fn new<F, Fut>(registry: Arc<EndpointRegistry<T>>, probe: F) -> Self
    where
        F: Fn(Arc<Endpoint<T>>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), EndpointError>> + Send + 'static,
    {
        let interval = registry.config().health_check_interval();
        Self {
            registry,
            probe: Arc::new(move |endpoint| Box::pin(probe(endpoint))),
            interval,
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Spawn the periodic sweep loop. The task stops when the shutdown
    /// channel fires (or its sender is dropped).
    pub fn start_with_shutdown(&self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let probe = Arc::clone(&self.probe);
        let probe_timeout = self.probe_timeout;
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_secs = self.interval.as_secs(), "health checker started");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        Self::sweep(&registry, &probe, probe_timeout).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("health checker stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Probe every endpoint once. Exposed so tests and operators can force
    /// a sweep without waiting for the interval.
    pub async fn run_sweep(&self) {
        Self::sweep(&self.registry, &self.probe, self.probe_timeout).await;
    }

    async fn sweep(registry: &EndpointRegistry<T>, probe: &ProbeFn<T>, probe_timeout: Duration) {
        let endpoints = registry.all();
        debug!(endpoints = endpoints.len(), "health sweep");
        let checks = endpoints.into_iter().map(|endpoint| {
            let probe = Arc::clone(probe);
            async move {
                Self::probe_endpoint(endpoint, probe, probe_timeout).await;
            }
        });
        join_all(checks).await;
    }

    /// One probe, isolated: its outcome lands in this endpoint's breaker,
    /// window and history, and nowhere else.
    async fn probe_endpoint(endpoint: Arc<Endpoint<T>>, probe: ProbeFn<T>, probe_timeout: Duration) {
        if !endpoint.breaker().allow_request().await {
            debug!(endpoint = %endpoint.id(), "probe skipped, circuit open");
            endpoint.push_history(HealthCheckResult {
                checked_at: Utc::now(),
                success: false,
                latency_ms: None,
                error: Some("skipped: circuit open".into()),
            });
            return;
        }

        let started = Instant::now();
        let result = endpoint
            .dispatch(probe(Arc::clone(&endpoint)), probe_timeout, &default_classifier)
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => {
                debug!(endpoint = %endpoint.id(), latency_ms, "probe ok");
            }
            Err(error) => {
                warn!(endpoint = %endpoint.id(), latency_ms, error = %error, "probe failed");
            }
        }
        endpoint.push_history(HealthCheckResult {
            checked_at: Utc::now(),
            success: result.is_ok(),
            latency_ms: Some(latency_ms),
            error: result.err().map(|e| e.to_string()),
        });
    }
}

impl<T> std::fmt::Debug for HealthChecker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("interval", &self.interval)
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}
