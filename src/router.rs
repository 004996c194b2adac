//! Failover routing across registered endpoints.
//!
//! `execute` snapshots the breaker-admitted candidates in preference order
//! and walks them until one attempt succeeds. Retryable failures move on
//! to the next candidate and penalize the endpoint that produced them;
//! fatal failures stop the walk immediately without penalty, since they
//! would fail identically everywhere.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::errors::{
    default_classifier, ErrorClass, EndpointError, FailedAttempt, FailoverError,
};
use crate::registry::EndpointRegistry;

/// Router-level knobs, derived from the registry config by default.
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    /// Cap on candidates tried per call; `None` tries every candidate.
    pub max_attempts: Option<usize>,
    /// Per-attempt deadline when the caller does not supply one.
    pub call_timeout: Duration,
}

pub struct FailoverRouter<T> {
    registry: Arc<EndpointRegistry<T>>,
    config: RouterConfig,
}

impl<T: Send + Sync + 'static> FailoverRouter<T> {
    pub fn new(registry: Arc<EndpointRegistry<T>>) -> Self {
        let config = RouterConfig {
            max_attempts: registry.config().max_attempts,
            call_timeout: registry.config().call_timeout(),
        };
        Self { registry, config }
    }

    pub fn with_config(registry: Arc<EndpointRegistry<T>>, config: RouterConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry<T>> {
        &self.registry
    }

    /// Route one operation with the default classifier and timeout.
    pub async fn execute<R, F, Fut>(&self, operation: F) -> Result<R, FailoverError>
    where
        F: Fn(Arc<Endpoint<T>>) -> Fut,
        Fut: Future<Output = Result<R, EndpointError>>,
    {
        self.execute_with(operation, default_classifier, None).await
    }

    /// Route one operation with a caller-supplied error classifier and an
    /// optional per-attempt timeout override.
    pub async fn execute_with<R, F, Fut, C>(
        &self,
        operation: F,
        classify: C,
        timeout: Option<Duration>,
    ) -> Result<R, FailoverError>
    where
        F: Fn(Arc<Endpoint<T>>) -> Fut,
        Fut: Future<Output = Result<R, EndpointError>>,
        C: Fn(&EndpointError) -> ErrorClass,
    {
        let candidates = self.registry.candidates().await;
        if candidates.is_empty() {
            warn!("no endpoint admits requests");
            return Err(FailoverError::NoHealthyEndpoints);
        }

        let budget = self
            .config
            .max_attempts
            .unwrap_or(usize::MAX)
            .min(candidates.len());
        let timeout = timeout.unwrap_or(self.config.call_timeout);
        let mut attempts = Vec::new();

        let mut dispatched = false;
        for endpoint in candidates.into_iter().take(budget) {
            // Admission happens here, not at selection, so a candidate we
            // never reach keeps its half-open trial permits.
            if !endpoint.breaker().allow_request().await {
                debug!(
                    endpoint = %endpoint.id(),
                    "candidate lost admission before dispatch, skipping"
                );
                continue;
            }
            dispatched = true;
            let fut = operation(Arc::clone(&endpoint));
            match endpoint.dispatch(fut, timeout, &classify).await {
                Ok(value) => {
                    debug!(
                        endpoint = %endpoint.id(),
                        attempt = attempts.len() + 1,
                        "routed call succeeded"
                    );
                    return Ok(value);
                }
                Err(error) if classify(&error) == ErrorClass::Fatal => {
                    debug!(
                        endpoint = %endpoint.id(),
                        error = %error,
                        "fatal error, aborting failover"
                    );
                    return Err(FailoverError::Operation(error));
                }
                Err(error) => {
                    debug!(
                        endpoint = %endpoint.id(),
                        error = %error,
                        "attempt failed, trying next candidate"
                    );
                    attempts.push(FailedAttempt {
                        endpoint_id: endpoint.id_arc(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        if !dispatched {
            // Every candidate lost admission between selection and
            // dispatch; nothing actually ran.
            warn!("no endpoint admits requests");
            return Err(FailoverError::NoHealthyEndpoints);
        }
        warn!(attempted = attempts.len(), "all candidates exhausted");
        Err(FailoverError::AllEndpointsFailed { attempts })
    }
}

impl<T> std::fmt::Debug for FailoverRouter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverRouter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
