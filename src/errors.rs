//! Error taxonomy for endpoint calls and failover routing.
//!
//! Two layers: [`EndpointError`] describes what went wrong with a single
//! attempt against a single endpoint, and [`FailoverError`] is what the
//! router hands back to callers once all routing decisions are made.
//!
//! Display strings stay operator-safe: they name the failure class and an
//! endpoint id at most, never connection handles, URLs or credentials.

use std::sync::Arc;

use thiserror::Error;

/// Failure of a single attempt against a single endpoint.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EndpointError {
    /// The attempt did not complete within its deadline.
    #[error("request timeout")]
    Timeout,

    /// Could not reach the endpoint at all.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The endpoint is shedding load (HTTP 429 and friends).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The endpoint answered, but with a server-side error.
    #[error("provider error: {0}")]
    Provider(String),

    /// The operation itself is invalid and would fail identically anywhere.
    #[error("operation rejected: {0}")]
    Rejected(String),
}

impl EndpointError {
    /// Whether retrying the same operation against a different endpoint
    /// could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EndpointError::Timeout
                | EndpointError::ConnectionFailed(_)
                | EndpointError::RateLimited(_)
                | EndpointError::Provider(_)
        )
    }

    /// Whether this failure reflects on the endpoint's health and should
    /// feed its circuit breaker and latency window. Rejected operations
    /// are the caller's fault, not the endpoint's.
    pub fn should_penalize(&self) -> bool {
        self.is_transient()
    }
}

/// Classification of an [`EndpointError`] for routing purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Move on to the next candidate endpoint.
    Retryable,
    /// Stop immediately and return the error to the caller.
    Fatal,
}

/// Default classifier: transient endpoint failures are retryable,
/// everything else is fatal.
pub fn default_classifier(error: &EndpointError) -> ErrorClass {
    if error.is_transient() {
        ErrorClass::Retryable
    } else {
        ErrorClass::Fatal
    }
}

/// One exhausted candidate in an [`FailoverError::AllEndpointsFailed`].
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub endpoint_id: Arc<str>,
    pub reason: String,
}

/// Terminal outcome of a routed call.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FailoverError {
    /// No endpoint's circuit breaker would admit a request.
    #[error("no healthy endpoints available")]
    NoHealthyEndpoints,

    /// Every admitted candidate was attempted and failed.
    #[error("all endpoints failed ({} attempted)", .attempts.len())]
    AllEndpointsFailed { attempts: Vec<FailedAttempt> },

    /// The operation failed fatally on the first endpoint that ran it.
    #[error("operation failed: {0}")]
    Operation(#[source] EndpointError),

    /// Invalid configuration or registration.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}
