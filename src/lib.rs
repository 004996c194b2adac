//! Reliability layer for fleets of unreliable RPC endpoints.
//!
//! Wraps any set of caller-defined endpoint handles with per-endpoint
//! circuit breaking, latency/health tracking, and failover routing:
//!
//! ```text
//!                    ┌──────────────────┐
//!   execute(op) ───► │  FailoverRouter  │──► candidates, in order
//!                    └────────┬─────────┘
//!                             │
//!                    ┌────────▼─────────┐     ┌───────────────────┐
//!                    │ EndpointRegistry │ ◄── │   HealthChecker   │
//!                    └────────┬─────────┘     │  (periodic probe) │
//!                             │               └───────────────────┘
//!                 ┌───────────▼────────────┐
//!                 │ Endpoint<T>            │
//!                 │  ├─ CircuitBreaker     │
//!                 │  └─ LatencyWindow      │
//!                 └────────────────────────┘
//! ```
//!
//! Candidates are ordered by priority (ascending), then health score
//! (descending). Every completed attempt, routed or probed, feeds the same
//! breaker and window, so health converges no matter where traffic comes
//! from.
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use rpc_failover::{
//!     EndpointError, EndpointRegistry, FailoverConfig, FailoverRouter,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(EndpointRegistry::new(FailoverConfig::default())?);
//! registry.register("primary", "https://rpc-1.internal", 1, BTreeMap::new())?;
//! registry.register("backup", "https://rpc-2.internal", 2, BTreeMap::new())?;
//!
//! let router = FailoverRouter::new(registry);
//! let slot = router
//!     .execute(|endpoint| async move {
//!         let _url = endpoint.handle();
//!         // issue the real call against _url here
//!         Ok::<u64, EndpointError>(42)
//!     })
//!     .await?;
//! assert_eq!(slot, 42);
//! # Ok(())
//! # }
//! ```

pub mod checker;
pub mod circuit_breaker;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod latency_window;
pub mod registry;
pub mod router;
pub mod scoring;

pub use checker::HealthChecker;
pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use config::FailoverConfig;
pub use endpoint::{Endpoint, EndpointStatus, HealthCheckResult};
pub use errors::{
    default_classifier, ErrorClass, EndpointError, FailedAttempt, FailoverError,
};
pub use latency_window::LatencyWindow;
pub use registry::EndpointRegistry;
pub use router::{FailoverRouter, RouterConfig};
