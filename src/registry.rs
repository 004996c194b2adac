//! Shared endpoint registry.
//!
//! Owns the id -> endpoint map and the candidate ordering the router and
//! health checker both consume. Registration is cheap and lock-free for
//! readers; endpoints are shared out as `Arc` so deregistration never
//! invalidates an in-flight call.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::config::FailoverConfig;
use crate::endpoint::{Endpoint, EndpointStatus};
use crate::errors::FailoverError;

pub struct EndpointRegistry<T> {
    endpoints: DashMap<Arc<str>, Arc<Endpoint<T>>>,
    config: FailoverConfig,
}

impl<T> EndpointRegistry<T> {
    /// Validates the configuration up front; a bad value fails here, not
    /// at call time.
    pub fn new(config: FailoverConfig) -> Result<Self, FailoverError> {
        config.validate()?;
        Ok(Self {
            endpoints: DashMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Register a new endpoint. Ids are stable and unique; re-registering
    /// an id is a configuration error (deregister first to replace).
    pub fn register(
        &self,
        id: impl Into<Arc<str>>,
        handle: T,
        priority: u32,
        metadata: BTreeMap<String, String>,
    ) -> Result<Arc<Endpoint<T>>, FailoverError> {
        let id: Arc<str> = id.into();
        if id.is_empty() {
            return Err(FailoverError::Configuration(
                "endpoint id must not be empty".into(),
            ));
        }
        let endpoint = Arc::new(Endpoint::new(
            Arc::clone(&id),
            handle,
            priority,
            metadata,
            &self.config,
        ));
        match self.endpoints.entry(id) {
            Entry::Occupied(entry) => Err(FailoverError::Configuration(format!(
                "endpoint '{}' is already registered",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                info!(endpoint = %entry.key(), priority, "endpoint registered");
                entry.insert(Arc::clone(&endpoint));
                Ok(endpoint)
            }
        }
    }

    /// Remove an endpoint. In-flight calls holding the `Arc` finish
    /// normally; the endpoint just stops being a candidate.
    pub fn deregister(&self, id: &str) -> bool {
        let removed = self.endpoints.remove(id).is_some();
        if removed {
            info!(endpoint = %id, "endpoint deregistered");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<Endpoint<T>>> {
        self.endpoints.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn all(&self) -> Vec<Arc<Endpoint<T>>> {
        self.endpoints
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoints whose breaker would admit a request right now, ordered by
    /// priority ascending, then health score descending. Selection is a
    /// non-consuming peek: it can move an expired-cooldown breaker to
    /// half-open, but trial permits are only consumed when a call is
    /// actually dispatched.
    pub async fn candidates(&self) -> Vec<Arc<Endpoint<T>>> {
        let mut admitted = Vec::new();
        for endpoint in self.all() {
            if endpoint.breaker().is_available().await {
                let score = endpoint.health_score().await;
                admitted.push((endpoint, score));
            }
        }
        admitted.sort_by(|(a, a_score), (b, b_score)| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| b_score.total_cmp(a_score))
                .then_with(|| a.id().cmp(b.id()))
        });
        admitted.into_iter().map(|(endpoint, _)| endpoint).collect()
    }

    pub async fn get_status(&self, id: &str) -> Option<EndpointStatus> {
        match self.get(id) {
            Some(endpoint) => Some(endpoint.status().await),
            None => None,
        }
    }

    /// Status of every endpoint, ordered by id for stable output.
    pub async fn statuses(&self) -> Vec<EndpointStatus> {
        let mut statuses = Vec::with_capacity(self.len());
        for endpoint in self.all() {
            statuses.push(endpoint.status().await);
        }
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }
}

impl<T> std::fmt::Debug for EndpointRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.endpoints.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_registry() -> EndpointRegistry<&'static str> {
        EndpointRegistry::new(FailoverConfig {
            failure_threshold: 2,
            cooldown_seconds: 60,
            ..FailoverConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let registry = test_registry();
        registry
            .register("primary", "conn-1", 1, BTreeMap::new())
            .unwrap();
        assert_eq!(registry.len(), 1);
        let endpoint = registry.get("primary").unwrap();
        assert_eq!(*endpoint.handle(), "conn-1");
        assert_eq!(endpoint.priority(), 1);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let registry = test_registry();
        registry
            .register("primary", "conn-1", 1, BTreeMap::new())
            .unwrap();
        let err = registry
            .register("primary", "conn-2", 2, BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, FailoverError::Configuration(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_id_is_rejected() {
        let registry = test_registry();
        assert!(registry.register("", "conn", 1, BTreeMap::new()).is_err());
    }

    #[test]
    fn deregister_removes_candidate_but_not_inflight_arc() {
        let registry = test_registry();
        let endpoint = registry
            .register("primary", "conn-1", 1, BTreeMap::new())
            .unwrap();
        assert!(registry.deregister("primary"));
        assert!(!registry.deregister("primary"));
        assert!(registry.is_empty());
        // The handed-out Arc stays usable.
        assert_eq!(endpoint.id(), "primary");
    }

    #[test]
    fn invalid_config_fails_construction() {
        let result = EndpointRegistry::<()>::new(FailoverConfig {
            failure_threshold: 0,
            ..FailoverConfig::default()
        });
        assert!(matches!(result, Err(FailoverError::Configuration(_))));
    }

    #[tokio::test]
    async fn candidates_order_by_priority_then_score() {
        let registry = test_registry();
        // "slow" has the better priority, "fast" the better score.
        let slow = registry
            .register("slow", "conn-a", 1, BTreeMap::new())
            .unwrap();
        let fast = registry
            .register("fast", "conn-b", 2, BTreeMap::new())
            .unwrap();
        for _ in 0..10 {
            slow.window().record(Duration::from_millis(2000), true);
            slow.window().record(Duration::from_millis(2000), false);
            fast.window().record(Duration::from_millis(5), true);
        }

        let candidates = registry.candidates().await;
        let ids: Vec<&str> = candidates.iter().map(|e| e.id()).collect();
        assert_eq!(ids, ["slow", "fast"]);
        assert!(slow.health_score().await < fast.health_score().await);
    }

    #[tokio::test]
    async fn score_breaks_priority_ties() {
        let registry = test_registry();
        let a = registry.register("a", "conn", 1, BTreeMap::new()).unwrap();
        let b = registry.register("b", "conn", 1, BTreeMap::new()).unwrap();
        for _ in 0..10 {
            a.window().record(Duration::from_millis(900), false);
            b.window().record(Duration::from_millis(5), true);
        }
        let ids: Vec<String> = registry
            .candidates()
            .await
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[tokio::test]
    async fn open_breaker_is_excluded_from_candidates() {
        let registry = test_registry();
        let bad = registry.register("bad", "conn", 1, BTreeMap::new()).unwrap();
        registry.register("good", "conn", 2, BTreeMap::new()).unwrap();

        bad.breaker().record_failure("down").await;
        bad.breaker().record_failure("down").await;

        let candidates = registry.candidates().await;
        let ids: Vec<&str> = candidates.iter().map(|e| e.id()).collect();
        assert_eq!(ids, ["good"]);
    }

    #[tokio::test]
    async fn candidate_selection_leaves_trial_permits_intact() {
        let registry = Arc::new(
            EndpointRegistry::<&str>::new(FailoverConfig {
                failure_threshold: 1,
                cooldown_seconds: 1,
                half_open_trial_count: 3,
                ..FailoverConfig::default()
            })
            .unwrap(),
        );
        let endpoint = registry.register("ep", "conn", 1, BTreeMap::new()).unwrap();
        endpoint.breaker().record_failure("down").await;
        tokio::time::sleep(Duration::from_millis(1100)).await;

        // Repeated selection must not drain the half-open budget.
        for _ in 0..5 {
            assert_eq!(registry.candidates().await.len(), 1);
        }
        for _ in 0..3 {
            assert!(endpoint.breaker().allow_request().await);
        }
        assert!(!endpoint.breaker().allow_request().await);
    }

    #[tokio::test]
    async fn statuses_cover_all_endpoints() {
        let registry = test_registry();
        registry.register("b", "conn", 2, BTreeMap::new()).unwrap();
        registry.register("a", "conn", 1, BTreeMap::new()).unwrap();
        let statuses = registry.statuses().await;
        let ids: Vec<&str> = statuses.iter().map(|s| s.id.as_ref()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(registry.get_status("missing").await.is_none());
    }
}
