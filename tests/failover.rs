//! End-to-end failover scenarios: registry + router + breaker + checker
//! working together the way an embedding service would wire them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rpc_failover::{
    CircuitState, EndpointError, EndpointRegistry, FailoverConfig, FailoverError, FailoverRouter,
    HealthChecker,
};

fn fast_config() -> FailoverConfig {
    FailoverConfig {
        failure_threshold: 2,
        cooldown_seconds: 1,
        max_cooldown_seconds: 4,
        half_open_trial_count: 3,
        required_successes: 2,
        ..FailoverConfig::default()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn registry_with(
    config: FailoverConfig,
    endpoints: &[(&str, u32)],
) -> Arc<EndpointRegistry<String>> {
    init_tracing();
    let registry = Arc::new(EndpointRegistry::new(config).unwrap());
    for (id, priority) in endpoints {
        registry
            .register(*id, format!("conn-{id}"), *priority, BTreeMap::new())
            .unwrap();
    }
    registry
}

#[tokio::test]
async fn priority_dominates_health_score() {
    let registry = registry_with(fast_config(), &[("a", 1), ("b", 2)]);

    // "a" is mediocre (~50), "b" is excellent (~90), but "a" has the
    // better priority and must be attempted first.
    let a = registry.get("a").unwrap();
    let b = registry.get("b").unwrap();
    for _ in 0..20 {
        a.window().record(Duration::from_millis(800), true);
        a.window().record(Duration::from_millis(800), false);
        b.window().record(Duration::from_millis(10), true);
    }
    assert!(a.health_score().await < b.health_score().await);

    let router = FailoverRouter::new(Arc::clone(&registry));
    let winner = router
        .execute(|endpoint| async move { Ok::<_, EndpointError>(endpoint.id().to_string()) })
        .await
        .unwrap();
    assert_eq!(winner, "a");
}

#[tokio::test]
async fn walks_candidates_until_third_succeeds() {
    let registry = registry_with(fast_config(), &[("a", 1), ("b", 2), ("c", 3)]);
    let router = FailoverRouter::new(Arc::clone(&registry));

    let result = router
        .execute(|endpoint| async move {
            match endpoint.id() {
                "c" => Ok(endpoint.id().to_string()),
                _ => Err(EndpointError::ConnectionFailed("refused".into())),
            }
        })
        .await
        .unwrap();
    assert_eq!(result, "c");

    // Both losers were penalized once each, the winner not at all.
    assert_eq!(registry.get("a").unwrap().breaker().get_failure_count().await, 1);
    assert_eq!(registry.get("b").unwrap().breaker().get_failure_count().await, 1);
    assert_eq!(registry.get("c").unwrap().breaker().get_failure_count().await, 0);
    assert_eq!(registry.get("c").unwrap().window().success_rate(), Some(1.0));
}

#[tokio::test]
async fn repeated_failures_open_breaker_and_shrink_candidate_set() {
    let registry = registry_with(fast_config(), &[("a", 1), ("b", 2)]);
    let router = FailoverRouter::new(Arc::clone(&registry));

    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let calls = Arc::clone(&calls);
        let _ = router
            .execute(move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(EndpointError::Timeout)
                }
            })
            .await;
    }
    // Two sweeps over two endpoints tripped both breakers (threshold 2).
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        registry.get("a").unwrap().breaker().get_state().await,
        CircuitState::Open
    );
    assert_eq!(
        registry.get("b").unwrap().breaker().get_state().await,
        CircuitState::Open
    );

    // With every breaker open the operation is never invoked.
    let before = calls.load(Ordering::SeqCst);
    let err = router
        .execute(|_| async { Ok::<(), EndpointError>(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, FailoverError::NoHealthyEndpoints));
    assert_eq!(calls.load(Ordering::SeqCst), before);
}

#[tokio::test]
async fn breaker_recovery_restores_routing() {
    let registry = registry_with(fast_config(), &[("only", 1)]);
    let router = FailoverRouter::new(Arc::clone(&registry));

    for _ in 0..2 {
        let _ = router
            .execute(|_| async { Err::<(), _>(EndpointError::Timeout) })
            .await;
    }
    assert!(matches!(
        router.execute(|_| async { Ok::<(), EndpointError>(()) }).await,
        Err(FailoverError::NoHealthyEndpoints)
    ));

    tokio::time::sleep(Duration::from_millis(1100)).await;

    // Half-open trials: required_successes routed successes close it.
    for _ in 0..2 {
        router
            .execute(|_| async { Ok::<(), EndpointError>(()) })
            .await
            .unwrap();
    }
    let endpoint = registry.get("only").unwrap();
    assert_eq!(endpoint.breaker().get_state().await, CircuitState::Closed);
    assert_eq!(endpoint.breaker().get_failure_count().await, 0);
}

#[tokio::test]
async fn checker_sidelines_endpoint_then_router_avoids_it() {
    let registry = registry_with(fast_config(), &[("primary", 1), ("backup", 2)]);
    let checker = HealthChecker::new(Arc::clone(&registry), |endpoint| async move {
        if endpoint.id() == "primary" {
            Err(EndpointError::ConnectionFailed("refused".into()))
        } else {
            Ok(())
        }
    });

    checker.run_sweep().await;
    checker.run_sweep().await;
    assert_eq!(
        registry.get("primary").unwrap().breaker().get_state().await,
        CircuitState::Open
    );

    // Router goes straight to backup; primary's operation never runs.
    let router = FailoverRouter::new(Arc::clone(&registry));
    let winner = router
        .execute(|endpoint| async move { Ok::<_, EndpointError>(endpoint.id().to_string()) })
        .await
        .unwrap();
    assert_eq!(winner, "backup");
}

#[tokio::test]
async fn status_reflects_traffic_and_breaker_state() {
    let registry = registry_with(fast_config(), &[("ep", 1)]);
    let router = FailoverRouter::new(Arc::clone(&registry));

    for _ in 0..8 {
        router
            .execute(|_| async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<(), EndpointError>(())
            })
            .await
            .unwrap();
    }

    let status = registry.get_status("ep").await.unwrap();
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.sample_count, 8);
    assert_eq!(status.success_rate, Some(1.0));
    assert!(status.latency_p50_ms.unwrap() >= 5);
    assert!(status.health_score > 80.0);

    let json = serde_json::to_string(&registry.statuses().await).unwrap();
    assert!(json.contains("\"closed\""));
}

#[tokio::test]
async fn half_open_endpoint_shadowed_by_winner_can_still_recover() {
    let config = FailoverConfig {
        failure_threshold: 1,
        cooldown_seconds: 1,
        half_open_trial_count: 3,
        required_successes: 2,
        ..FailoverConfig::default()
    };
    let registry = registry_with(config, &[("good", 1), ("flaky", 2)]);
    let router = FailoverRouter::new(Arc::clone(&registry));

    let flaky = registry.get("flaky").unwrap();
    flaky.breaker().record_failure("down").await;
    assert_eq!(flaky.breaker().get_state().await, CircuitState::Open);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    // "good" wins every call; "flaky" is selected but never attempted and
    // must not burn through its half-open trial budget in the process.
    for _ in 0..3 {
        let winner = router
            .execute(|endpoint| async move { Ok::<_, EndpointError>(endpoint.id().to_string()) })
            .await
            .unwrap();
        assert_eq!(winner, "good");
    }
    assert!(flaky.breaker().is_available().await);

    // Once the winner disappears, the shadowed endpoint still has trial
    // permits and can close its breaker through routed traffic.
    registry.deregister("good");
    for _ in 0..2 {
        let winner = router
            .execute(|endpoint| async move { Ok::<_, EndpointError>(endpoint.id().to_string()) })
            .await
            .unwrap();
        assert_eq!(winner, "flaky");
    }
    assert_eq!(flaky.breaker().get_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn deregistered_endpoint_receives_no_traffic() {
    let registry = registry_with(fast_config(), &[("a", 1), ("b", 2)]);
    let router = FailoverRouter::new(Arc::clone(&registry));

    assert!(registry.deregister("a"));
    let winner = router
        .execute(|endpoint| async move { Ok::<_, EndpointError>(endpoint.id().to_string()) })
        .await
        .unwrap();
    assert_eq!(winner, "b");
}
