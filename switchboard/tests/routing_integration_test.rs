//! Routing integration tests: SmartRouter through its public API.
//!
//! Providers are scripted doubles: each fails a configurable number of
//! calls, can sleep before answering, and reports probe health on demand.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use switchboard::routing::{read_decision_log, HealthCheckConfig};
use switchboard::{
    HealthStatus, ProviderClient, ProviderError, ProviderReply, RouterConfig, RouterError,
    RoutingStrategy, SmartRouter, SwitchboardConfig,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Scripted provider ─────────────────────────────────────────────────

struct Scripted {
    name: String,
    cost: f64,
    delay: Option<Duration>,
    failures_left: AtomicU32,
    calls: AtomicU32,
    probe_ok: AtomicBool,
}

impl Scripted {
    fn new(name: &str, cost: f64) -> Arc<Self> {
        Self::build(name, cost, 0, None)
    }

    fn failing(name: &str, cost: f64, failures: u32) -> Arc<Self> {
        Self::build(name, cost, failures, None)
    }

    fn slow(name: &str, cost: f64, delay: Duration) -> Arc<Self> {
        Self::build(name, cost, 0, Some(delay))
    }

    fn build(name: &str, cost: f64, failures: u32, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            cost,
            delay,
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            probe_ok: AtomicBool::new(true),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn cost_per_1k_tokens(&self) -> f64 {
        self.cost
    }

    async fn send(
        &self,
        prompt: &str,
        _max_tokens: Option<u32>,
    ) -> Result<ProviderReply, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Status {
                status: 500,
                message: "internal error".into(),
            });
        }
        Ok(ProviderReply {
            content: format!("{} says {prompt}", self.name),
            tokens_used: 200,
            latency_ms: 1,
        })
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::Connection("refused".into()))
        }
    }
}

fn router_with(config: RouterConfig, providers: &[Arc<Scripted>]) -> SmartRouter {
    let mut router = SmartRouter::new(config).unwrap();
    for provider in providers {
        router.add_provider(provider.clone()).unwrap();
    }
    router
}

// ── Selection ─────────────────────────────────────────────────────────

#[tokio::test]
async fn availability_prefers_reliable_provider() {
    init_tracing();
    let a = Scripted::new("a", 0.05);
    let b = Scripted::failing("b", 0.01, u32::MAX);
    let router = router_with(RouterConfig::default(), &[b.clone(), a.clone()]);

    // Drive b to unhealthy with forced calls.
    for _ in 0..3 {
        assert!(router.route_request("ping", None, None, Some("b")).await.is_err());
    }
    let b_metrics = router.provider_metrics("b").await.unwrap();
    assert_eq!(b_metrics.success_rate, 0.0);
    assert_eq!(b_metrics.health_status, HealthStatus::Unhealthy);

    router
        .set_strategy(RoutingStrategy::AvailabilityOptimized)
        .await;
    for _ in 0..10 {
        let response = router.route_request("hello", None, None, None).await.unwrap();
        assert_eq!(response.provider, "a");
        assert_eq!(response.attempts, 1);
    }
    assert_eq!(b.calls(), 3);
}

#[tokio::test]
async fn threshold_failures_remove_provider_from_rotation() {
    let a = Scripted::failing("a", 0.001, 3);
    let b = Scripted::new("b", 0.01);
    let router = router_with(RouterConfig::default(), &[a.clone(), b.clone()]);
    router.set_strategy(RoutingStrategy::CostOptimized).await;

    for _ in 0..3 {
        let response = router.route_request("hi", None, None, None).await.unwrap();
        assert_eq!(response.provider, "b");
        assert!(response.fallback_used);
    }
    assert_eq!(
        router.provider_metrics("a").await.unwrap().health_status,
        HealthStatus::Unhealthy
    );

    // a would now succeed, but it is not selected until it recovers.
    let response = router.route_request("hi", None, None, None).await.unwrap();
    assert_eq!(response.provider, "b");
    assert_eq!(a.calls(), 3);

    // b served as the top routable choice, so no new degradation.
    assert_eq!(router.get_retry_scoreboard().await.route_degradations, 3);
}

#[tokio::test]
async fn retry_scoreboard_counts_failures_then_success() {
    let k = 3;
    let providers: Vec<Arc<Scripted>> = (0..k)
        .map(|i| Scripted::failing(&format!("bad-{i}"), 0.001 * f64::from(i + 1), 1))
        .chain(std::iter::once(Scripted::new("good", 0.5)))
        .collect();
    let config = RouterConfig {
        strategy: RoutingStrategy::CostOptimized,
        ..Default::default()
    };
    // The default task class walks every provider.
    let router = router_with(config, &providers);

    let response = router.route_request("hi", None, None, None).await.unwrap();
    assert_eq!(response.provider, "good");
    assert_eq!(response.attempts, k + 1);

    let board = router.get_retry_scoreboard().await;
    assert_eq!(board.total_retries, u64::from(k));
    assert_eq!(board.successful_retries, 1);
    assert_eq!(board.failed_retries, u64::from(k - 1));
    assert_eq!(board.route_degradations, 1);
    assert_eq!(router.get_routing_history(None).await.len(), (k + 1) as usize);
}

#[tokio::test]
async fn round_robin_visits_every_healthy_provider() {
    let names = ["a", "b", "c", "d"];
    let providers: Vec<Arc<Scripted>> = names.iter().map(|n| Scripted::new(n, 0.01)).collect();
    let config = RouterConfig {
        strategy: RoutingStrategy::RoundRobin,
        ..Default::default()
    };
    let router = router_with(config, &providers);

    let mut seen = Vec::new();
    for _ in 0..names.len() {
        seen.push(router.route_request("hi", None, None, None).await.unwrap().provider);
    }
    seen.sort();
    assert_eq!(seen, names.map(String::from).to_vec());
}

#[tokio::test]
async fn exhausted_failover_names_tried_providers() {
    let a = Scripted::failing("a", 0.01, u32::MAX);
    let b = Scripted::failing("b", 0.02, u32::MAX);
    let router = router_with(RouterConfig::default(), &[a, b]);
    let err = router.route_request("hi", None, None, None).await.unwrap_err();
    match err {
        RouterError::NoHealthyProvider { tried, last_error } => {
            assert_eq!(tried.len(), 2);
            assert!(tried.contains(&"a".to_string()) && tried.contains(&"b".to_string()));
            assert!(last_error.unwrap().contains("500"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ── Timeouts and health ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn slow_provider_times_out_and_fails_over() {
    let slow = Scripted::slow("slow", 0.001, Duration::from_secs(60));
    let quick = Scripted::new("quick", 0.01);
    let config = RouterConfig {
        strategy: RoutingStrategy::CostOptimized,
        request_timeout_ms: 2_000,
        ..Default::default()
    };
    let router = router_with(config, &[slow.clone(), quick]);

    let response = router.route_request("hi", None, None, None).await.unwrap();
    assert_eq!(response.provider, "quick");
    let history = router.get_routing_history(None).await;
    assert_eq!(history[0].provider_selected, "slow");
    assert!(history[0].reason_for_selection.contains("timed out"));
    assert_eq!(history[0].metrics_snapshot.consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn health_monitor_restores_provider() {
    let flaky = Scripted::failing("flaky", 0.001, 3);
    let steady = Scripted::new("steady", 0.01);
    let config = RouterConfig {
        strategy: RoutingStrategy::CostOptimized,
        health: HealthCheckConfig {
            enabled: true,
            interval_ms: 5_000,
            probe_timeout_ms: 500,
        },
        ..Default::default()
    };
    let router = router_with(config, &[flaky.clone(), steady]).shared();

    for _ in 0..3 {
        router.route_request("hi", None, None, None).await.unwrap();
    }
    assert_eq!(
        router.provider_metrics("flaky").await.unwrap().health_status,
        HealthStatus::Unhealthy
    );

    // A failing probe keeps it out.
    flaky.probe_ok.store(false, Ordering::SeqCst);
    let monitor = router.start_health_monitor().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        router.provider_metrics("flaky").await.unwrap().health_status,
        HealthStatus::Unhealthy
    );

    flaky.probe_ok.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;
    let metrics = router.provider_metrics("flaky").await.unwrap();
    assert_eq!(metrics.health_status, HealthStatus::Healthy);
    assert_eq!(metrics.consecutive_failures, 0);

    let response = router.route_request("hi", None, None, None).await.unwrap();
    assert_eq!(response.provider, "flaky");

    monitor.shutdown().await;
}

// ── Decision log and configuration ────────────────────────────────────

#[tokio::test]
async fn decisions_are_appended_as_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("routing").join("decisions.jsonl");
    let config = RouterConfig {
        decision_log_path: Some(log_path.clone()),
        strategy: RoutingStrategy::CostOptimized,
        ..Default::default()
    };
    let router = router_with(
        config,
        &[Scripted::failing("a", 0.001, 1), Scripted::new("b", 0.01)],
    );
    router.route_request("one", None, None, None).await.unwrap();
    router.route_request("two", None, None, None).await.unwrap();

    let decisions = read_decision_log(&log_path).unwrap();
    assert_eq!(decisions.len(), 3);
    assert_eq!(decisions[0].provider_selected, "a");
    assert_eq!(decisions[0].tokens_used, 0);
    assert!(decisions[1].fallback_used);
    assert!((decisions[1].cost - 0.002).abs() < 1e-12);
    assert_eq!(decisions[2].provider_selected, "a");

    let meta = router.get_router_metadata().await;
    assert_eq!(meta.decision_log_path, Some(log_path));
    assert_eq!(meta.recent_decisions.len(), 3);
    assert_eq!(meta.retry_scoreboard.total_retries, 1);
}

#[tokio::test]
async fn router_built_from_toml_and_policy_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join("policy.yaml"),
        "default_class: interactive\ntask_classes:\n  interactive:\n    max_attempts: 1\n  batch:\n    max_attempts: 3\ntask_types:\n  nightly: batch\n",
    )?;
    let toml_path = dir.path().join("switchboard.toml");
    std::fs::write(
        &toml_path,
        "fallback_policy_path = \"policy.yaml\"\n\n[router]\nstrategy = \"cost_optimized\"\n\n[router.health]\nenabled = false\n",
    )?;

    let config = SwitchboardConfig::load(&toml_path)?;
    let policy = config.load_fallback_policy(dir.path())?;
    let router = router_with(
        config.router.clone(),
        &[Scripted::failing("a", 0.001, 1), Scripted::new("b", 0.01)],
    )
    .with_fallback_policy(policy)?;
    assert!(router.start_health_monitor().is_none());

    // interactive allows one attempt, so the first failure is final.
    assert!(router.route_request("hi", Some("chat"), None, None).await.is_err());
    let response = router
        .route_request("hi", Some("nightly"), None, None)
        .await?;
    assert_eq!(response.provider, "a");
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_share_state() {
    let a = Scripted::new("a", 0.01);
    let b = Scripted::new("b", 0.02);
    let config = RouterConfig {
        strategy: RoutingStrategy::RoundRobin,
        ..Default::default()
    };
    let router = router_with(config, &[a.clone(), b.clone()]).shared();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                router
                    .route_request(&format!("prompt {i}"), None, None, None)
                    .await
            })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }
    assert_eq!(a.calls() + b.calls(), 20);
    assert_eq!(a.calls(), 10);
    let metrics = router.get_provider_metrics().await;
    assert_eq!(metrics.iter().map(|m| m.total_requests).sum::<u64>(), 20);
}
