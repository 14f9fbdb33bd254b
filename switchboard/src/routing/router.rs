//! The smart router: scoring, timed attempts, and failover.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::RouterConfig;
use super::decision::{DecisionLog, RoutingDecision};
use super::error::{ProviderError, RouterError};
use super::health::HealthMonitor;
use super::metrics::{HealthStatus, ProviderMetrics, ProviderState};
use super::policy::{FallbackPolicy, TaskClassPolicy};
use super::provider::{call_cost, ProviderClient, ProviderReply, ProviderResponse};
use super::scoreboard::{RetryRecord, RetryScoreboard};
use super::strategy::{rank_providers, ProviderScore, RoutingStrategy, RoutingWeights};

/// Decisions included in [`RouterMetadata::recent_decisions`].
const METADATA_RECENT_DECISIONS: usize = 10;

/// A registered provider and its guarded state.
pub(crate) struct ProviderEntry {
    client: Arc<dyn ProviderClient>,
    state: Mutex<ProviderState>,
}

impl ProviderEntry {
    fn new(client: Arc<dyn ProviderClient>, window: usize) -> Self {
        let state = ProviderState::new(client.cost_per_1k_tokens(), window);
        Self {
            client,
            state: Mutex::new(state),
        }
    }

    pub fn name(&self) -> &str {
        self.client.name()
    }

    async fn snapshot(&self) -> ProviderMetrics {
        self.state.lock().await.snapshot(self.name())
    }

    async fn record_success(&self, latency_ms: u64, tokens_used: u32) -> ProviderMetrics {
        let mut state = self.state.lock().await;
        let previous = state.record_success(latency_ms, tokens_used);
        log_transition(self.name(), previous, state.health(), "request succeeded");
        state.snapshot(self.name())
    }

    async fn record_failure(
        &self,
        latency_ms: u64,
        error: &ProviderError,
        threshold: u32,
    ) -> ProviderMetrics {
        let mut state = self.state.lock().await;
        let previous = state.record_failure(latency_ms, &error.to_string(), threshold);
        log_transition(self.name(), previous, state.health(), "request failed");
        state.snapshot(self.name())
    }

    /// Run one liveness probe under `timeout` and apply the outcome.
    pub(crate) async fn probe(&self, timeout: Duration, threshold: u32) -> HealthStatus {
        let outcome = match tokio::time::timeout(timeout, self.client.probe()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };
        let mut state = self.state.lock().await;
        let previous = match &outcome {
            Ok(()) => state.record_probe_success(),
            Err(err) => {
                debug!(provider = self.name(), error = %err, "Probe failed");
                state.record_probe_failure(&err.to_string(), threshold)
            }
        };
        log_transition(self.name(), previous, state.health(), "probe");
        state.health()
    }
}

fn log_transition(provider: &str, previous: HealthStatus, current: HealthStatus, cause: &str) {
    if previous != current {
        info!(provider, from = %previous, to = %current, cause, "Provider health changed");
    }
}

/// Runtime-mutable routing settings.
struct RouterSettings {
    strategy: RoutingStrategy,
    weights: RoutingWeights,
    policy: FallbackPolicy,
}

/// One provider the current request may try, in ranked order.
struct PlannedAttempt {
    entry: Arc<ProviderEntry>,
    score: ProviderScore,
    rank: usize,
    last_resort: bool,
}

/// Read-only view of the router for dashboards and debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterMetadata {
    pub strategy: RoutingStrategy,
    pub weights: RoutingWeights,
    pub default_task_class: String,
    pub providers: Vec<ProviderMetrics>,
    pub healthy_providers: usize,
    pub retry_scoreboard: RetryScoreboard,
    pub recent_decisions: Vec<RoutingDecision>,
    pub decision_log_path: Option<PathBuf>,
}

/// Routes prompts across registered providers.
///
/// Providers are registered before the router is shared; strategy, weights
/// and fallback policy can be swapped at any time.
pub struct SmartRouter {
    config: RouterConfig,
    providers: Vec<Arc<ProviderEntry>>,
    settings: RwLock<RouterSettings>,
    rotation: AtomicUsize,
    history: Mutex<VecDeque<RoutingDecision>>,
    scoreboard: Mutex<RetryScoreboard>,
    decision_log: Option<DecisionLog>,
}

impl SmartRouter {
    pub fn new(config: RouterConfig) -> Result<Self, RouterError> {
        config.validate()?;
        let decision_log = config
            .decision_log_path
            .as_deref()
            .map(DecisionLog::open)
            .transpose()?;
        let settings = RouterSettings {
            strategy: config.strategy,
            weights: config.weights,
            policy: FallbackPolicy::default(),
        };
        let scoreboard = RetryScoreboard::new(config.retry_history_limit);
        Ok(Self {
            providers: Vec::new(),
            settings: RwLock::new(settings),
            rotation: AtomicUsize::new(0),
            history: Mutex::new(VecDeque::new()),
            scoreboard: Mutex::new(scoreboard),
            decision_log,
            config,
        })
    }

    pub fn with_provider(mut self, client: Arc<dyn ProviderClient>) -> Result<Self, RouterError> {
        self.add_provider(client)?;
        Ok(self)
    }

    /// Register a provider. Declaration order breaks score ties.
    pub fn add_provider(&mut self, client: Arc<dyn ProviderClient>) -> Result<(), RouterError> {
        if self.providers.iter().any(|p| p.name() == client.name()) {
            return Err(RouterError::DuplicateProvider(client.name().to_string()));
        }
        info!(
            provider = client.name(),
            cost_per_1k_tokens = client.cost_per_1k_tokens(),
            "Registered provider"
        );
        self.providers
            .push(Arc::new(ProviderEntry::new(client, self.config.metrics_window)));
        Ok(())
    }

    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Result<Self, RouterError> {
        policy.validate()?;
        self.settings.get_mut().policy = policy;
        Ok(self)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    // ── Runtime settings ──

    pub async fn strategy(&self) -> RoutingStrategy {
        self.settings.read().await.strategy
    }

    pub async fn set_strategy(&self, strategy: RoutingStrategy) {
        let mut settings = self.settings.write().await;
        if settings.strategy != strategy {
            info!(from = %settings.strategy, to = %strategy, "Routing strategy changed");
            settings.strategy = strategy;
        }
    }

    pub async fn weights(&self) -> RoutingWeights {
        self.settings.read().await.weights
    }

    /// Replace the hybrid weights; rejected unless they sum to 1.0.
    pub async fn set_weights(
        &self,
        cost: f64,
        performance: f64,
        availability: f64,
    ) -> Result<(), RouterError> {
        let weights = RoutingWeights::new(cost, performance, availability)?;
        self.settings.write().await.weights = weights;
        info!(cost, performance, availability, "Routing weights updated");
        Ok(())
    }

    pub async fn fallback_policy(&self) -> FallbackPolicy {
        self.settings.read().await.policy.clone()
    }

    /// Swap the fallback policy; an invalid policy leaves the current one.
    pub async fn set_fallback_policy(&self, policy: FallbackPolicy) -> Result<(), RouterError> {
        policy.validate()?;
        let classes = policy.task_classes.len();
        self.settings.write().await.policy = policy;
        info!(classes, "Fallback policy reloaded");
        Ok(())
    }

    // ── Routing ──

    /// Route one prompt, failing over until a provider answers.
    ///
    /// `task_type` selects the fallback policy class. `force_provider`
    /// bypasses scoring and makes exactly one attempt against that provider.
    pub async fn route_request(
        &self,
        prompt: &str,
        task_type: Option<&str>,
        max_tokens: Option<u32>,
        force_provider: Option<&str>,
    ) -> Result<ProviderResponse, RouterError> {
        if self.providers.is_empty() {
            return Err(RouterError::NoProviders);
        }

        let (strategy, weights, policy) = {
            let settings = self.settings.read().await;
            (
                settings.strategy,
                settings.weights,
                settings.policy.policy_for(task_type).clone(),
            )
        };

        let snapshots = self.snapshots().await;
        let (plan, preferred) = match force_provider {
            Some(name) => (self.forced_plan(name, strategy, &weights, &snapshots)?, None),
            None => self.ranked_plan(strategy, &weights, &policy, &snapshots),
        };
        if plan.is_empty() {
            warn!(
                task_type = task_type.unwrap_or("default"),
                "No routable provider"
            );
            return Err(RouterError::NoHealthyProvider {
                tried: Vec::new(),
                last_error: None,
            });
        }

        debug!(
            %strategy,
            task_type = task_type.unwrap_or("default"),
            plan = ?plan.iter().map(|p| p.entry.name()).collect::<Vec<_>>(),
            "Routing request"
        );
        self.execute(
            plan,
            preferred,
            strategy,
            &policy,
            prompt,
            max_tokens,
            force_provider.is_some(),
        )
        .await
    }

    async fn snapshots(&self) -> Vec<ProviderMetrics> {
        let mut snapshots = Vec::with_capacity(self.providers.len());
        for entry in &self.providers {
            snapshots.push(entry.snapshot().await);
        }
        snapshots
    }

    fn entry(&self, name: &str) -> Result<&Arc<ProviderEntry>, RouterError> {
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| RouterError::UnknownProvider(name.to_string()))
    }

    fn forced_plan(
        &self,
        name: &str,
        strategy: RoutingStrategy,
        weights: &RoutingWeights,
        snapshots: &[ProviderMetrics],
    ) -> Result<Vec<PlannedAttempt>, RouterError> {
        let entry = self.entry(name)?;
        let snapshot: Vec<ProviderMetrics> = snapshots
            .iter()
            .filter(|m| m.provider == name)
            .cloned()
            .collect();
        let last_resort = snapshot
            .first()
            .is_some_and(|m| !m.health_status.is_routable());
        Ok(rank_providers(strategy, weights, &snapshot, 0)
            .into_iter()
            .map(|score| PlannedAttempt {
                entry: Arc::clone(entry),
                score,
                rank: 1,
                last_resort,
            })
            .collect())
    }

    /// Rank routable providers (then unhealthy ones, if the class allows a
    /// last resort) and cap the plan at the class's attempt limit.
    ///
    /// Also returns the top-ranked routable provider, so a request served
    /// by anything further down the plan counts as a route degradation.
    fn ranked_plan(
        &self,
        strategy: RoutingStrategy,
        weights: &RoutingWeights,
        policy: &TaskClassPolicy,
        snapshots: &[ProviderMetrics],
    ) -> (Vec<PlannedAttempt>, Option<String>) {
        let (routable, unhealthy): (Vec<ProviderMetrics>, Vec<ProviderMetrics>) = snapshots
            .iter()
            .cloned()
            .partition(|m| m.health_status.is_routable());

        let rotation = if strategy == RoutingStrategy::RoundRobin {
            self.rotation.fetch_add(1, Ordering::Relaxed)
        } else {
            0
        };
        let mut ranked: Vec<(ProviderScore, bool)> =
            rank_providers(strategy, weights, &routable, rotation)
                .into_iter()
                .map(|s| (s, false))
                .collect();
        let preferred = ranked.first().map(|(s, _)| s.provider.clone());
        if policy.allow_unhealthy_last_resort {
            ranked.extend(
                rank_providers(strategy, weights, &unhealthy, 0)
                    .into_iter()
                    .map(|s| (s, true)),
            );
        }

        let cap = policy.attempt_cap(self.providers.len());
        let plan = ranked
            .into_iter()
            .take(cap)
            .enumerate()
            .filter_map(|(i, (score, last_resort))| {
                let entry = self.entry(&score.provider).ok()?;
                Some(PlannedAttempt {
                    entry: Arc::clone(entry),
                    score,
                    rank: i + 1,
                    last_resort,
                })
            })
            .collect();
        (plan, preferred)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        plan: Vec<PlannedAttempt>,
        preferred: Option<String>,
        strategy: RoutingStrategy,
        policy: &TaskClassPolicy,
        prompt: &str,
        max_tokens: Option<u32>,
        forced: bool,
    ) -> Result<ProviderResponse, RouterError> {
        let started = Instant::now();
        let attempt_timeout = policy
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.request_timeout());
        let budget = policy.total_budget();

        let mut tried: Vec<String> = Vec::new();
        let mut last_failure: Option<(String, String)> = None;

        for (index, planned) in plan.iter().enumerate() {
            let attempt = index as u32 + 1;
            let name = planned.entry.name().to_string();

            if index > 0 {
                let delay = policy.backoff_for(index as u32 - 1);
                if let Some(budget) = budget {
                    if started.elapsed() + delay >= budget {
                        warn!(
                            attempt,
                            budget_ms = budget.as_millis() as u64,
                            "Request budget exhausted before failover"
                        );
                        break;
                    }
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            let timeout = match budget {
                Some(budget) => attempt_timeout.min(budget.saturating_sub(started.elapsed())),
                None => attempt_timeout,
            };
            if timeout.is_zero() {
                break;
            }

            tried.push(name.clone());
            let call_started = Instant::now();
            let outcome = match tokio::time::timeout(
                timeout,
                planned.entry.client.send(prompt, max_tokens),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(timeout)),
            };
            let latency_ms = call_started.elapsed().as_millis() as u64;
            let selection = describe_selection(
                strategy,
                planned,
                forced,
                last_failure.as_ref().map(|(p, _)| p.as_str()),
            );

            match outcome {
                Ok(reply) => {
                    return Ok(self
                        .complete(
                            planned,
                            reply,
                            latency_ms,
                            attempt,
                            strategy,
                            selection,
                            last_failure,
                            preferred.as_deref(),
                        )
                        .await);
                }
                Err(err) => {
                    warn!(
                        provider = %name,
                        attempt,
                        retryable = err.is_retryable(),
                        error = %err,
                        "Provider attempt failed"
                    );
                    let snapshot = planned
                        .entry
                        .record_failure(latency_ms, &err, self.config.failure_threshold)
                        .await;
                    self.record_decision(RoutingDecision {
                        timestamp: Utc::now(),
                        strategy,
                        provider_selected: name.clone(),
                        latency: latency_ms,
                        cost: 0.0,
                        fallback_used: index > 0,
                        reason_for_selection: format!("{selection}; failed: {err}"),
                        confidence: planned.score.score,
                        tokens_used: 0,
                        metrics_snapshot: snapshot,
                    })
                    .await;
                    if let Some((from, reason)) = &last_failure {
                        self.scoreboard.lock().await.record_retry(RetryRecord {
                            timestamp: Utc::now(),
                            from_provider: from.clone(),
                            to_provider: name.clone(),
                            attempt,
                            reason: reason.clone(),
                            succeeded: false,
                        });
                    }
                    last_failure = Some((name, err.to_string()));
                }
            }
        }

        warn!(tried = ?tried, "All provider attempts failed");
        Err(RouterError::NoHealthyProvider {
            tried,
            last_error: last_failure.map(|(_, e)| e),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete(
        &self,
        planned: &PlannedAttempt,
        reply: ProviderReply,
        latency_ms: u64,
        attempt: u32,
        strategy: RoutingStrategy,
        selection: String,
        last_failure: Option<(String, String)>,
        preferred: Option<&str>,
    ) -> ProviderResponse {
        let name = planned.entry.name().to_string();
        let snapshot = planned
            .entry
            .record_success(latency_ms, reply.tokens_used)
            .await;
        let cost = call_cost(reply.tokens_used, snapshot.cost_per_1k_tokens);
        let fallback_used = attempt > 1;

        self.record_decision(RoutingDecision {
            timestamp: Utc::now(),
            strategy,
            provider_selected: name.clone(),
            latency: latency_ms,
            cost,
            fallback_used,
            reason_for_selection: selection,
            confidence: planned.score.score,
            tokens_used: reply.tokens_used,
            metrics_snapshot: snapshot,
        })
        .await;

        {
            let mut scoreboard = self.scoreboard.lock().await;
            if let Some((from, reason)) = last_failure {
                scoreboard.record_retry(RetryRecord {
                    timestamp: Utc::now(),
                    from_provider: from,
                    to_provider: name.clone(),
                    attempt,
                    reason,
                    succeeded: true,
                });
            }
            if preferred.is_some_and(|p| p != name) {
                scoreboard.record_degradation();
            }
        }

        debug!(provider = %name, attempt, latency_ms, tokens = reply.tokens_used, "Request served");
        ProviderResponse {
            provider: name,
            content: reply.content,
            tokens_used: reply.tokens_used,
            latency_ms,
            cost,
            strategy,
            attempts: attempt,
            fallback_used,
        }
    }

    async fn record_decision(&self, decision: RoutingDecision) {
        if let Some(log) = &self.decision_log {
            if let Err(err) = log.append(&decision).await {
                warn!(path = %log.path().display(), error = %err, "Failed to append routing decision");
            }
        }
        let mut history = self.history.lock().await;
        if history.len() >= self.config.history_limit.max(1) {
            history.pop_front();
        }
        history.push_back(decision);
    }

    // ── Health ──

    /// Probe every provider once, concurrently.
    pub async fn probe_providers(&self) -> Vec<(String, HealthStatus)> {
        let timeout = self.config.health.probe_timeout();
        let threshold = self.config.failure_threshold;
        let probes = self.providers.iter().map(|entry| async move {
            let status = entry.probe(timeout, threshold).await;
            (entry.name().to_string(), status)
        });
        futures::future::join_all(probes).await
    }

    /// Start background probing; `None` when health checks are disabled.
    pub fn start_health_monitor(&self) -> Option<HealthMonitor> {
        let health = &self.config.health;
        if !health.enabled {
            info!("Health monitor disabled");
            return None;
        }
        Some(HealthMonitor::spawn(
            &self.providers,
            health.interval(),
            health.probe_timeout(),
            self.config.failure_threshold,
        ))
    }

    // ── Read-only accessors ──

    /// Metrics for every provider, in declaration order.
    pub async fn get_provider_metrics(&self) -> Vec<ProviderMetrics> {
        self.snapshots().await
    }

    pub async fn provider_metrics(&self, name: &str) -> Result<ProviderMetrics, RouterError> {
        Ok(self.entry(name)?.snapshot().await)
    }

    /// The most recent decisions, oldest first.
    pub async fn get_routing_history(&self, limit: Option<usize>) -> Vec<RoutingDecision> {
        let history = self.history.lock().await;
        let skip = limit.map_or(0, |l| history.len().saturating_sub(l));
        history.iter().skip(skip).cloned().collect()
    }

    pub async fn get_retry_scoreboard(&self) -> RetryScoreboard {
        self.scoreboard.lock().await.clone()
    }

    pub async fn healthy_provider_count(&self) -> usize {
        self.snapshots()
            .await
            .iter()
            .filter(|m| m.health_status == HealthStatus::Healthy)
            .count()
    }

    pub async fn get_router_metadata(&self) -> RouterMetadata {
        let (strategy, weights, default_task_class) = {
            let settings = self.settings.read().await;
            (
                settings.strategy,
                settings.weights,
                settings.policy.default_class.clone(),
            )
        };
        let providers = self.snapshots().await;
        let healthy_providers = providers
            .iter()
            .filter(|m| m.health_status == HealthStatus::Healthy)
            .count();
        RouterMetadata {
            strategy,
            weights,
            default_task_class,
            providers,
            healthy_providers,
            retry_scoreboard: self.get_retry_scoreboard().await,
            recent_decisions: self
                .get_routing_history(Some(METADATA_RECENT_DECISIONS))
                .await,
            decision_log_path: self.decision_log.as_ref().map(|l| l.path().to_path_buf()),
        }
    }
}

fn describe_selection(
    strategy: RoutingStrategy,
    planned: &PlannedAttempt,
    forced: bool,
    failed_before: Option<&str>,
) -> String {
    let ranking = if forced {
        "forced provider".to_string()
    } else if strategy == RoutingStrategy::RoundRobin {
        format!("round robin position {}", planned.rank)
    } else {
        format!(
            "ranked #{} by {strategy} (score {:.3}; cost {:.2}, performance {:.2}, availability {:.2})",
            planned.rank,
            planned.score.score,
            planned.score.cost,
            planned.score.performance,
            planned.score.availability
        )
    };
    let mut reason = match failed_before {
        Some(previous) => format!("failover after {previous} failed; {ranking}"),
        None => ranking,
    };
    if planned.last_resort {
        reason.push_str("; last resort (unhealthy)");
    }
    reason
}
