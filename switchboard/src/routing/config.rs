//! Router configuration (`[router]` TOML section).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::strategy::{RoutingStrategy, RoutingWeights};
use crate::config::ConfigError;

/// Background liveness probing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Bound on one probe, headers and body included.
    pub probe_timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            probe_timeout_ms: 2_000,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    pub strategy: RoutingStrategy,
    pub weights: RoutingWeights,
    /// Per-attempt timeout when the task class does not set one.
    pub request_timeout_ms: u64,
    /// Consecutive failures that flip a provider to unhealthy.
    pub failure_threshold: u32,
    /// Samples kept per provider for latency and success rate.
    pub metrics_window: usize,
    /// Routing decisions kept in memory.
    pub history_limit: usize,
    pub retry_history_limit: usize,
    /// Append-only JSONL log of routing decisions.
    pub decision_log_path: Option<PathBuf>,
    pub health: HealthCheckConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::default(),
            weights: RoutingWeights::default(),
            request_timeout_ms: 5_000,
            failure_threshold: 3,
            metrics_window: 100,
            history_limit: 1_000,
            retry_history_limit: 100,
            decision_log_path: None,
            health: HealthCheckConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Defaults overlaid with `SWITCHBOARD_*` environment variables.
    ///
    /// Environment overrides are best-effort: an ill-formed value is logged
    /// and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(strategy) = env_parsed::<RoutingStrategy>("SWITCHBOARD_ROUTER_STRATEGY") {
            config.strategy = strategy;
        }
        if let Some(ms) = env_parsed::<u64>("SWITCHBOARD_REQUEST_TIMEOUT_MS").filter(|v| *v > 0) {
            config.request_timeout_ms = ms;
        }
        if let Some(n) = env_parsed::<u32>("SWITCHBOARD_FAILURE_THRESHOLD").filter(|v| *v > 0) {
            config.failure_threshold = n;
        }
        if let Some(path) = std::env::var("SWITCHBOARD_DECISION_LOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            config.decision_log_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = env_parsed::<u64>("SWITCHBOARD_HEALTH_INTERVAL_MS").filter(|v| *v > 0) {
            config.health.interval_ms = ms;
        }

        config
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("router.weights: {e}")))?;
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "router.request_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "router.failure_threshold must be at least 1".into(),
            ));
        }
        if self.metrics_window == 0 {
            return Err(ConfigError::Invalid(
                "router.metrics_window must be at least 1".into(),
            ));
        }
        if self.health.enabled && (self.health.interval_ms == 0 || self.health.probe_timeout_ms == 0)
        {
            return Err(ConfigError::Invalid(
                "router.health interval_ms and probe_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring ill-formed environment override");
            None
        }
    }
}
