//! Rolling per-provider metrics and the health state machine.
//!
//! ```text
//!            failure                 consecutive_failures >= threshold
//! Healthy ─────────────► Degraded ─────────────────────────────────► Unhealthy
//!    ▲                      │                                          │
//!    └──────── success (live request or probe) resets failures ◄───────┘
//! ```

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Recent failures, but below the threshold. Still routable.
    Degraded,
    /// Excluded from routing until a success is observed.
    Unhealthy,
}

impl HealthStatus {
    pub fn is_routable(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    latency_ms: u64,
    success: bool,
}

/// Fixed-size window of recent request outcomes; the oldest sample is
/// evicted once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct MetricsWindow {
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl MetricsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, latency_ms: u64, success: bool) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            latency_ms,
            success,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Share of successful samples; 1.0 for an empty window so that new
    /// providers are not penalized before they have been tried.
    pub fn success_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 1.0;
        }
        let ok = self.samples.iter().filter(|s| s.success).count();
        ok as f64 / self.samples.len() as f64
    }

    /// Mean latency of successful samples; failures (often timeouts) would
    /// otherwise dominate the figure.
    pub fn avg_latency_ms(&self) -> Option<f64> {
        let (sum, count) = self
            .samples
            .iter()
            .filter(|s| s.success)
            .fold((0u64, 0u64), |(sum, n), s| (sum + s.latency_ms, n + 1));
        (count > 0).then(|| sum as f64 / count as f64)
    }
}

/// Read-only snapshot of one provider's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub provider: String,
    pub avg_latency_ms: Option<f64>,
    pub success_rate: f64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_tokens: u64,
    pub cost_per_1k_tokens: f64,
    pub last_request_at: Option<DateTime<Utc>>,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub health_status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub window_samples: usize,
}

/// Mutable per-provider state, guarded by its own lock in the router.
#[derive(Debug)]
pub(crate) struct ProviderState {
    window: MetricsWindow,
    health: HealthStatus,
    consecutive_failures: u32,
    total_requests: u64,
    total_failures: u64,
    total_tokens: u64,
    cost_per_1k_tokens: f64,
    last_request_at: Option<DateTime<Utc>>,
    last_probe_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl ProviderState {
    pub fn new(cost_per_1k_tokens: f64, window: usize) -> Self {
        Self {
            window: MetricsWindow::new(window),
            health: HealthStatus::Healthy,
            consecutive_failures: 0,
            total_requests: 0,
            total_failures: 0,
            total_tokens: 0,
            cost_per_1k_tokens,
            last_request_at: None,
            last_probe_at: None,
            last_error: None,
        }
    }

    pub fn health(&self) -> HealthStatus {
        self.health
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// A live request succeeded. Returns the previous health status.
    pub fn record_success(&mut self, latency_ms: u64, tokens_used: u32) -> HealthStatus {
        self.total_requests += 1;
        self.total_tokens += u64::from(tokens_used);
        self.last_request_at = Some(Utc::now());
        self.window.record(latency_ms, true);
        self.mark_success()
    }

    /// A live request failed (error, bad status, or timeout). Returns the
    /// previous health status.
    pub fn record_failure(&mut self, latency_ms: u64, error: &str, threshold: u32) -> HealthStatus {
        self.total_requests += 1;
        self.total_failures += 1;
        self.last_request_at = Some(Utc::now());
        self.window.record(latency_ms, false);
        self.mark_failure(error, threshold)
    }

    /// Probes move the state machine but do not count as traffic.
    pub fn record_probe_success(&mut self) -> HealthStatus {
        self.last_probe_at = Some(Utc::now());
        self.mark_success()
    }

    pub fn record_probe_failure(&mut self, error: &str, threshold: u32) -> HealthStatus {
        self.last_probe_at = Some(Utc::now());
        self.mark_failure(error, threshold)
    }

    fn mark_success(&mut self) -> HealthStatus {
        let previous = self.health;
        self.consecutive_failures = 0;
        self.health = HealthStatus::Healthy;
        previous
    }

    fn mark_failure(&mut self, error: &str, threshold: u32) -> HealthStatus {
        let previous = self.health;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.health = if self.consecutive_failures >= threshold.max(1) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        previous
    }

    pub fn snapshot(&self, provider: &str) -> ProviderMetrics {
        ProviderMetrics {
            provider: provider.to_string(),
            avg_latency_ms: self.window.avg_latency_ms(),
            success_rate: self.window.success_rate(),
            total_requests: self.total_requests,
            total_failures: self.total_failures,
            total_tokens: self.total_tokens,
            cost_per_1k_tokens: self.cost_per_1k_tokens,
            last_request_at: self.last_request_at,
            last_probe_at: self.last_probe_at,
            health_status: self.health,
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
            window_samples: self.window.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_defaults() {
        let window = MetricsWindow::new(10);
        assert!(window.is_empty());
        assert_eq!(window.success_rate(), 1.0);
        assert_eq!(window.avg_latency_ms(), None);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = MetricsWindow::new(3);
        window.record(100, false);
        window.record(10, true);
        window.record(20, true);
        window.record(30, true);
        assert_eq!(window.len(), 3);
        assert_eq!(window.success_rate(), 1.0);
        assert_eq!(window.avg_latency_ms(), Some(20.0));
    }

    #[test]
    fn test_avg_latency_ignores_failures() {
        let mut window = MetricsWindow::new(10);
        window.record(50, true);
        window.record(5000, false);
        assert_eq!(window.avg_latency_ms(), Some(50.0));
        assert_eq!(window.success_rate(), 0.5);
    }

    #[test]
    fn test_health_state_machine() {
        let mut state = ProviderState::new(0.01, 100);
        assert_eq!(state.health(), HealthStatus::Healthy);

        state.record_failure(10, "boom", 3);
        assert_eq!(state.health(), HealthStatus::Degraded);
        state.record_failure(10, "boom", 3);
        assert_eq!(state.health(), HealthStatus::Degraded);
        let previous = state.record_failure(10, "boom", 3);
        assert_eq!(previous, HealthStatus::Degraded);
        assert_eq!(state.health(), HealthStatus::Unhealthy);
        assert_eq!(state.consecutive_failures(), 3);

        let previous = state.record_success(20, 100);
        assert_eq!(previous, HealthStatus::Unhealthy);
        assert_eq!(state.health(), HealthStatus::Healthy);
        assert_eq!(state.consecutive_failures(), 0);
    }

    #[test]
    fn test_probe_recovers_without_counting_traffic() {
        let mut state = ProviderState::new(0.01, 100);
        state.record_probe_failure("refused", 1);
        assert_eq!(state.health(), HealthStatus::Unhealthy);
        state.record_probe_success();
        assert_eq!(state.health(), HealthStatus::Healthy);

        let snap = state.snapshot("p");
        assert_eq!(snap.total_requests, 0);
        assert!(snap.last_probe_at.is_some());
        assert_eq!(snap.last_error.as_deref(), Some("refused"));
    }

    #[test]
    fn test_snapshot_totals() {
        let mut state = ProviderState::new(0.5, 100);
        state.record_success(40, 1200);
        state.record_failure(900, "timeout", 3);
        let snap = state.snapshot("alpha");
        assert_eq!(snap.provider, "alpha");
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.total_failures, 1);
        assert_eq!(snap.total_tokens, 1200);
        assert_eq!(snap.avg_latency_ms, Some(40.0));
        assert_eq!(snap.health_status, HealthStatus::Degraded);
        assert_eq!(snap.window_samples, 2);
    }
}
