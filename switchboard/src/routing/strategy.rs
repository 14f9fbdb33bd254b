//! Provider scoring.
//!
//! Every strategy is a pure function of provider snapshots, weights and a
//! round-robin cursor. Each candidate gets a score in 0.0–1.0; ties keep
//! the order in which providers were declared.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::RouterError;
use super::metrics::{HealthStatus, ProviderMetrics};
use crate::arbitration::strategy::{min_max, normalize};

/// Allowed deviation of the weight sum from 1.0.
pub const WEIGHT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    CostOptimized,
    PerformanceOptimized,
    AvailabilityOptimized,
    #[default]
    Hybrid,
    RoundRobin,
}

impl RoutingStrategy {
    pub const ALL: [RoutingStrategy; 5] = [
        RoutingStrategy::CostOptimized,
        RoutingStrategy::PerformanceOptimized,
        RoutingStrategy::AvailabilityOptimized,
        RoutingStrategy::Hybrid,
        RoutingStrategy::RoundRobin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CostOptimized => "cost_optimized",
            Self::PerformanceOptimized => "performance_optimized",
            Self::AvailabilityOptimized => "availability_optimized",
            Self::Hybrid => "hybrid",
            Self::RoundRobin => "round_robin",
        }
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == wanted)
            .ok_or_else(|| format!("unknown routing strategy: {s}"))
    }
}

/// Component weights for [`RoutingStrategy::Hybrid`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingWeights {
    pub cost: f64,
    pub performance: f64,
    pub availability: f64,
}

impl Default for RoutingWeights {
    fn default() -> Self {
        Self {
            cost: 0.3,
            performance: 0.4,
            availability: 0.3,
        }
    }
}

impl RoutingWeights {
    pub fn new(cost: f64, performance: f64, availability: f64) -> Result<Self, RouterError> {
        let weights = Self {
            cost,
            performance,
            availability,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn sum(&self) -> f64 {
        self.cost + self.performance + self.availability
    }

    pub fn validate(&self) -> Result<(), RouterError> {
        let parts = [self.cost, self.performance, self.availability];
        let sum = self.sum();
        if parts.iter().all(|w| w.is_finite() && *w >= 0.0) && (sum - 1.0).abs() <= WEIGHT_EPSILON
        {
            Ok(())
        } else {
            Err(RouterError::InvalidWeights { sum })
        }
    }
}

/// One provider's score and its components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderScore {
    pub provider: String,
    pub score: f64,
    pub cost: f64,
    pub performance: f64,
    pub availability: f64,
}

/// Score and order candidates, best first.
///
/// `candidates` must be in declaration order. For round robin, `rotation`
/// picks the starting provider and scores only encode the rotation order.
pub fn rank_providers(
    strategy: RoutingStrategy,
    weights: &RoutingWeights,
    candidates: &[ProviderMetrics],
    rotation: usize,
) -> Vec<ProviderScore> {
    let mut scored = score_components(candidates);
    if scored.is_empty() {
        return scored;
    }

    if strategy == RoutingStrategy::RoundRobin {
        let n = scored.len();
        scored.rotate_left(rotation % n);
        for (position, entry) in scored.iter_mut().enumerate() {
            entry.score = 1.0 - position as f64 / n as f64;
        }
        return scored;
    }

    for entry in &mut scored {
        entry.score = match strategy {
            RoutingStrategy::CostOptimized => entry.cost,
            RoutingStrategy::PerformanceOptimized => entry.performance,
            RoutingStrategy::AvailabilityOptimized => entry.availability,
            RoutingStrategy::Hybrid | RoutingStrategy::RoundRobin => {
                weights.cost * entry.cost
                    + weights.performance * entry.performance
                    + weights.availability * entry.availability
            }
        }
        .clamp(0.0, 1.0);
    }
    // Stable sort keeps declaration order among equal scores.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

fn score_components(candidates: &[ProviderMetrics]) -> Vec<ProviderScore> {
    let cost_range = min_max(candidates.iter().map(|m| m.cost_per_1k_tokens));
    let latency_range = min_max(candidates.iter().filter_map(|m| m.avg_latency_ms));

    candidates
        .iter()
        .map(|m| {
            let cost = cost_range
                .map(|(lo, hi)| 1.0 - normalize(m.cost_per_1k_tokens, lo, hi))
                .unwrap_or(1.0);
            let performance = match (m.avg_latency_ms, latency_range) {
                (Some(latency), Some((lo, hi))) => 1.0 - normalize(latency, lo, hi),
                _ => 1.0,
            };
            let availability = match m.health_status {
                HealthStatus::Unhealthy => 0.0,
                _ => m.success_rate.clamp(0.0, 1.0),
            };
            ProviderScore {
                provider: m.provider.clone(),
                score: 0.0,
                cost,
                performance,
                availability,
            }
        })
        .collect()
}
