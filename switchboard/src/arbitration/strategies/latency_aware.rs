//! Latency-aware arbitration.
//!
//! `score = quality_weight · confidence − latency_weight · normalized_latency`,
//! then outputs slower than `max_latency_ms` have their score pushed down by
//! `penalty_multiplier`. Outputs without a timing are scored at the slowest
//! observed latency.

use serde::Deserialize;

use super::score_map;
use crate::arbitration::error::StrategyError;
use crate::arbitration::strategy::{
    candidates, check_range, min_max, normalize, parse_params, ArbitrationStrategy,
};
use crate::arbitration::types::{
    AgentOutput, ArbitrationConflict, ArbitrationResult, StrategyParams,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LatencyAwareParams {
    pub quality_weight: f64,
    pub latency_weight: f64,
    pub max_latency_ms: Option<u64>,
    /// In (0, 1]; 1.0 disables the penalty.
    pub penalty_multiplier: f64,
}

impl Default for LatencyAwareParams {
    fn default() -> Self {
        Self {
            quality_weight: 0.7,
            latency_weight: 0.3,
            max_latency_ms: None,
            penalty_multiplier: 0.5,
        }
    }
}

/// Always lowers the score: shrinks positive scores, grows negative ones.
fn apply_penalty(score: f64, multiplier: f64) -> f64 {
    if score >= 0.0 {
        score * multiplier
    } else {
        score / multiplier
    }
}

pub struct LatencyAwareStrategy;

impl ArbitrationStrategy for LatencyAwareStrategy {
    fn strategy_name(&self) -> &str {
        "latency_aware"
    }

    fn validate_config(&self, params: &StrategyParams) -> Result<(), StrategyError> {
        let p: LatencyAwareParams = parse_params(params)?;
        check_range("quality_weight", p.quality_weight, 0.0..=1.0)?;
        check_range("latency_weight", p.latency_weight, 0.0..=1.0)?;
        if p.penalty_multiplier <= 0.0 {
            return Err(StrategyError::InvalidConfig(
                "penalty_multiplier must be greater than 0".into(),
            ));
        }
        check_range("penalty_multiplier", p.penalty_multiplier, 0.0..=1.0)
    }

    fn arbitrate(
        &self,
        conflict: &ArbitrationConflict,
        params: &StrategyParams,
    ) -> Result<ArbitrationResult, StrategyError> {
        self.validate_config(params)?;
        let p: LatencyAwareParams = parse_params(params)?;

        let pool = candidates(conflict);
        let Some((_, slowest)) = min_max(
            pool.iter()
                .filter_map(|o| o.execution_time_ms)
                .map(|ms| ms as f64),
        ) else {
            return Err(StrategyError::InsufficientData(
                "no output reports an execution time".into(),
            ));
        };

        let timed: Vec<(&AgentOutput, f64)> = pool
            .iter()
            .map(|&o| (o, o.execution_time_ms.map_or(slowest, |ms| ms as f64)))
            .collect();
        let (lo, hi) = min_max(timed.iter().map(|(_, ms)| *ms)).unwrap_or((slowest, slowest));

        let mut penalized: Vec<&str> = Vec::new();
        let mut scored: Vec<(&AgentOutput, f64, f64)> = timed
            .iter()
            .map(|&(o, ms)| {
                let mut score =
                    p.quality_weight * o.confidence - p.latency_weight * normalize(ms, lo, hi);
                if p.max_latency_ms.is_some_and(|max| ms > max as f64) {
                    score = apply_penalty(score, p.penalty_multiplier);
                    penalized.push(o.agent_id.as_str());
                }
                (o, ms, score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then_with(|| a.1.total_cmp(&b.1))
                .then_with(|| a.0.agent_id.cmp(&b.0.agent_id))
        });

        let (winner, winner_ms, _) = scored[0];
        Ok(
            ArbitrationResult::for_output(self.strategy_name(), winner, winner.confidence)
                .with_metadata("scores", score_map(scored.iter().map(|(o, _, s)| (*o, *s))))
                .with_metadata(
                    "latencies_ms",
                    score_map(scored.iter().map(|(o, ms, _)| (*o, *ms))),
                )
                .with_metadata("winner_latency_ms", winner_ms)
                .with_metadata("penalized", penalized),
        )
    }
}
