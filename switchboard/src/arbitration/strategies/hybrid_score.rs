//! Hybrid score
//!
//! Weighted sum of four components, each in 0.0–1.0:
//!
//! | component  | value                                   |
//! |------------|-----------------------------------------|
//! | confidence | the output's confidence                 |
//! | cost       | `1 − normalized_cost` (0.5 if no data)  |
//! | latency    | `1 − normalized_latency` (0.5 if no data) |
//! | recency    | `exp(−decay_rate · age_secs)`           |
//!
//! Outputs at or above `quality_threshold` confidence get `quality_boost`
//! added. Weights must be non-negative and sum to 1.0 within 0.01.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::age_secs;
use crate::arbitration::error::StrategyError;
use crate::arbitration::strategy::{
    candidates, check_range, min_max, normalize, parse_params, ArbitrationStrategy,
};
use crate::arbitration::types::{
    AgentOutput, ArbitrationConflict, ArbitrationResult, StrategyParams,
};

const WEIGHT_SUM_TOLERANCE: f64 = 0.01;
const NEUTRAL_COMPONENT: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HybridWeights {
    pub confidence: f64,
    pub cost: f64,
    pub latency: f64,
    pub recency: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            confidence: 0.4,
            cost: 0.2,
            latency: 0.2,
            recency: 0.2,
        }
    }
}

impl HybridWeights {
    pub fn sum(&self) -> f64 {
        self.confidence + self.cost + self.latency + self.recency
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HybridScoreParams {
    pub weights: HybridWeights,
    pub quality_threshold: f64,
    pub quality_boost: f64,
    pub decay_rate: f64,
}

impl Default for HybridScoreParams {
    fn default() -> Self {
        Self {
            weights: HybridWeights::default(),
            quality_threshold: 0.8,
            quality_boost: 0.1,
            decay_rate: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct Breakdown {
    confidence: f64,
    cost: f64,
    latency: f64,
    recency: f64,
    boost: f64,
    total: f64,
}

/// `1 − normalized(value)` over the known values; neutral when unknown.
fn inverse_component(value: Option<f64>, range: Option<(f64, f64)>) -> f64 {
    match (value, range) {
        (Some(v), Some((lo, hi))) => 1.0 - normalize(v, lo, hi),
        _ => NEUTRAL_COMPONENT,
    }
}

pub struct HybridScoreStrategy;

impl ArbitrationStrategy for HybridScoreStrategy {
    fn strategy_name(&self) -> &str {
        "hybrid_score"
    }

    fn validate_config(&self, params: &StrategyParams) -> Result<(), StrategyError> {
        let p: HybridScoreParams = parse_params(params)?;
        let w = &p.weights;
        for (name, value) in [
            ("weights.confidence", w.confidence),
            ("weights.cost", w.cost),
            ("weights.latency", w.latency),
            ("weights.recency", w.recency),
        ] {
            check_range(name, value, 0.0..=1.0)?;
        }
        let sum = w.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(StrategyError::InvalidConfig(format!(
                "weights must sum to 1.0 (±{WEIGHT_SUM_TOLERANCE}), got {sum:.4}"
            )));
        }
        check_range("quality_threshold", p.quality_threshold, 0.0..=1.0)?;
        check_range("quality_boost", p.quality_boost, 0.0..=1.0)?;
        check_range("decay_rate", p.decay_rate, 0.0..=1_000.0)
    }

    fn arbitrate(
        &self,
        conflict: &ArbitrationConflict,
        params: &StrategyParams,
    ) -> Result<ArbitrationResult, StrategyError> {
        self.validate_config(params)?;
        let p: HybridScoreParams = parse_params(params)?;

        let pool = candidates(conflict);
        let Some(newest) = pool.iter().map(|o| o.timestamp).max() else {
            return Err(StrategyError::NoCandidates("no outputs to score".into()));
        };
        let cost_range = min_max(pool.iter().filter_map(|o| o.cost));
        let latency_range = min_max(
            pool.iter()
                .filter_map(|o| o.execution_time_ms)
                .map(|ms| ms as f64),
        );

        let breakdown = |o: &AgentOutput| -> Breakdown {
            let cost = inverse_component(o.cost, cost_range);
            let latency =
                inverse_component(o.execution_time_ms.map(|ms| ms as f64), latency_range);
            let recency = (-p.decay_rate * age_secs(o, newest)).exp();
            let boost = if o.confidence >= p.quality_threshold {
                p.quality_boost
            } else {
                0.0
            };
            let w = &p.weights;
            let total = w.confidence * o.confidence
                + w.cost * cost
                + w.latency * latency
                + w.recency * recency
                + boost;
            Breakdown {
                confidence: o.confidence,
                cost,
                latency,
                recency,
                boost,
                total,
            }
        };

        let mut scored: Vec<(&AgentOutput, Breakdown)> =
            pool.iter().map(|&o| (o, breakdown(o))).collect();
        scored.sort_by(|a, b| {
            b.1.total
                .total_cmp(&a.1.total)
                .then_with(|| b.0.confidence.total_cmp(&a.0.confidence))
                .then_with(|| a.0.agent_id.cmp(&b.0.agent_id))
        });

        let (winner, top) = &scored[0];
        let details: serde_json::Map<String, serde_json::Value> = scored
            .iter()
            .map(|(o, b)| (o.agent_id.clone(), json!(b)))
            .collect();
        Ok(
            ArbitrationResult::for_output(self.strategy_name(), winner, top.total.clamp(0.0, 1.0))
                .with_metadata("breakdown", details)
                .with_metadata("weights", json!(p.weights)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::strategies::test_support::{conflict, output, params};
    use chrono::Utc;

    #[test]
    fn test_balanced_output_wins() {
        let now = Utc::now();
        let c = conflict(vec![
            output("pricey", "x", 0.9)
                .with_cost(1.0)
                .with_execution_time(3_000)
                .with_timestamp(now),
            output("balanced", "y", 0.85)
                .with_cost(0.2)
                .with_execution_time(400)
                .with_timestamp(now),
        ]);
        let result = HybridScoreStrategy
            .arbitrate(&c, &StrategyParams::new())
            .unwrap();
        assert_eq!(result.winner_agent_id, "balanced");
        assert!(result.confidence <= 1.0);
        assert!(result.metadata["breakdown"]["pricey"]["total"].is_number());
    }

    #[test]
    fn test_quality_boost_applies_at_threshold() {
        let now = Utc::now();
        let c = conflict(vec![
            output("a", "x", 0.8).with_timestamp(now),
            output("b", "y", 0.79).with_timestamp(now),
        ]);
        let result = HybridScoreStrategy
            .arbitrate(&c, &StrategyParams::new())
            .unwrap();
        assert_eq!(result.winner_agent_id, "a");
        assert_eq!(result.metadata["breakdown"]["a"]["boost"], json!(0.1));
        assert_eq!(result.metadata["breakdown"]["b"]["boost"], json!(0.0));
    }

    #[test]
    fn test_rejects_weights_not_summing_to_one() {
        let err = HybridScoreStrategy
            .validate_config(&params(json!({
                "weights": {"confidence": 0.9, "cost": 0.2, "latency": 0.2, "recency": 0.2}
            })))
            .unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));

        assert!(HybridScoreStrategy
            .validate_config(&params(json!({
                "weights": {"confidence": 1.2, "cost": -0.2, "latency": 0.0, "recency": 0.0}
            })))
            .is_err());
    }

    #[test]
    fn test_custom_weights_accepted() {
        let p = params(json!({
            "weights": {"confidence": 0.7, "cost": 0.1, "latency": 0.1, "recency": 0.1},
            "quality_boost": 0.0
        }));
        assert!(HybridScoreStrategy.validate_config(&p).is_ok());
        let c = conflict(vec![output("a", "x", 0.3), output("b", "y", 0.6)]);
        let result = HybridScoreStrategy.arbitrate(&c, &p).unwrap();
        assert_eq!(result.winner_agent_id, "b");
    }
}
