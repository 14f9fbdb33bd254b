//! Recency bias: confidence discounted by age.
//!
//! `score = confidence · exp(-decay_rate · age_secs)`, with age measured from
//! the newest output in the conflict rather than the wall clock, so the same
//! conflict always yields the same decision.

use serde::Deserialize;

use super::{age_secs, score_map};
use crate::arbitration::error::StrategyError;
use crate::arbitration::strategy::{candidates, check_range, parse_params, ArbitrationStrategy};
use crate::arbitration::types::{ArbitrationConflict, ArbitrationResult, StrategyParams};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecencyBiasParams {
    /// Exponential decay per second of age.
    pub decay_rate: f64,
}

impl Default for RecencyBiasParams {
    fn default() -> Self {
        Self { decay_rate: 0.01 }
    }
}

pub struct RecencyBiasStrategy;

impl ArbitrationStrategy for RecencyBiasStrategy {
    fn strategy_name(&self) -> &str {
        "recency_bias"
    }

    fn validate_config(&self, params: &StrategyParams) -> Result<(), StrategyError> {
        let p: RecencyBiasParams = parse_params(params)?;
        check_range("decay_rate", p.decay_rate, 0.0..=1_000.0)
    }

    fn arbitrate(
        &self,
        conflict: &ArbitrationConflict,
        params: &StrategyParams,
    ) -> Result<ArbitrationResult, StrategyError> {
        self.validate_config(params)?;
        let p: RecencyBiasParams = parse_params(params)?;

        let pool = candidates(conflict);
        let Some(newest) = pool.iter().map(|o| o.timestamp).max() else {
            return Err(StrategyError::NoCandidates("no outputs to weigh".into()));
        };

        let mut scored: Vec<_> = pool
            .iter()
            .map(|&o| {
                let age = age_secs(o, newest);
                (o, age, o.confidence * (-p.decay_rate * age).exp())
            })
            .collect();
        scored.sort_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then_with(|| b.0.timestamp.cmp(&a.0.timestamp))
                .then_with(|| a.0.agent_id.cmp(&b.0.agent_id))
        });

        let (winner, _, score) = scored[0];
        let ages = score_map(scored.iter().map(|(o, age, _)| (*o, *age)));
        let scores = score_map(scored.iter().map(|(o, _, s)| (*o, *s)));
        Ok(ArbitrationResult::for_output(self.strategy_name(), winner, score)
            .with_metadata("scores", scores)
            .with_metadata("age_secs", ages)
            .with_metadata("reference_time", newest.to_rfc3339()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::strategies::test_support::{conflict, output, params};
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[test]
    fn test_newer_output_beats_stale_confident_one() {
        let now = Utc::now();
        let c = conflict(vec![
            output("stale", "x", 0.95).with_timestamp(now - Duration::minutes(10)),
            output("fresh", "y", 0.7).with_timestamp(now),
        ]);
        let result = RecencyBiasStrategy
            .arbitrate(&c, &StrategyParams::new())
            .unwrap();
        assert_eq!(result.winner_agent_id, "fresh");
        assert!((result.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_zero_decay_is_pure_confidence() {
        let now = Utc::now();
        let c = conflict(vec![
            output("stale", "x", 0.95).with_timestamp(now - Duration::hours(5)),
            output("fresh", "y", 0.7).with_timestamp(now),
        ]);
        let result = RecencyBiasStrategy
            .arbitrate(&c, &params(json!({"decay_rate": 0.0})))
            .unwrap();
        assert_eq!(result.winner_agent_id, "stale");
    }

    #[test]
    fn test_equal_scores_prefer_newer() {
        let now = Utc::now();
        let c = conflict(vec![
            output("older", "x", 0.0).with_timestamp(now - Duration::seconds(5)),
            output("newer", "y", 0.0).with_timestamp(now),
        ]);
        let result = RecencyBiasStrategy
            .arbitrate(&c, &StrategyParams::new())
            .unwrap();
        assert_eq!(result.winner_agent_id, "newer");
    }

    #[test]
    fn test_negative_decay_rejected() {
        assert!(RecencyBiasStrategy
            .validate_config(&params(json!({"decay_rate": -0.5})))
            .is_err());
    }
}
