//! Confidence weight: the most confident output wins; ties go to the
//! fastest agent.
//!
//! Outputs carrying an error marker are not candidates, so an errored
//! output may report a higher confidence than the winner. Only when every
//! output is errored do they all compete.

use serde::Deserialize;

use super::score_map;
use crate::arbitration::error::StrategyError;
use crate::arbitration::strategy::{candidates, check_range, parse_params, ArbitrationStrategy};
use crate::arbitration::types::{ArbitrationConflict, ArbitrationResult, StrategyParams};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfidenceWeightParams {
    /// Reject the decision when the best confidence falls below this.
    pub min_confidence: f64,
}

pub struct ConfidenceWeightStrategy;

impl ArbitrationStrategy for ConfidenceWeightStrategy {
    fn strategy_name(&self) -> &str {
        "confidence_weight"
    }

    fn validate_config(&self, params: &StrategyParams) -> Result<(), StrategyError> {
        let p: ConfidenceWeightParams = parse_params(params)?;
        check_range("min_confidence", p.min_confidence, 0.0..=1.0)
    }

    fn arbitrate(
        &self,
        conflict: &ArbitrationConflict,
        params: &StrategyParams,
    ) -> Result<ArbitrationResult, StrategyError> {
        self.validate_config(params)?;
        let p: ConfidenceWeightParams = parse_params(params)?;

        let mut ranked = candidates(conflict);
        ranked.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| {
                    let a_ms = a.execution_time_ms.unwrap_or(u64::MAX);
                    let b_ms = b.execution_time_ms.unwrap_or(u64::MAX);
                    a_ms.cmp(&b_ms)
                })
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });

        let Some(&winner) = ranked.first() else {
            return Err(StrategyError::NoCandidates("no outputs to rank".into()));
        };
        if winner.confidence < p.min_confidence {
            return Err(StrategyError::Rejected(format!(
                "best confidence {:.3} below minimum {:.3}",
                winner.confidence, p.min_confidence
            )));
        }
        let tied = ranked
            .get(1)
            .is_some_and(|runner_up| runner_up.confidence == winner.confidence);

        let vector = score_map(conflict.agent_outputs.iter().map(|o| (o, o.confidence)));
        Ok(
            ArbitrationResult::for_output(self.strategy_name(), winner, winner.confidence)
                .with_metadata("confidence_vector", vector)
                .with_metadata("tie_broken_by_latency", tied),
        )
    }
}
