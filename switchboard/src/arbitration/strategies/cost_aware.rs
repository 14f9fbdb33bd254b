//! Cost-aware arbitration
//!
//! `score = quality_weight · confidence − cost_weight · normalized_cost`.
//! Outputs over `budget_limit` are dropped before scoring. If that would
//! leave nothing, the cheapest output is kept and the result is flagged with
//! `budget_fallback`.
//!
//! Costs come from the output itself, else from `provider_costs` (routing
//! metadata a caller can pass through). An output with no known cost is
//! scored at the highest known cost and never counts as within budget.

use std::collections::BTreeMap;

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
pub struct CostAwareParams {
    pub quality_weight: f64,
    pub cost_weight: f64,
    pub budget_limit: Option<f64>,
    /// Agent id → cost, used when an output carries no cost of its own.
    pub provider_costs: BTreeMap<String, f64>,
}

impl Default for CostAwareParams {
    fn default() -> Self {
        Self {
            quality_weight: 0.7,
            cost_weight: 0.3,
            budget_limit: None,
            provider_costs: BTreeMap::new(),
        }
    }
}

impl CostAwareParams {
    fn known_cost(&self, output: &AgentOutput) -> Option<f64> {
        output
            .cost
            .or_else(|| self.provider_costs.get(&output.agent_id).copied())
    }
}

pub struct CostAwareStrategy;

impl ArbitrationStrategy for CostAwareStrategy {
    fn strategy_name(&self) -> &str {
        "cost_aware"
    }

    fn validate_config(&self, params: &StrategyParams) -> Result<(), StrategyError> {
        let p: CostAwareParams = parse_params(params)?;
        check_range("quality_weight", p.quality_weight, 0.0..=1.0)?;
        check_range("cost_weight", p.cost_weight, 0.0..=1.0)?;
        if let Some(limit) = p.budget_limit {
            check_range("budget_limit", limit, 0.0..=f64::MAX)?;
        }
        for (agent, cost) in &p.provider_costs {
            check_range(&format!("provider_costs.{agent}"), *cost, 0.0..=f64::MAX)?;
        }
        Ok(())
    }

    fn arbitrate(
        &self,
        conflict: &ArbitrationConflict,
        params: &StrategyParams,
    ) -> Result<ArbitrationResult, StrategyError> {
        self.validate_config(params)?;
        let p: CostAwareParams = parse_params(params)?;

        let pool = candidates(conflict);
        let Some((_, max_known)) = min_max(pool.iter().filter_map(|o| p.known_cost(o))) else {
            return Err(StrategyError::InsufficientData(
                "no output reports a cost".into(),
            ));
        };
        let costed: Vec<(&AgentOutput, Option<f64>)> =
            pool.iter().map(|&o| (o, p.known_cost(o))).collect();

        let mut excluded: Vec<&str> = Vec::new();
        let mut budget_fallback = false;
        let eligible: Vec<(&AgentOutput, f64)> = match p.budget_limit {
            None => costed
                .iter()
                .map(|&(o, c)| (o, c.unwrap_or(max_known)))
                .collect(),
            Some(limit) => {
                let within: Vec<(&AgentOutput, f64)> = costed
                    .iter()
                    .filter_map(|&(o, c)| c.filter(|c| *c <= limit).map(|c| (o, c)))
                    .collect();
                excluded = costed
                    .iter()
                    .filter(|(o, _)| !within.iter().any(|(w, _)| w.agent_id == o.agent_id))
                    .map(|(o, _)| o.agent_id.as_str())
                    .collect();
                if within.is_empty() {
                    budget_fallback = true;
                    cheapest(&costed).into_iter().collect()
                } else {
                    within
                }
            }
        };

        let Some((lo, hi)) = min_max(eligible.iter().map(|(_, c)| *c)) else {
            return Err(StrategyError::NoCandidates(
                "every output was excluded by budget".into(),
            ));
        };
        let mut scored: Vec<(&AgentOutput, f64, f64)> = eligible
            .iter()
            .map(|&(o, cost)| {
                let score = p.quality_weight * o.confidence - p.cost_weight * normalize(cost, lo, hi);
                (o, cost, score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then_with(|| a.1.total_cmp(&b.1))
                .then_with(|| a.0.agent_id.cmp(&b.0.agent_id))
        });

        let (winner, winner_cost, _) = scored[0];
        let mut result =
            ArbitrationResult::for_output(self.strategy_name(), winner, winner.confidence)
                .with_metadata("scores", score_map(scored.iter().map(|(o, _, s)| (*o, *s))))
                .with_metadata("costs", score_map(scored.iter().map(|(o, c, _)| (*o, *c))))
                .with_metadata("winner_cost", winner_cost)
                .with_metadata("excluded", excluded)
                .with_metadata("budget_fallback", budget_fallback);
        if let Some(limit) = p.budget_limit {
            result = result.with_metadata("budget_limit", limit);
        }
        Ok(result)
    }
}

/// Cheapest output with a known cost; higher confidence, then lower agent
/// id, on ties.
fn cheapest<'a>(costed: &[(&'a AgentOutput, Option<f64>)]) -> Option<(&'a AgentOutput, f64)> {
    costed
        .iter()
        .filter_map(|&(o, c)| c.map(|c| (o, c)))
        .min_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then_with(|| b.0.confidence.total_cmp(&a.0.confidence))
                .then_with(|| a.0.agent_id.cmp(&b.0.agent_id))
        })
}
