//! Majority vote
//!
//! Groups outputs whose normalized content is similar enough, picks the
//! largest group, and returns its most confident member. Groups of equal
//! size are separated by average confidence, then by the lowest agent id of
//! their leader, so the winner does not depend on input order.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::arbitration::detector::{normalize_content, normalized_similarity};
use crate::arbitration::error::StrategyError;
use crate::arbitration::strategy::{candidates, check_range, parse_params, ArbitrationStrategy};
use crate::arbitration::types::{
    AgentOutput, ArbitrationConflict, ArbitrationResult, StrategyParams,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MajorityVoteParams {
    /// Minimum similarity to join a group; 1.0 means normalized equality.
    pub similarity_threshold: f64,
}

impl Default for MajorityVoteParams {
    fn default() -> Self {
        Self {
            similarity_threshold: 1.0,
        }
    }
}

struct VoteGroup<'a> {
    key: String,
    members: Vec<&'a AgentOutput>,
}

impl<'a> VoteGroup<'a> {
    fn avg_confidence(&self) -> f64 {
        self.members.iter().map(|o| o.confidence).sum::<f64>() / self.members.len() as f64
    }

    /// Most confident member; lowest agent id on ties.
    fn leader(&self) -> &'a AgentOutput {
        let mut best = self.members[0];
        for &member in &self.members[1..] {
            let better = member.confidence > best.confidence
                || (member.confidence == best.confidence && member.agent_id < best.agent_id);
            if better {
                best = member;
            }
        }
        best
    }
}

fn group_outputs<'a>(pool: &[&'a AgentOutput], threshold: f64) -> Vec<VoteGroup<'a>> {
    let mut keyed: Vec<(String, &'a AgentOutput)> = pool
        .iter()
        .map(|o| (normalize_content(&o.output), *o))
        .collect();
    // Canonical order so greedy grouping is independent of submission order.
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.agent_id.cmp(&b.1.agent_id)));

    let mut groups: Vec<VoteGroup<'a>> = Vec::new();
    for (key, output) in keyed {
        match groups
            .iter_mut()
            .find(|g| normalized_similarity(&g.key, &key) >= threshold)
        {
            Some(group) => group.members.push(output),
            None => groups.push(VoteGroup {
                key,
                members: vec![output],
            }),
        }
    }
    groups
}

pub struct MajorityVoteStrategy;

impl ArbitrationStrategy for MajorityVoteStrategy {
    fn strategy_name(&self) -> &str {
        "majority_vote"
    }

    fn validate_config(&self, params: &StrategyParams) -> Result<(), StrategyError> {
        let p: MajorityVoteParams = parse_params(params)?;
        check_range("similarity_threshold", p.similarity_threshold, 0.0..=1.0)
    }

    fn arbitrate(
        &self,
        conflict: &ArbitrationConflict,
        params: &StrategyParams,
    ) -> Result<ArbitrationResult, StrategyError> {
        self.validate_config(params)?;
        let p: MajorityVoteParams = parse_params(params)?;

        let pool = candidates(conflict);
        let mut groups = group_outputs(&pool, p.similarity_threshold);
        groups.sort_by(|a, b| {
            b.members
                .len()
                .cmp(&a.members.len())
                .then_with(|| b.avg_confidence().total_cmp(&a.avg_confidence()))
                .then_with(|| a.leader().agent_id.cmp(&b.leader().agent_id))
        });

        let Some(top) = groups.first() else {
            return Err(StrategyError::NoCandidates("no outputs to vote on".into()));
        };
        let tied_on_size = groups
            .get(1)
            .is_some_and(|g| g.members.len() == top.members.len());
        let winner = top.leader();
        let consensus_ratio = top.members.len() as f64 / pool.len() as f64;
        let group_avg = top.avg_confidence();

        debug!(
            conflict_id = %conflict.conflict_id,
            groups = groups.len(),
            winner = %winner.agent_id,
            consensus_ratio,
            "Majority vote decided"
        );

        let group_sizes: Vec<usize> = groups.iter().map(|g| g.members.len()).collect();
        let mut winning_group: Vec<&str> =
            top.members.iter().map(|o| o.agent_id.as_str()).collect();
        winning_group.sort_unstable();

        Ok(
            ArbitrationResult::for_output(self.strategy_name(), winner, consensus_ratio * group_avg)
                .with_metadata("group_sizes", group_sizes)
                .with_metadata("group_count", groups.len())
                .with_metadata("consensus_ratio", consensus_ratio)
                .with_metadata("group_avg_confidence", group_avg)
                .with_metadata("winning_group", winning_group)
                .with_metadata("tie_broken", Value::Bool(tied_on_size)),
        )
    }
}
