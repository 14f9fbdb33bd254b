//! Built-in arbitration strategies.

mod confidence_weight;
mod cost_aware;
mod hybrid_score;
mod latency_aware;
mod majority_vote;
mod recency_bias;

pub use confidence_weight::{ConfidenceWeightParams, ConfidenceWeightStrategy};
pub use cost_aware::{CostAwareParams, CostAwareStrategy};
pub use hybrid_score::{HybridScoreParams, HybridScoreStrategy, HybridWeights};
pub use latency_aware::{LatencyAwareParams, LatencyAwareStrategy};
pub use majority_vote::{MajorityVoteParams, MajorityVoteStrategy};
pub use recency_bias::{RecencyBiasParams, RecencyBiasStrategy};

use std::collections::BTreeMap;

use serde_json::Value;

use super::types::AgentOutput;

/// Per-agent float map for result metadata.
pub(crate) fn score_map<'a>(scores: impl IntoIterator<Item = (&'a AgentOutput, f64)>) -> Value {
    let map: BTreeMap<&str, f64> = scores
        .into_iter()
        .map(|(o, s)| (o.agent_id.as_str(), s))
        .collect();
    serde_json::json!(map)
}

/// Age of an output relative to the newest one in the set, in seconds.
pub(crate) fn age_secs(output: &AgentOutput, newest: chrono::DateTime<chrono::Utc>) -> f64 {
    let millis = (newest - output.timestamp).num_milliseconds().max(0);
    millis as f64 / 1000.0
}
