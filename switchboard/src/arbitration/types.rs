//! Arbitration data model: agent outputs, conflicts, and decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form strategy parameters, as parsed from config or supplied per call.
pub type StrategyParams = serde_json::Map<String, Value>;

/// Metadata flag set by strategies that combine several outputs.
pub const SYNTHESIZED_KEY: &str = "synthesized";
/// Metadata list of agent ids a synthesized result was built from.
pub const SYNTHESIZED_FROM_KEY: &str = "synthesized_from";

/// One agent's answer to one subtask.
///
/// Outputs are owned by the conflict they are submitted in and never
/// modified after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent_id: String,
    pub task_id: String,
    pub subtask_id: String,
    /// Opaque payload, normally text.
    pub output: String,
    /// Self-reported confidence (0.0–1.0).
    pub confidence: f64,
    /// Wall time the agent took; `None` when it never completed or timing
    /// was not tracked.
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub cost: Option<f64>,
    pub timestamp: DateTime<Utc>,
    /// Set when the agent reported a failure instead of an answer.
    #[serde(default)]
    pub error: Option<String>,
}

impl AgentOutput {
    /// Create an output stamped with the current time.
    ///
    /// Confidence is clamped into 0.0–1.0; NaN becomes 0.0.
    pub fn new(
        agent_id: impl Into<String>,
        task_id: impl Into<String>,
        subtask_id: impl Into<String>,
        output: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            subtask_id: subtask_id.into(),
            output: output.into(),
            confidence,
            execution_time_ms: None,
            cost: None,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.execution_time_ms = Some(ms);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost.max(0.0));
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Kind of disagreement among outputs for one subtask.
///
/// Variants are declared in increasing severity; when several conditions
/// hold the detector reports the most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Zero or one meaningful disagreement (including single-output conflicts).
    #[serde(rename = "none")]
    NoConflict,
    /// Contents agree but confidence or structure differs materially.
    QualityDispute,
    /// Normalized contents diverge beyond the similarity threshold.
    Contradiction,
    /// At least one agent did not complete.
    Timeout,
    /// At least one agent reported an error.
    Error,
}

impl ConflictType {
    pub const ALL: [ConflictType; 5] = [
        ConflictType::NoConflict,
        ConflictType::QualityDispute,
        ConflictType::Contradiction,
        ConflictType::Timeout,
        ConflictType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoConflict => "none",
            Self::QualityDispute => "quality_dispute",
            Self::Contradiction => "contradiction",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work for arbitration. Always holds at least one output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationConflict {
    pub conflict_id: String,
    pub task_id: String,
    pub subtask_id: String,
    pub agent_outputs: Vec<AgentOutput>,
    pub conflict_type: ConflictType,
    pub created_at: DateTime<Utc>,
}

impl ArbitrationConflict {
    /// Find an output by agent id.
    pub fn output_for(&self, agent_id: &str) -> Option<&AgentOutput> {
        self.agent_outputs.iter().find(|o| o.agent_id == agent_id)
    }

    pub fn agent_ids(&self) -> Vec<&str> {
        self.agent_outputs.iter().map(|o| o.agent_id.as_str()).collect()
    }
}

/// The decision returned by a strategy (and finally by the engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationResult {
    pub winner_agent_id: String,
    pub winning_output: String,
    /// Decision confidence (0.0–1.0), strategy-specific.
    pub confidence: f64,
    pub strategy_used: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    /// Strategies walked when the primary failed, ending with the one that
    /// produced this result. Empty when the primary succeeded.
    #[serde(default)]
    pub fallback_chain_used: Vec<String>,
}

impl ArbitrationResult {
    /// A result naming `winner` as the chosen output.
    pub fn for_output(strategy: &str, winner: &AgentOutput, confidence: f64) -> Self {
        Self {
            winner_agent_id: winner.agent_id.clone(),
            winning_output: winner.output.clone(),
            confidence,
            strategy_used: strategy.to_string(),
            metadata: serde_json::Map::new(),
            fallback_chain_used: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Whether the strategy declared the output as synthesized from sources.
    pub fn is_synthesized(&self) -> bool {
        self.metadata
            .get(SYNTHESIZED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Agent ids a synthesized result claims as its sources.
    pub fn synthesized_from(&self) -> Vec<&str> {
        self.metadata
            .get(SYNTHESIZED_FROM_KEY)
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}
