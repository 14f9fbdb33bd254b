//! The arbitration strategy contract and the fixed list of built-ins.
//!
//! Strategies are pure: they read an already-collected conflict plus a
//! parameter map and return a decision. They never perform I/O and hold no
//! mutable state, so the engine can call them without locking.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::StrategyError;
use super::strategies::{
    ConfidenceWeightStrategy, CostAwareStrategy, HybridScoreStrategy, LatencyAwareStrategy,
    MajorityVoteStrategy, RecencyBiasStrategy,
};
use super::types::{AgentOutput, ArbitrationConflict, ArbitrationResult, StrategyParams};

/// A named arbitration algorithm.
pub trait ArbitrationStrategy: Send + Sync {
    /// Registry identity; stable for the lifetime of the strategy.
    fn strategy_name(&self) -> &str;

    /// Check parameters before dispatch. Unknown keys and out-of-range
    /// values are errors, never silently ignored.
    fn validate_config(&self, params: &StrategyParams) -> Result<(), StrategyError>;

    /// Pick (or synthesize) a winner for the conflict.
    fn arbitrate(
        &self,
        conflict: &ArbitrationConflict,
        params: &StrategyParams,
    ) -> Result<ArbitrationResult, StrategyError>;
}

/// The reviewed set of strategy implementations the engine can instantiate.
///
/// Plugin descriptors may only name one of these; there is no arbitrary
/// code loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStrategy {
    MajorityVote,
    ConfidenceWeight,
    RecencyBias,
    CostAware,
    LatencyAware,
    HybridScore,
}

impl BuiltinStrategy {
    pub const ALL: [BuiltinStrategy; 6] = [
        BuiltinStrategy::MajorityVote,
        BuiltinStrategy::ConfidenceWeight,
        BuiltinStrategy::RecencyBias,
        BuiltinStrategy::CostAware,
        BuiltinStrategy::LatencyAware,
        BuiltinStrategy::HybridScore,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::MajorityVote => "majority_vote",
            Self::ConfidenceWeight => "confidence_weight",
            Self::RecencyBias => "recency_bias",
            Self::CostAware => "cost_aware",
            Self::LatencyAware => "latency_aware",
            Self::HybridScore => "hybrid_score",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn instantiate(&self) -> Arc<dyn ArbitrationStrategy> {
        match self {
            Self::MajorityVote => Arc::new(MajorityVoteStrategy),
            Self::ConfidenceWeight => Arc::new(ConfidenceWeightStrategy),
            Self::RecencyBias => Arc::new(RecencyBiasStrategy),
            Self::CostAware => Arc::new(CostAwareStrategy),
            Self::LatencyAware => Arc::new(LatencyAwareStrategy),
            Self::HybridScore => Arc::new(HybridScoreStrategy),
        }
    }
}

impl std::fmt::Display for BuiltinStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A built-in strategy registered under another name with preset parameters.
///
/// Caller-supplied parameters overlay the presets key by key.
pub struct ConfiguredStrategy {
    name: String,
    kind: BuiltinStrategy,
    inner: Arc<dyn ArbitrationStrategy>,
    presets: StrategyParams,
}

impl ConfiguredStrategy {
    /// Build and validate the preset parameters against the underlying kind.
    pub fn new(
        name: impl Into<String>,
        kind: BuiltinStrategy,
        presets: StrategyParams,
    ) -> Result<Self, StrategyError> {
        let inner = kind.instantiate();
        inner.validate_config(&presets)?;
        Ok(Self {
            name: name.into(),
            kind,
            inner,
            presets,
        })
    }

    pub fn kind(&self) -> BuiltinStrategy {
        self.kind
    }

    fn effective(&self, params: &StrategyParams) -> StrategyParams {
        merge_params(&self.presets, params)
    }
}

impl ArbitrationStrategy for ConfiguredStrategy {
    fn strategy_name(&self) -> &str {
        &self.name
    }

    fn validate_config(&self, params: &StrategyParams) -> Result<(), StrategyError> {
        self.inner.validate_config(&self.effective(params))
    }

    fn arbitrate(
        &self,
        conflict: &ArbitrationConflict,
        params: &StrategyParams,
    ) -> Result<ArbitrationResult, StrategyError> {
        let mut result = self.inner.arbitrate(conflict, &self.effective(params))?;
        result.strategy_used = self.name.clone();
        result
            .metadata
            .insert("base_strategy".to_string(), Value::from(self.kind.name()));
        Ok(result)
    }
}

// ── Shared helpers for strategy implementations ──

/// Overlay `overrides` on `base`, key by key.
pub fn merge_params(base: &StrategyParams, overrides: &StrategyParams) -> StrategyParams {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Deserialize a typed parameter struct; missing keys take the struct's
/// `#[serde(default)]` values.
pub(crate) fn parse_params<T>(params: &StrategyParams) -> Result<T, StrategyError>
where
    T: DeserializeOwned,
{
    serde_json::from_value(Value::Object(params.clone()))
        .map_err(|e| StrategyError::InvalidConfig(e.to_string()))
}

/// Outputs eligible to win: those without an error marker, or every output
/// when all of them errored.
pub(crate) fn candidates(conflict: &ArbitrationConflict) -> Vec<&AgentOutput> {
    let healthy: Vec<&AgentOutput> = conflict
        .agent_outputs
        .iter()
        .filter(|o| !o.is_error())
        .collect();
    if healthy.is_empty() {
        conflict.agent_outputs.iter().collect()
    } else {
        healthy
    }
}

/// Min–max normalize into 0.0–1.0; a degenerate range maps to 0.0.
pub(crate) fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if span <= f64::EPSILON {
        0.0
    } else {
        ((value - min) / span).clamp(0.0, 1.0)
    }
}

/// Min and max of an iterator of floats; `None` when empty.
pub(crate) fn min_max(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    values.into_iter().fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

/// Reject values outside `range`, naming the parameter.
pub(crate) fn check_range(
    name: &str,
    value: f64,
    range: std::ops::RangeInclusive<f64>,
) -> Result<(), StrategyError> {
    if value.is_finite() && range.contains(&value) {
        Ok(())
    } else {
        Err(StrategyError::InvalidConfig(format!(
            "{name} must be within {}..={}, got {value}",
            range.start(),
            range.end()
        )))
    }
}
