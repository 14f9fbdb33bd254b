//! Strategy and agent usage statistics for export.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ArbitrationResult, ConflictType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyUsage {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    /// Mean confidence of successful decisions.
    pub avg_confidence: f64,
    /// Mean time spent inside the strategy per invocation.
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentUsage {
    pub wins: u64,
    pub avg_winning_confidence: f64,
    /// Mean reported execution time of winning outputs, when reported.
    pub avg_execution_time_ms: Option<f64>,
}

/// Point-in-time arbitration metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationMetricsSnapshot {
    pub generated_at: DateTime<Utc>,
    pub total_arbitrations: u64,
    pub exhausted: u64,
    pub strategies: BTreeMap<String, StrategyUsage>,
    pub agents: BTreeMap<String, AgentUsage>,
    pub conflict_types: BTreeMap<ConflictType, u64>,
}

#[derive(Debug, Default)]
struct StrategyCounters {
    invocations: u64,
    successes: u64,
    failures: u64,
    confidence_sum: f64,
    elapsed: Duration,
}

#[derive(Debug, Default)]
struct AgentCounters {
    wins: u64,
    confidence_sum: f64,
    timed_wins: u64,
    execution_ms_sum: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ArbitrationStats {
    strategies: BTreeMap<String, StrategyCounters>,
    agents: BTreeMap<String, AgentCounters>,
    conflict_types: BTreeMap<ConflictType, u64>,
    total: u64,
    exhausted: u64,
}

impl ArbitrationStats {
    /// One strategy invocation; `confidence` is `None` on failure.
    pub fn record_attempt(&mut self, strategy: &str, confidence: Option<f64>, elapsed: Duration) {
        let counters = self.strategies.entry(strategy.to_string()).or_default();
        counters.invocations += 1;
        counters.elapsed += elapsed;
        match confidence {
            Some(c) => {
                counters.successes += 1;
                counters.confidence_sum += c;
            }
            None => counters.failures += 1,
        }
    }

    /// A final decision returned to the caller.
    pub fn record_decision(
        &mut self,
        conflict_type: ConflictType,
        result: &ArbitrationResult,
        winner_execution_ms: Option<u64>,
    ) {
        self.total += 1;
        *self.conflict_types.entry(conflict_type).or_insert(0) += 1;
        let agent = self
            .agents
            .entry(result.winner_agent_id.clone())
            .or_default();
        agent.wins += 1;
        agent.confidence_sum += result.confidence;
        if let Some(ms) = winner_execution_ms {
            agent.timed_wins += 1;
            agent.execution_ms_sum += ms;
        }
    }

    pub fn record_exhausted(&mut self, conflict_type: ConflictType) {
        self.total += 1;
        self.exhausted += 1;
        *self.conflict_types.entry(conflict_type).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> ArbitrationMetricsSnapshot {
        let strategies = self
            .strategies
            .iter()
            .map(|(name, c)| {
                let usage = StrategyUsage {
                    invocations: c.invocations,
                    successes: c.successes,
                    failures: c.failures,
                    success_rate: ratio(c.successes as f64, c.invocations),
                    avg_confidence: ratio(c.confidence_sum, c.successes),
                    avg_latency_ms: ratio(c.elapsed.as_secs_f64() * 1000.0, c.invocations),
                };
                (name.clone(), usage)
            })
            .collect();
        let agents = self
            .agents
            .iter()
            .map(|(name, a)| {
                let usage = AgentUsage {
                    wins: a.wins,
                    avg_winning_confidence: ratio(a.confidence_sum, a.wins),
                    avg_execution_time_ms: (a.timed_wins > 0)
                        .then(|| a.execution_ms_sum as f64 / a.timed_wins as f64),
                };
                (name.clone(), usage)
            })
            .collect();
        ArbitrationMetricsSnapshot {
            generated_at: Utc::now(),
            total_arbitrations: self.total,
            exhausted: self.exhausted,
            strategies,
            agents,
            conflict_types: self.conflict_types.clone(),
        }
    }
}

fn ratio(sum: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
