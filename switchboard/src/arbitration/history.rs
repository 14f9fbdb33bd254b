//! Bounded arbitration history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ArbitrationConflict, ArbitrationResult};

/// One completed arbitration: the conflict as submitted and the decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationRecord {
    pub recorded_at: DateTime<Utc>,
    pub conflict: ArbitrationConflict,
    pub result: ArbitrationResult,
    /// Wall time spent in the engine, including failed strategies.
    pub duration_us: u64,
}

/// Append log capped at `limit` entries; the oldest entry is evicted first.
#[derive(Debug)]
pub(crate) struct ArbitrationHistory {
    entries: VecDeque<ArbitrationRecord>,
    limit: usize,
}

impl ArbitrationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(1024)),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, record: ArbitrationRecord) {
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    /// Shrink (or grow) the cap, evicting the oldest entries if needed.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Matching records in append order, keeping only the most recent
    /// `limit` when given.
    pub fn query(
        &self,
        task_id: Option<&str>,
        strategy_name: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<ArbitrationRecord> {
        let mut matched: Vec<ArbitrationRecord> = self
            .entries
            .iter()
            .filter(|r| task_id.map_or(true, |id| r.conflict.task_id == id))
            .filter(|r| strategy_name.map_or(true, |name| r.result.strategy_used == name))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArbitrationRecord> {
        self.entries.iter()
    }
}
