//! Failover accounting.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One failover hop inside a single `route_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub timestamp: DateTime<Utc>,
    /// Provider whose failure triggered the retry.
    pub from_provider: String,
    pub to_provider: String,
    /// 1-based attempt number of the retry (the first retry is attempt 2).
    pub attempt: u32,
    pub reason: String,
    pub succeeded: bool,
}

/// Aggregate retry counters, alive for the router's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryScoreboard {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    /// Requests ultimately served by a provider other than the top-ranked one.
    pub route_degradations: u64,
    pub history: VecDeque<RetryRecord>,
    #[serde(skip, default = "default_history_limit")]
    history_limit: usize,
}

fn default_history_limit() -> usize {
    100
}

impl Default for RetryScoreboard {
    fn default() -> Self {
        Self::new(default_history_limit())
    }
}

impl RetryScoreboard {
    pub fn new(history_limit: usize) -> Self {
        Self {
            total_retries: 0,
            successful_retries: 0,
            failed_retries: 0,
            route_degradations: 0,
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn record_retry(&mut self, record: RetryRecord) {
        self.total_retries += 1;
        if record.succeeded {
            self.successful_retries += 1;
        } else {
            self.failed_retries += 1;
        }
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    pub fn record_degradation(&mut self) {
        self.route_degradations += 1;
    }

    /// Share of retries that ended in a success; 0.0 before any retry.
    pub fn retry_success_rate(&self) -> f64 {
        if self.total_retries == 0 {
            0.0
        } else {
            self.successful_retries as f64 / self.total_retries as f64
        }
    }

    /// Most recent records, newest last.
    pub fn recent(&self, limit: usize) -> Vec<RetryRecord> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }
}
