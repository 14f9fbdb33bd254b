//! Conflict detection
//!
//! Classifies the outputs submitted for one subtask. Content comparison is
//! deterministic: text is lowercased, every run of non-alphanumeric
//! characters collapses to a single space, and two normalized texts are
//! compared by the Jaccard index of their token sets (identical texts score
//! 1.0, including two empty ones).
//!
//! Precedence when several conditions hold: error > timeout >
//! contradiction > quality dispute.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::DetectionError;
use super::types::{AgentOutput, ArbitrationConflict, ConflictType};
use crate::config::ConfigError;

static NON_ALNUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\p{L}\p{N}]+").expect("NON_ALNUM_RE regex should compile")
});

/// Lowercase and strip punctuation/whitespace runs down to single spaces.
pub fn normalize_content(text: &str) -> String {
    let lowered = text.to_lowercase();
    NON_ALNUM_RE.replace_all(&lowered, " ").trim().to_string()
}

/// Similarity of two raw texts in 0.0–1.0.
pub fn content_similarity(a: &str, b: &str) -> f64 {
    normalized_similarity(&normalize_content(a), &normalize_content(b))
}

/// Token-set Jaccard index of two already-normalized texts.
pub(crate) fn normalized_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let left: HashSet<&str> = a.split_whitespace().collect();
    let right: HashSet<&str> = b.split_whitespace().collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 1.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

/// Detector thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Any pair of outputs less similar than this is a contradiction.
    pub similarity_threshold: f64,
    /// Spread between highest and lowest confidence that counts as a dispute.
    pub confidence_gap: f64,
    /// Shortest/longest normalized length below this counts as a dispute.
    pub length_ratio: f64,
    /// Any reported execution time above this marks the set as timed out.
    pub timeout_ms: Option<u64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            confidence_gap: 0.2,
            length_ratio: 0.5,
            timeout_ms: None,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("similarity_threshold", self.similarity_threshold),
            ("confidence_gap", self.confidence_gap),
            ("length_ratio", self.length_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "detector.{name} must be within 0.0..=1.0, got {value}"
                )));
            }
        }
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "detector.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Classifies a set of outputs into a [`ConflictType`].
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    config: DetectorConfig,
}

impl ConflictDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Classify outputs for one subtask.
    ///
    /// Zero outputs is an error; a single output is never a conflict.
    pub fn classify(&self, outputs: &[AgentOutput]) -> Result<ConflictType, DetectionError> {
        if outputs.is_empty() {
            return Err(DetectionError::NoOutputs);
        }
        if outputs.len() == 1 {
            return Ok(ConflictType::NoConflict);
        }

        if outputs.iter().any(AgentOutput::is_error) {
            return Ok(ConflictType::Error);
        }
        if self.has_timeout(outputs) {
            return Ok(ConflictType::Timeout);
        }

        let normalized: Vec<String> = outputs
            .iter()
            .map(|o| normalize_content(&o.output))
            .collect();
        let min_similarity = min_pairwise_similarity(&normalized);
        debug!(
            outputs = outputs.len(),
            min_similarity, "Compared agent outputs"
        );
        if min_similarity < self.config.similarity_threshold {
            return Ok(ConflictType::Contradiction);
        }
        if self.quality_differs(outputs, &normalized) {
            return Ok(ConflictType::QualityDispute);
        }
        Ok(ConflictType::NoConflict)
    }

    /// Classify and wrap outputs into a conflict with a fresh id.
    pub fn build_conflict(
        &self,
        task_id: &str,
        subtask_id: &str,
        outputs: Vec<AgentOutput>,
    ) -> Result<ArbitrationConflict, DetectionError> {
        let conflict_type = self.classify(&outputs)?;
        Ok(ArbitrationConflict {
            conflict_id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            subtask_id: subtask_id.to_string(),
            agent_outputs: outputs,
            conflict_type,
            created_at: Utc::now(),
        })
    }

    /// Some agents reported a time and others did not (those never finished),
    /// or a reported time exceeds the configured limit.
    fn has_timeout(&self, outputs: &[AgentOutput]) -> bool {
        let timed = outputs
            .iter()
            .filter(|o| o.execution_time_ms.is_some())
            .count();
        if timed > 0 && timed < outputs.len() {
            return true;
        }
        match self.config.timeout_ms {
            Some(limit) => outputs
                .iter()
                .filter_map(|o| o.execution_time_ms)
                .any(|ms| ms > limit),
            None => false,
        }
    }

    fn quality_differs(&self, outputs: &[AgentOutput], normalized: &[String]) -> bool {
        let (min_conf, max_conf) = outputs.iter().fold((f64::MAX, f64::MIN), |(lo, hi), o| {
            (lo.min(o.confidence), hi.max(o.confidence))
        });
        if max_conf - min_conf >= self.config.confidence_gap {
            return true;
        }

        let lengths = normalized.iter().map(|n| n.chars().count());
        let shortest = lengths.clone().min().unwrap_or(0);
        let longest = lengths.max().unwrap_or(0);
        if longest == 0 {
            return false;
        }
        (shortest as f64 / longest as f64) < self.config.length_ratio
    }
}

fn min_pairwise_similarity(normalized: &[String]) -> f64 {
    let mut min = 1.0_f64;
    for (i, a) in normalized.iter().enumerate() {
        for b in &normalized[i + 1..] {
            min = min.min(normalized_similarity(a, b));
        }
    }
    min
}
