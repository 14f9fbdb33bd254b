//! Arbitration error types.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::ConfigError;

/// Raised by the conflict detector.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectionError {
    #[error("No agent outputs to classify")]
    NoOutputs,
}

/// Failure of a single strategy invocation.
///
/// The engine absorbs these by advancing the fallback chain; they reach the
/// caller only inside [`ArbitrationError::Exhausted`] or, for config
/// problems caught before dispatch, as [`ArbitrationError::InvalidConfig`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrategyError {
    #[error("invalid parameters: {0}")]
    InvalidConfig(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("no eligible outputs: {0}")]
    NoCandidates(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// One failed step of a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyFailure {
    pub strategy: String,
    pub reason: String,
}

/// Errors surfaced by the arbitration engine.
#[derive(Debug, thiserror::Error)]
pub enum ArbitrationError {
    #[error("No agent outputs supplied for task {task_id} subtask {subtask_id}")]
    EmptyConflict { task_id: String, subtask_id: String },

    #[error("Unknown arbitration strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid config for strategy {strategy}: {reason}")]
    InvalidConfig { strategy: String, reason: String },

    #[error("Duplicate strategy name: {0}")]
    DuplicateStrategy(String),

    #[error("Failed to load strategy plugin {}: {detail}", .path.display())]
    PluginLoad { path: PathBuf, detail: String },

    #[error("Arbitration exhausted after trying [{}]", .attempted.join(", "))]
    Exhausted {
        attempted: Vec<String>,
        failures: Vec<StrategyFailure>,
    },

    #[error("Export failed: {0}")]
    Export(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Arbitration state lock poisoned")]
    LockPoisoned,
}
