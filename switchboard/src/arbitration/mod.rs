//! Multi-agent output arbitration
//!
//! When several agents answer the same subtask, their outputs are classified
//! by the [`ConflictDetector`] and resolved by an [`ArbitrationStrategy`]
//! chosen explicitly or from configuration. If the strategy fails, or
//! returns a winner that is not among the submitted outputs, the engine
//! walks the configured fallback chain.
//!
//! # Usage
//!
//! ```rust,ignore
//! use switchboard::arbitration::{AgentOutput, ArbitrationEngine};
//!
//! let engine = ArbitrationEngine::default();
//! let result = engine.arbitrate_conflict(
//!     vec![
//!         AgentOutput::new("A", "task-1", "sub-1", "x", 0.9),
//!         AgentOutput::new("B", "task-1", "sub-1", "x", 0.8),
//!         AgentOutput::new("C", "task-1", "sub-1", "y", 0.95),
//!     ],
//!     "task-1",
//!     "sub-1",
//!     Some("majority_vote"),
//!     None,
//! )?;
//! assert_eq!(result.winner_agent_id, "A");
//! ```

pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod export;
pub mod history;
pub mod metrics;
pub mod plugins;
pub mod strategies;
pub mod strategy;
pub mod types;

pub use config::{ArbitrationConfig, ParamBounds};
pub use detector::{content_similarity, normalize_content, ConflictDetector, DetectorConfig};
pub use engine::{ArbitrationEngine, SINGLE_OUTPUT_STRATEGY};
pub use error::{ArbitrationError, DetectionError, StrategyError, StrategyFailure};
pub use export::ExportFormat;
pub use history::ArbitrationRecord;
pub use metrics::{AgentUsage, ArbitrationMetricsSnapshot, StrategyUsage};
pub use plugins::{load_plugin_dir, LoadedPlugin, StrategyDescriptor};
pub use strategy::{merge_params, ArbitrationStrategy, BuiltinStrategy, ConfiguredStrategy};
pub use types::{
    AgentOutput, ArbitrationConflict, ArbitrationResult, ConflictType, StrategyParams,
    SYNTHESIZED_FROM_KEY, SYNTHESIZED_KEY,
};
