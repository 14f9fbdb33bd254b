//! Switchboard: multi-agent arbitration and adaptive provider routing
//!
//! Two independent subsystems that a coordination layer composes:
//!
//! - **Arbitration**: when several agents answer the same subtask, the
//!   [`ArbitrationEngine`] classifies the disagreement with a
//!   [`ConflictDetector`], dispatches to one of the registered
//!   [`ArbitrationStrategy`] implementations, and walks a fallback chain
//!   until one of them produces a valid winner.
//! - **Routing**: every outbound model call goes through the [`SmartRouter`],
//!   which scores providers from rolling metrics and health state, calls the
//!   best one under a timeout, and fails over to the next-best healthy
//!   provider. A [`HealthMonitor`] probes providers in the background.
//!
//! # Design
//!
//! ```text
//! AgentOutput[] ──► ConflictDetector ──► ArbitrationEngine ──► strategy ─┬─► ArbitrationResult
//!                                              ▲                         │
//!                                              └──── fallback chain ◄────┘
//!
//! prompt ──► SmartRouter ──► RoutingStrategy ──► ProviderClient ─┬─► ProviderResponse
//!               ▲   │                                            │
//!               │   └──► RoutingDecision log / RetryScoreboard   │
//!               └────────────── failover (next healthy) ◄────────┘
//! ```
//!
//! Neither subsystem shares mutable state with the other. Cost-aware
//! arbitration can consult routing metadata only through the strategy
//! parameters a caller passes in.

#![allow(clippy::uninlined_format_args)]

pub mod arbitration;
pub mod config;
pub mod routing;

pub use arbitration::{
    AgentOutput, ArbitrationConfig, ArbitrationConflict, ArbitrationEngine, ArbitrationError,
    ArbitrationRecord, ArbitrationResult, ArbitrationStrategy, BuiltinStrategy, ConflictDetector,
    ConflictType, DetectorConfig, ExportFormat, StrategyError, StrategyParams,
};
pub use config::{ConfigError, SwitchboardConfig};
pub use routing::{
    FallbackPolicy, HealthMonitor, HealthStatus, OpenAiCompatibleClient, ProviderClient,
    ProviderError, ProviderMetrics, ProviderReply, ProviderResponse, RetryScoreboard,
    RouterConfig, RouterError, RoutingDecision, RoutingStrategy, RoutingWeights, SmartRouter,
};
