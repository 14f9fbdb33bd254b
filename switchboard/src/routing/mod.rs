//! Adaptive provider routing
//!
//! The [`SmartRouter`] keeps rolling metrics and a health state per provider,
//! scores providers with the active [`RoutingStrategy`], and calls them in
//! ranked order under a timeout until one answers. Every attempt is recorded
//! as a [`RoutingDecision`]; failover hops are counted on the
//! [`RetryScoreboard`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use switchboard::routing::{OpenAiCompatibleClient, RouterConfig, SmartRouter};
//!
//! let router = SmartRouter::new(RouterConfig::from_env())?
//!     .with_provider(Arc::new(OpenAiCompatibleClient::new(
//!         "local", "http://localhost:8080", "qwen2.5-coder", 0.0,
//!     )?))?
//!     .with_provider(Arc::new(OpenAiCompatibleClient::new(
//!         "hosted", "https://api.example.com", "gpt-4o-mini", 0.15,
//!     )?))?
//!     .shared();
//! let monitor = router.start_health_monitor();
//!
//! let response = router.route_request("Summarize the diff", Some("chat"), Some(512), None).await?;
//! ```

pub mod config;
pub mod decision;
pub mod error;
pub mod health;
pub mod http;
pub mod metrics;
pub mod policy;
pub mod provider;
pub mod router;
pub mod scoreboard;
pub mod strategy;

pub use config::{HealthCheckConfig, RouterConfig};
pub use decision::{read_decision_log, RoutingDecision};
pub use error::{ProviderError, RouterError};
pub use health::HealthMonitor;
pub use http::OpenAiCompatibleClient;
pub use metrics::{HealthStatus, MetricsWindow, ProviderMetrics};
pub use policy::{FallbackPolicy, TaskClassPolicy};
pub use provider::{ProviderClient, ProviderReply, ProviderResponse};
pub use router::{RouterMetadata, SmartRouter};
pub use scoreboard::{RetryRecord, RetryScoreboard};
pub use strategy::{rank_providers, ProviderScore, RoutingStrategy, RoutingWeights};
