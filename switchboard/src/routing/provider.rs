//! The provider client contract consumed by the router.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use super::strategy::RoutingStrategy;

/// What a provider returns for one completed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReply {
    pub content: String,
    pub tokens_used: u32,
    /// Latency as measured by the client itself.
    pub latency_ms: u64,
}

/// Uniform interface to one upstream model provider.
///
/// Implementations hold no routing state; health and metrics live in the
/// router. `send` is always called under the router's timeout, so clients
/// need not enforce one of their own.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Stable provider name, unique within a router.
    fn name(&self) -> &str;

    fn cost_per_1k_tokens(&self) -> f64;

    async fn send(&self, prompt: &str, max_tokens: Option<u32>)
        -> Result<ProviderReply, ProviderError>;

    /// Lightweight liveness check used by the health monitor.
    async fn probe(&self) -> Result<(), ProviderError>;
}

/// The router's answer to `route_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub provider: String,
    pub content: String,
    pub tokens_used: u32,
    /// Wall-clock latency of the successful attempt, measured by the router.
    pub latency_ms: u64,
    pub cost: f64,
    pub strategy: RoutingStrategy,
    /// Number of providers called, including the successful one.
    pub attempts: u32,
    pub fallback_used: bool,
}

/// Cost of a call in the provider's currency units.
pub fn call_cost(tokens_used: u32, cost_per_1k_tokens: f64) -> f64 {
    f64::from(tokens_used) / 1000.0 * cost_per_1k_tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_cost() {
        assert!((call_cost(1500, 0.02) - 0.03).abs() < 1e-12);
        assert_eq!(call_cost(0, 5.0), 0.0);
    }
}
