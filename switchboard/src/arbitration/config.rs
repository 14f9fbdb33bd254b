//! Arbitration engine configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::detector::DetectorConfig;
use super::types::{ConflictType, StrategyParams};
use crate::config::{read_config_file, ConfigError};

/// Inclusive numeric bounds for one strategy parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamBounds {
    pub min: f64,
    pub max: f64,
}

impl ParamBounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArbitrationConfig {
    /// Used when neither the caller nor `conflict_defaults` names a strategy.
    pub default_strategy: String,
    /// Strategy per detected conflict type.
    pub conflict_defaults: BTreeMap<ConflictType, String>,
    /// Strategies tried, in order, after the primary fails.
    pub fallback_chain: Vec<String>,
    /// Maximum retained history entries; oldest are evicted first.
    pub history_limit: usize,
    /// Directory of strategy descriptor files loaded at startup.
    pub plugin_dir: Option<PathBuf>,
    pub detector: DetectorConfig,
    /// Default parameters per strategy; caller parameters overlay these.
    pub strategy_params: BTreeMap<String, StrategyParams>,
    /// Allowed ranges for numeric parameters, per strategy.
    pub parameter_bounds: BTreeMap<String, BTreeMap<String, ParamBounds>>,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        let conflict_defaults = BTreeMap::from([
            (ConflictType::Contradiction, "majority_vote".to_string()),
            (ConflictType::QualityDispute, "confidence_weight".to_string()),
            (ConflictType::Error, "confidence_weight".to_string()),
            (ConflictType::Timeout, "latency_aware".to_string()),
            (ConflictType::NoConflict, "confidence_weight".to_string()),
        ]);
        Self {
            default_strategy: "hybrid_score".to_string(),
            conflict_defaults,
            fallback_chain: vec![
                "hybrid_score".to_string(),
                "confidence_weight".to_string(),
                "majority_vote".to_string(),
            ],
            history_limit: 1000,
            plugin_dir: None,
            detector: DetectorConfig::default(),
            strategy_params: BTreeMap::new(),
            parameter_bounds: BTreeMap::new(),
        }
    }
}

impl ArbitrationConfig {
    /// Load a standalone arbitration TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = read_config_file(path)?;
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks. Strategy names are checked against the registry
    /// by the engine, which knows what is registered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_strategy.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "arbitration.default_strategy must not be empty".into(),
            ));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid(
                "arbitration.history_limit must be greater than 0".into(),
            ));
        }
        self.detector.validate()?;
        for (strategy, bounds) in &self.parameter_bounds {
            for (param, b) in bounds {
                if !(b.min.is_finite() && b.max.is_finite()) || b.min > b.max {
                    return Err(ConfigError::Invalid(format!(
                        "arbitration.parameter_bounds.{strategy}.{param}: min {} > max {}",
                        b.min, b.max
                    )));
                }
            }
            if let Some(params) = self.strategy_params.get(strategy) {
                check_bounds(params, bounds).map_err(|reason| {
                    ConfigError::Invalid(format!("arbitration.strategy_params.{strategy}: {reason}"))
                })?;
            }
        }
        Ok(())
    }

    /// Strategy to use for a conflict type when the caller names none.
    pub fn strategy_for(&self, conflict_type: ConflictType) -> &str {
        self.conflict_defaults
            .get(&conflict_type)
            .map(String::as_str)
            .unwrap_or(&self.default_strategy)
    }

    /// Every strategy name this config refers to.
    pub fn referenced_strategies(&self) -> Vec<&str> {
        let mut names: Vec<&str> = std::iter::once(self.default_strategy.as_str())
            .chain(self.conflict_defaults.values().map(String::as_str))
            .chain(self.fallback_chain.iter().map(String::as_str))
            .chain(self.strategy_params.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Bounds configured for a strategy, if any.
    pub fn bounds_for(&self, strategy: &str) -> Option<&BTreeMap<String, ParamBounds>> {
        self.parameter_bounds.get(strategy)
    }
}

/// Check every bounded numeric parameter present in `params`.
pub(crate) fn check_bounds(
    params: &StrategyParams,
    bounds: &BTreeMap<String, ParamBounds>,
) -> Result<(), String> {
    for (name, b) in bounds {
        match params.get(name) {
            None | Some(Value::Null) => {}
            Some(value) => {
                let Some(number) = value.as_f64() else {
                    return Err(format!("{name} must be numeric"));
                };
                if !b.contains(number) {
                    return Err(format!(
                        "{name} = {number} outside bounds [{}, {}]",
                        b.min, b.max
                    ));
                }
            }
        }
    }
    Ok(())
}
