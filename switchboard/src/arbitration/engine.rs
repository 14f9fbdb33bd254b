//! Arbitration engine
//!
//! Owns the strategy registry, the active configuration, and the decision
//! history. `arbitrate_conflict` runs:
//!
//! ```text
//! outputs ─► ConflictDetector ─► resolve strategy ─► validate params
//!                                        │
//!            ┌───────────────────────────┘
//!            ▼
//!     primary ─► fallback[0] ─► fallback[1] ─► …  (first valid result wins)
//!            │
//!            └─► history + stats
//! ```
//!
//! Strategies run outside any lock. Registry and config are read once per
//! call into a consistent snapshot; reloads validate first and then swap
//! under the write lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::config::{check_bounds, ArbitrationConfig};
use super::detector::ConflictDetector;
use super::error::{ArbitrationError, StrategyError, StrategyFailure};
use super::export::{history_to_csv, metrics_to_csv, to_json, write_export, ExportFormat};
use super::history::{ArbitrationHistory, ArbitrationRecord};
use super::metrics::{ArbitrationMetricsSnapshot, ArbitrationStats};
use super::plugins::{load_plugin_dir, LoadedPlugin};
use super::strategy::{merge_params, ArbitrationStrategy, BuiltinStrategy};
use super::types::{AgentOutput, ArbitrationConflict, ArbitrationResult, StrategyParams};

/// `strategy_used` for conflicts with a single output, which need no strategy.
pub const SINGLE_OUTPUT_STRATEGY: &str = "single_output";

// ── Registry ──

#[derive(Clone, Default)]
struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn ArbitrationStrategy>>,
    /// Names owned by the current plugin directory load.
    plugin_names: BTreeSet<String>,
}

impl StrategyRegistry {
    fn with_builtins() -> Self {
        let strategies = BuiltinStrategy::ALL
            .iter()
            .map(|b| (b.name().to_string(), b.instantiate()))
            .collect();
        Self {
            strategies,
            plugin_names: BTreeSet::new(),
        }
    }

    fn get(&self, name: &str) -> Option<Arc<dyn ArbitrationStrategy>> {
        self.strategies.get(name).cloned()
    }

    /// Replace the plugin-provided set. Plugins may not shadow strategies
    /// registered any other way.
    fn replace_plugins(&mut self, plugins: Vec<LoadedPlugin>) -> Result<(), ArbitrationError> {
        for name in std::mem::take(&mut self.plugin_names) {
            self.strategies.remove(&name);
        }
        for plugin in plugins {
            let name = plugin.descriptor.strategy_name.clone();
            if self.strategies.contains_key(&name) {
                return Err(ArbitrationError::DuplicateStrategy(name));
            }
            debug!(strategy = %name, path = %plugin.path.display(), kind = %plugin.strategy.kind(), "Registering plugin strategy");
            self.strategies.insert(name.clone(), Arc::new(plugin.strategy));
            self.plugin_names.insert(name);
        }
        Ok(())
    }

    /// Every name the config refers to must be registered, and configured
    /// default params must pass the strategy's own validator.
    fn check_config(&self, config: &ArbitrationConfig) -> Result<(), ArbitrationError> {
        for name in config.referenced_strategies() {
            if !self.strategies.contains_key(name) {
                return Err(ArbitrationError::UnknownStrategy(name.to_string()));
            }
        }
        for (name, params) in &config.strategy_params {
            if let Some(strategy) = self.strategies.get(name) {
                strategy
                    .validate_config(params)
                    .map_err(|e| ArbitrationError::InvalidConfig {
                        strategy: name.clone(),
                        reason: e.to_string(),
                    })?;
            }
        }
        if config.fallback_chain.last().map(String::as_str) != Some("majority_vote") {
            warn!(
                chain = ?config.fallback_chain,
                "Fallback chain does not end with majority_vote; exhaustion is possible"
            );
        }
        Ok(())
    }
}

/// One step of a resolved fallback chain.
struct PlannedStep {
    name: String,
    strategy: Arc<dyn ArbitrationStrategy>,
    params: StrategyParams,
}

// ── Engine ──

pub struct ArbitrationEngine {
    registry: RwLock<StrategyRegistry>,
    config: RwLock<ArbitrationConfig>,
    history: Mutex<ArbitrationHistory>,
    stats: Mutex<ArbitrationStats>,
}

impl Default for ArbitrationEngine {
    /// Built-in strategies with the default configuration.
    fn default() -> Self {
        let config = ArbitrationConfig::default();
        Self::from_parts(StrategyRegistry::with_builtins(), config)
    }
}

impl ArbitrationEngine {
    /// Build an engine from validated config, loading `plugin_dir` if set.
    ///
    /// Any config or plugin problem is returned here rather than surfacing
    /// on the first request.
    pub fn new(config: ArbitrationConfig) -> Result<Self, ArbitrationError> {
        config.validate()?;
        let mut registry = StrategyRegistry::with_builtins();
        if let Some(dir) = &config.plugin_dir {
            registry.replace_plugins(load_plugin_dir(dir)?)?;
        }
        registry.check_config(&config)?;
        info!(
            strategies = registry.strategies.len(),
            plugins = registry.plugin_names.len(),
            default_strategy = %config.default_strategy,
            "Arbitration engine ready"
        );
        Ok(Self::from_parts(registry, config))
    }

    fn from_parts(registry: StrategyRegistry, config: ArbitrationConfig) -> Self {
        Self {
            history: Mutex::new(ArbitrationHistory::new(config.history_limit)),
            registry: RwLock::new(registry),
            config: RwLock::new(config),
            stats: Mutex::new(ArbitrationStats::default()),
        }
    }

    /// Wrap in an `Arc` for sharing across worker threads.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    // ── Registry management ──

    /// Add or replace a strategy under its own name.
    pub fn register_strategy(
        &self,
        strategy: Arc<dyn ArbitrationStrategy>,
    ) -> Result<(), ArbitrationError> {
        let name = strategy.strategy_name().to_string();
        let mut registry = self
            .registry
            .write()
            .map_err(|_| ArbitrationError::LockPoisoned)?;
        registry.plugin_names.remove(&name);
        let replaced = registry.strategies.insert(name.clone(), strategy).is_some();
        info!(strategy = %name, replaced, "Registered arbitration strategy");
        Ok(())
    }

    /// Registered strategy names, sorted.
    pub fn strategy_names(&self) -> Result<Vec<String>, ArbitrationError> {
        let registry = self
            .registry
            .read()
            .map_err(|_| ArbitrationError::LockPoisoned)?;
        let mut names: Vec<String> = registry.strategies.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Reload descriptors from `dir`, replacing the previous plugin set.
    ///
    /// On error the registry is left unchanged.
    pub fn reload_plugins(&self, dir: &Path) -> Result<usize, ArbitrationError> {
        let plugins = load_plugin_dir(dir)?;
        let count = plugins.len();
        let config = self
            .config
            .read()
            .map_err(|_| ArbitrationError::LockPoisoned)?;
        let mut registry = self
            .registry
            .write()
            .map_err(|_| ArbitrationError::LockPoisoned)?;
        let mut next = registry.clone();
        next.replace_plugins(plugins)?;
        next.check_config(&config)?;
        *registry = next;
        info!(dir = %dir.display(), count, "Reloaded strategy plugins");
        Ok(count)
    }

    /// Validate and swap in a new configuration.
    ///
    /// Plugins are reloaded from the new `plugin_dir` when it is set. On
    /// error nothing changes.
    pub fn reload_config(&self, config: ArbitrationConfig) -> Result<(), ArbitrationError> {
        config.validate()?;
        let plugins = match &config.plugin_dir {
            Some(dir) => Some(load_plugin_dir(dir)?),
            None => None,
        };

        let mut current = self
            .config
            .write()
            .map_err(|_| ArbitrationError::LockPoisoned)?;
        let mut registry = self
            .registry
            .write()
            .map_err(|_| ArbitrationError::LockPoisoned)?;
        let mut next = registry.clone();
        if let Some(plugins) = plugins {
            next.replace_plugins(plugins)?;
        }
        next.check_config(&config)?;

        self.history
            .lock()
            .map_err(|_| ArbitrationError::LockPoisoned)?
            .set_limit(config.history_limit);
        *registry = next;
        *current = config;
        info!(
            default_strategy = %current.default_strategy,
            chain = ?current.fallback_chain,
            "Reloaded arbitration config"
        );
        Ok(())
    }

    /// Copy of the active configuration.
    pub fn config(&self) -> Result<ArbitrationConfig, ArbitrationError> {
        Ok(self
            .config
            .read()
            .map_err(|_| ArbitrationError::LockPoisoned)?
            .clone())
    }

    // ── Arbitration ──

    /// Arbitrate the outputs submitted for one subtask.
    ///
    /// Input errors (no outputs, unknown strategy, invalid params) are
    /// returned before any strategy runs. Strategy failures advance the
    /// fallback chain; only exhausting it is an error.
    pub fn arbitrate_conflict(
        &self,
        agent_outputs: Vec<AgentOutput>,
        task_id: &str,
        subtask_id: &str,
        strategy_name: Option<&str>,
        params: Option<&StrategyParams>,
    ) -> Result<ArbitrationResult, ArbitrationError> {
        let started = Instant::now();
        let (conflict, plan) = self.prepare(agent_outputs, task_id, subtask_id, strategy_name, params)?;

        if let [sole] = conflict.agent_outputs.as_slice() {
            let result = ArbitrationResult::for_output(SINGLE_OUTPUT_STRATEGY, sole, sole.confidence)
                .with_metadata("resolved_strategy", plan[0].name.as_str());
            debug!(task_id, subtask_id, agent = %sole.agent_id, "Single output; no arbitration needed");
            self.record(conflict, result.clone(), started)?;
            return Ok(result);
        }

        info!(
            conflict_id = %conflict.conflict_id,
            task_id,
            subtask_id,
            outputs = conflict.agent_outputs.len(),
            conflict_type = %conflict.conflict_type,
            strategy = %plan[0].name,
            "Starting arbitration"
        );

        let mut attempted = Vec::with_capacity(plan.len());
        let mut failures: Vec<StrategyFailure> = Vec::new();
        for (index, step) in plan.iter().enumerate() {
            attempted.push(step.name.clone());
            let attempt_started = Instant::now();
            let outcome = step
                .strategy
                .arbitrate(&conflict, &step.params)
                .and_then(|result| check_result(&conflict, result));
            let elapsed = attempt_started.elapsed();

            match outcome {
                Ok(mut result) => {
                    self.stats
                        .lock()
                        .map_err(|_| ArbitrationError::LockPoisoned)?
                        .record_attempt(&step.name, Some(result.confidence), elapsed);
                    if index > 0 {
                        result.fallback_chain_used = attempted.clone();
                        let reasons: BTreeMap<&str, &str> = failures
                            .iter()
                            .map(|f| (f.strategy.as_str(), f.reason.as_str()))
                            .collect();
                        result
                            .metadata
                            .insert("fallback_reasons".to_string(), serde_json::json!(reasons));
                    }
                    result.metadata.insert(
                        "conflict_type".to_string(),
                        Value::from(conflict.conflict_type.as_str()),
                    );
                    info!(
                        conflict_id = %conflict.conflict_id,
                        winner = %result.winner_agent_id,
                        strategy = %result.strategy_used,
                        confidence = result.confidence,
                        fallbacks = index,
                        "Arbitration decided"
                    );
                    self.record(conflict, result.clone(), started)?;
                    return Ok(result);
                }
                Err(err) => {
                    warn!(
                        conflict_id = %conflict.conflict_id,
                        strategy = %step.name,
                        attempt = index + 1,
                        reason = %err,
                        "Arbitration strategy failed; advancing fallback chain"
                    );
                    self.stats
                        .lock()
                        .map_err(|_| ArbitrationError::LockPoisoned)?
                        .record_attempt(&step.name, None, elapsed);
                    failures.push(StrategyFailure {
                        strategy: step.name.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.stats
            .lock()
            .map_err(|_| ArbitrationError::LockPoisoned)?
            .record_exhausted(conflict.conflict_type);
        error!(
            conflict_id = %conflict.conflict_id,
            task_id,
            subtask_id,
            attempted = ?attempted,
            "Arbitration exhausted every strategy"
        );
        Err(ArbitrationError::Exhausted {
            attempted,
            failures,
        })
    }

    /// Classify, resolve the strategy, validate params, and lay out the
    /// fallback chain from one consistent snapshot of config and registry.
    fn prepare(
        &self,
        agent_outputs: Vec<AgentOutput>,
        task_id: &str,
        subtask_id: &str,
        strategy_name: Option<&str>,
        params: Option<&StrategyParams>,
    ) -> Result<(ArbitrationConflict, Vec<PlannedStep>), ArbitrationError> {
        let config = self
            .config
            .read()
            .map_err(|_| ArbitrationError::LockPoisoned)?;
        let registry = self
            .registry
            .read()
            .map_err(|_| ArbitrationError::LockPoisoned)?;

        let conflict = ConflictDetector::new(config.detector.clone())
            .build_conflict(task_id, subtask_id, agent_outputs)
            .map_err(|_| ArbitrationError::EmptyConflict {
                task_id: task_id.to_string(),
                subtask_id: subtask_id.to_string(),
            })?;
        if conflict
            .agent_outputs
            .iter()
            .any(|o| o.subtask_id != conflict.subtask_id)
        {
            warn!(task_id, subtask_id, "Outputs reference a different subtask id");
        }

        let primary_name = strategy_name
            .unwrap_or_else(|| config.strategy_for(conflict.conflict_type))
            .to_string();
        let primary = registry
            .get(&primary_name)
            .ok_or_else(|| ArbitrationError::UnknownStrategy(primary_name.clone()))?;

        let defaults = config
            .strategy_params
            .get(&primary_name)
            .cloned()
            .unwrap_or_default();
        let primary_params = match params {
            Some(overrides) => {
                let merged = merge_params(&defaults, overrides);
                let invalid = |reason: String| ArbitrationError::InvalidConfig {
                    strategy: primary_name.clone(),
                    reason,
                };
                primary
                    .validate_config(&merged)
                    .map_err(|e: StrategyError| invalid(e.to_string()))?;
                if let Some(bounds) = config.bounds_for(&primary_name) {
                    check_bounds(&merged, bounds).map_err(invalid)?;
                }
                merged
            }
            None => defaults,
        };

        let mut plan = vec![PlannedStep {
            name: primary_name.clone(),
            strategy: primary,
            params: primary_params,
        }];
        for name in &config.fallback_chain {
            if plan.iter().any(|s| &s.name == name) {
                continue;
            }
            match registry.get(name) {
                Some(strategy) => plan.push(PlannedStep {
                    name: name.clone(),
                    strategy,
                    params: config.strategy_params.get(name).cloned().unwrap_or_default(),
                }),
                None => warn!(strategy = %name, "Fallback strategy not registered; skipping"),
            }
        }
        Ok((conflict, plan))
    }

    fn record(
        &self,
        conflict: ArbitrationConflict,
        result: ArbitrationResult,
        started: Instant,
    ) -> Result<(), ArbitrationError> {
        let winner_ms = conflict
            .output_for(&result.winner_agent_id)
            .and_then(|o| o.execution_time_ms);
        self.stats
            .lock()
            .map_err(|_| ArbitrationError::LockPoisoned)?
            .record_decision(conflict.conflict_type, &result, winner_ms);
        let record = ArbitrationRecord {
            recorded_at: Utc::now(),
            conflict,
            result,
            duration_us: u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
        };
        self.history
            .lock()
            .map_err(|_| ArbitrationError::LockPoisoned)?
            .push(record);
        Ok(())
    }

    // ── History and export ──

    /// Filtered copy of the history in append order; `limit` keeps the most
    /// recent matches.
    pub fn get_arbitration_history(
        &self,
        task_id: Option<&str>,
        strategy_name: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ArbitrationRecord>, ArbitrationError> {
        let history = self
            .history
            .lock()
            .map_err(|_| ArbitrationError::LockPoisoned)?;
        Ok(history.query(task_id, strategy_name, limit))
    }

    /// Write the full history to `path`; returns the number of records.
    pub fn export_log(&self, path: &Path, format: ExportFormat) -> Result<usize, ArbitrationError> {
        let records = self.get_arbitration_history(None, None, None)?;
        let contents = match format {
            ExportFormat::Json => to_json(&records)?,
            ExportFormat::Csv => history_to_csv(&records),
        };
        write_export(path, &contents)?;
        info!(path = %path.display(), %format, records = records.len(), "Exported arbitration log");
        Ok(records.len())
    }

    pub fn metrics_snapshot(&self) -> Result<ArbitrationMetricsSnapshot, ArbitrationError> {
        Ok(self
            .stats
            .lock()
            .map_err(|_| ArbitrationError::LockPoisoned)?
            .snapshot())
    }

    /// Write a metrics snapshot to `path`.
    pub fn export_metrics(&self, path: &Path, format: ExportFormat) -> Result<(), ArbitrationError> {
        let snapshot = self.metrics_snapshot()?;
        let contents = match format {
            ExportFormat::Json => to_json(&snapshot)?,
            ExportFormat::Csv => metrics_to_csv(&snapshot),
        };
        write_export(path, &contents)?;
        info!(path = %path.display(), %format, "Exported arbitration metrics");
        Ok(())
    }
}

/// A result must name an output from the conflict (or declare a synthesis
/// from outputs in the conflict) and carry a confidence within 0.0–1.0.
fn check_result(
    conflict: &ArbitrationConflict,
    result: ArbitrationResult,
) -> Result<ArbitrationResult, StrategyError> {
    if !result.confidence.is_finite() || !(0.0..=1.0).contains(&result.confidence) {
        return Err(StrategyError::Rejected(format!(
            "confidence {} outside 0.0..=1.0",
            result.confidence
        )));
    }
    if conflict.output_for(&result.winner_agent_id).is_some() {
        return Ok(result);
    }
    if result.is_synthesized() {
        let sources = result.synthesized_from();
        if !sources.is_empty() && sources.iter().all(|id| conflict.output_for(id).is_some()) {
            return Ok(result);
        }
        return Err(StrategyError::Rejected(
            "synthesized result does not name its source outputs".into(),
        ));
    }
    Err(StrategyError::Rejected(format!(
        "winner {} is not among the submitted outputs",
        result.winner_agent_id
    )))
}
