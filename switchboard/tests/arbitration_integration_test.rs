//! Arbitration integration tests: public engine API end to end.
//!
//! Covers the decision properties every caller relies on (winner membership,
//! single-output passthrough, reorder stability, budget compliance), the
//! fallback chain, plugin directories, exports, and concurrent use.

use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};
use switchboard::arbitration::{
    ArbitrationConflict, ArbitrationResult, ArbitrationStrategy, StrategyError,
    SINGLE_OUTPUT_STRATEGY,
};
use switchboard::{
    AgentOutput, ArbitrationConfig, ArbitrationEngine, ArbitrationError, ConflictType,
    ExportFormat, StrategyParams,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn out(agent: &str, output: &str, confidence: f64) -> AgentOutput {
    AgentOutput::new(agent, "task-1", "sub-1", output, confidence)
}

fn params(value: Value) -> StrategyParams {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn abc() -> Vec<AgentOutput> {
    vec![out("A", "x", 0.9), out("B", "x", 0.8), out("C", "y", 0.95)]
}

// ── Core scenarios ────────────────────────────────────────────────────

#[test]
fn majority_vote_scenario_picks_a() {
    init_tracing();
    let engine = ArbitrationEngine::default();
    let result = engine
        .arbitrate_conflict(abc(), "task-1", "sub-1", Some("majority_vote"), None)
        .unwrap();
    assert_eq!(result.winner_agent_id, "A");
    assert_eq!(result.winning_output, "x");
    assert_eq!(result.strategy_used, "majority_vote");
    assert!(result.fallback_chain_used.is_empty());
}

#[test]
fn empty_conflict_is_rejected_before_any_strategy() {
    let engine = ArbitrationEngine::default();
    let err = engine
        .arbitrate_conflict(Vec::new(), "task-1", "sub-1", None, None)
        .unwrap_err();
    assert!(matches!(err, ArbitrationError::EmptyConflict { .. }));
    assert!(engine.get_arbitration_history(None, None, None).unwrap().is_empty());
    assert_eq!(engine.metrics_snapshot().unwrap().total_arbitrations, 0);
}

#[test]
fn single_output_passes_through() {
    let engine = ArbitrationEngine::default();
    let sole = out("solo", "only answer", 0.42);
    let result = engine
        .arbitrate_conflict(vec![sole], "task-1", "sub-1", None, None)
        .unwrap();
    assert_eq!(result.winner_agent_id, "solo");
    assert_eq!(result.winning_output, "only answer");
    assert!((result.confidence - 0.42).abs() < 1e-12);
    assert_eq!(result.strategy_used, SINGLE_OUTPUT_STRATEGY);
    assert!(result.fallback_chain_used.is_empty());
    assert_eq!(engine.get_arbitration_history(None, None, None).unwrap().len(), 1);
}

#[test]
fn winner_is_always_an_input() {
    let engine = ArbitrationEngine::default();
    let sets = vec![
        abc(),
        vec![
            out("p", "alpha beta", 0.3).with_cost(0.5),
            out("q", "gamma", 0.7).with_execution_time(900),
        ],
        vec![
            out("e1", "", 0.1).with_error("crashed"),
            out("e2", "", 0.2).with_error("timeout"),
        ],
    ];
    for outputs in sets {
        let ids: Vec<String> = outputs.iter().map(|o| o.agent_id.clone()).collect();
        for strategy in [
            None,
            Some("majority_vote"),
            Some("confidence_weight"),
            Some("recency_bias"),
            Some("cost_aware"),
            Some("latency_aware"),
            Some("hybrid_score"),
        ] {
            let result = engine
                .arbitrate_conflict(outputs.clone(), "task-1", "sub-1", strategy, None)
                .unwrap();
            assert!(
                ids.contains(&result.winner_agent_id) || result.is_synthesized(),
                "{strategy:?} picked {}",
                result.winner_agent_id
            );
            assert!((0.0..=1.0).contains(&result.confidence));
        }
    }
}

#[test]
fn majority_vote_is_order_independent_without_ties() {
    let engine = ArbitrationEngine::default();
    let base = vec![
        out("a", "blue", 0.6),
        out("b", "blue", 0.7),
        out("c", "red", 0.99),
        out("d", "blue", 0.5),
        out("e", "green", 0.9),
    ];
    let expected = engine
        .arbitrate_conflict(base.clone(), "task-1", "sub-1", Some("majority_vote"), None)
        .unwrap()
        .winner_agent_id;

    let mut permuted = base;
    for shift in 1..5 {
        permuted.rotate_left(1);
        let mut reversed = permuted.clone();
        reversed.reverse();
        for outputs in [permuted.clone(), reversed] {
            let winner = engine
                .arbitrate_conflict(outputs, "task-1", "sub-1", Some("majority_vote"), None)
                .unwrap()
                .winner_agent_id;
            assert_eq!(winner, expected, "rotation {shift}");
        }
    }
}

#[test]
fn confidence_weight_winner_has_max_confidence() {
    let engine = ArbitrationEngine::default();
    let outputs = vec![
        out("a", "one", 0.31),
        out("b", "two", 0.87),
        out("c", "three", 0.55),
    ];
    let result = engine
        .arbitrate_conflict(outputs.clone(), "task-1", "sub-1", Some("confidence_weight"), None)
        .unwrap();
    let winner = outputs
        .iter()
        .find(|o| o.agent_id == result.winner_agent_id)
        .unwrap();
    assert!(outputs.iter().all(|o| winner.confidence >= o.confidence));
}

#[test]
fn cost_aware_respects_budget() {
    let engine = ArbitrationEngine::default();
    let outputs = vec![
        out("premium", "best", 0.99).with_cost(0.50),
        out("mid", "good", 0.80).with_cost(0.08),
        out("budget", "ok", 0.60).with_cost(0.02),
    ];
    let budget = params(json!({ "budget_limit": 0.10 }));
    let result = engine
        .arbitrate_conflict(outputs.clone(), "task-1", "sub-1", Some("cost_aware"), Some(&budget))
        .unwrap();
    let winner = outputs
        .iter()
        .find(|o| o.agent_id == result.winner_agent_id)
        .unwrap();
    assert!(winner.cost.unwrap() <= 0.10);
}

#[test]
fn invalid_params_are_a_hard_error() {
    let engine = ArbitrationEngine::default();
    let bad = params(json!({ "budget_limit": "cheap" }));
    let err = engine
        .arbitrate_conflict(abc(), "task-1", "sub-1", Some("cost_aware"), Some(&bad))
        .unwrap_err();
    assert!(matches!(err, ArbitrationError::InvalidConfig { ref strategy, .. } if strategy == "cost_aware"));

    let unknown = params(json!({ "temperature": 0.2 }));
    assert!(engine
        .arbitrate_conflict(abc(), "task-1", "sub-1", Some("majority_vote"), Some(&unknown))
        .is_err());

    let err = engine
        .arbitrate_conflict(abc(), "task-1", "sub-1", Some("coin_flip"), None)
        .unwrap_err();
    assert!(matches!(err, ArbitrationError::UnknownStrategy(_)));
}

// ── Fallback chain ────────────────────────────────────────────────────

#[test]
fn missing_cost_data_falls_back() {
    let engine = ArbitrationEngine::default();
    let result = engine
        .arbitrate_conflict(abc(), "task-1", "sub-1", Some("cost_aware"), None)
        .unwrap();
    assert_eq!(result.fallback_chain_used.first().map(String::as_str), Some("cost_aware"));
    assert_eq!(
        result.fallback_chain_used.last().map(String::as_str),
        Some(result.strategy_used.as_str())
    );
    assert!(result.metadata["fallback_reasons"]["cost_aware"].is_string());
}

struct Rogue;

impl ArbitrationStrategy for Rogue {
    fn strategy_name(&self) -> &str {
        "rogue"
    }

    fn validate_config(&self, _params: &StrategyParams) -> Result<(), StrategyError> {
        Ok(())
    }

    fn arbitrate(
        &self,
        conflict: &ArbitrationConflict,
        _params: &StrategyParams,
    ) -> Result<ArbitrationResult, StrategyError> {
        let mut result = ArbitrationResult::for_output("rogue", &conflict.agent_outputs[0], 0.9);
        result.winner_agent_id = "nobody".into();
        Ok(result)
    }
}

#[test]
fn invalid_winner_advances_the_chain() {
    let engine = ArbitrationEngine::default();
    engine.register_strategy(Arc::new(Rogue)).unwrap();
    let result = engine
        .arbitrate_conflict(abc(), "task-1", "sub-1", Some("rogue"), None)
        .unwrap();
    assert_ne!(result.winner_agent_id, "nobody");
    assert_eq!(result.fallback_chain_used[0], "rogue");
    assert_eq!(
        result.fallback_chain_used,
        vec!["rogue".to_string(), "hybrid_score".to_string()]
    );
}

#[test]
fn exhausted_chain_names_every_strategy() {
    let config = ArbitrationConfig {
        fallback_chain: vec!["rogue".into()],
        ..Default::default()
    };
    // The chain may only name registered strategies, so start from defaults
    // and swap the chain once the rogue strategy exists.
    let engine = ArbitrationEngine::default();
    engine.register_strategy(Arc::new(Rogue)).unwrap();
    engine.reload_config(config).unwrap();

    let err = engine
        .arbitrate_conflict(abc(), "task-1", "sub-1", Some("rogue"), None)
        .unwrap_err();
    match err {
        ArbitrationError::Exhausted { attempted, failures } => {
            assert_eq!(attempted, vec!["rogue".to_string()]);
            assert_eq!(failures.len(), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.metrics_snapshot().unwrap().exhausted, 1);
}

// ── Plugins ───────────────────────────────────────────────────────────

#[test]
fn plugin_directory_registers_configured_strategies() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("frugal.yaml"),
        "strategy_name: frugal\nkind: cost_aware\nparams:\n  budget_limit: 0.05\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("README.md"), "not a plugin").unwrap();

    let config = ArbitrationConfig {
        plugin_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let engine = ArbitrationEngine::new(config).unwrap();
    assert!(engine.strategy_names().unwrap().contains(&"frugal".to_string()));

    let outputs = vec![
        out("big", "x", 0.95).with_cost(0.4),
        out("small", "y", 0.7).with_cost(0.01),
    ];
    let result = engine
        .arbitrate_conflict(outputs, "task-1", "sub-1", Some("frugal"), None)
        .unwrap();
    assert_eq!(result.winner_agent_id, "small");
    assert_eq!(result.strategy_used, "frugal");
}

#[test]
fn duplicate_plugin_names_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    for file in ["a.yaml", "b.yml"] {
        std::fs::write(
            dir.path().join(file),
            "strategy_name: twin\nkind: majority_vote\n",
        )
        .unwrap();
    }
    let config = ArbitrationConfig {
        plugin_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let err = ArbitrationEngine::new(config).err().unwrap();
    assert!(matches!(err, ArbitrationError::DuplicateStrategy(ref name) if name == "twin"));
}

#[test]
fn failed_plugin_reload_keeps_previous_set() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("strict.yaml"),
        "strategy_name: strict\nkind: confidence_weight\nparams:\n  min_confidence: 0.5\n",
    )
    .unwrap();
    let engine = ArbitrationEngine::default();
    assert_eq!(engine.reload_plugins(dir.path()).unwrap(), 1);

    std::fs::write(dir.path().join("broken.yaml"), "strategy_name: [oops").unwrap();
    assert!(matches!(
        engine.reload_plugins(dir.path()),
        Err(ArbitrationError::PluginLoad { .. })
    ));
    assert!(engine.strategy_names().unwrap().contains(&"strict".to_string()));
}

// ── History and export ────────────────────────────────────────────────

#[test]
fn history_query_and_exports() {
    let engine = ArbitrationEngine::default();
    engine
        .arbitrate_conflict(abc(), "task-1", "sub-1", Some("majority_vote"), None)
        .unwrap();
    engine
        .arbitrate_conflict(
            vec![
                AgentOutput::new("A", "task-2", "sub-9", "a, \"quoted\" answer", 0.9),
                AgentOutput::new("B", "task-2", "sub-9", "another", 0.4),
            ],
            "task-2",
            "sub-9",
            Some("confidence_weight"),
            None,
        )
        .unwrap();

    let task2 = engine
        .get_arbitration_history(Some("task-2"), None, None)
        .unwrap();
    assert_eq!(task2.len(), 1);
    assert_eq!(task2[0].conflict.conflict_type, ConflictType::Contradiction);
    let by_strategy = engine
        .get_arbitration_history(None, Some("majority_vote"), Some(5))
        .unwrap();
    assert_eq!(by_strategy.len(), 1);

    let dir = tempfile::tempdir().unwrap();
    let json_path = dir.path().join("exports").join("history.json");
    assert_eq!(engine.export_log(&json_path, ExportFormat::Json).unwrap(), 2);
    let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 2);

    let csv_path = dir.path().join("history.csv");
    engine.export_log(&csv_path, ExportFormat::Csv).unwrap();
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert!(csv.starts_with("recorded_at,"));
    assert!(csv.contains("\"a, \"\"quoted\"\" answer\""));

    let metrics_path = dir.path().join("metrics.json");
    engine.export_metrics(&metrics_path, ExportFormat::Json).unwrap();
    let metrics: Value =
        serde_json::from_str(&std::fs::read_to_string(&metrics_path).unwrap()).unwrap();
    assert_eq!(metrics["total_arbitrations"], 2);
    assert_eq!(metrics["strategies"]["majority_vote"]["successes"], 1);
}

// ── Concurrency ───────────────────────────────────────────────────────

#[test]
fn concurrent_arbitration_and_registration() {
    let engine = ArbitrationEngine::default().shared();
    let mut handles = Vec::new();
    for worker in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..25 {
                let task = format!("task-{worker}-{i}");
                let outputs = vec![
                    AgentOutput::new("A", &task, "s", "x", 0.9),
                    AgentOutput::new("B", &task, "s", "x", 0.8),
                    AgentOutput::new("C", &task, "s", "y", 0.95),
                ];
                let result = engine
                    .arbitrate_conflict(outputs, &task, "s", Some("majority_vote"), None)
                    .unwrap();
                assert_eq!(result.winner_agent_id, "A");
                if i % 10 == 0 {
                    engine.register_strategy(Arc::new(Rogue)).unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    let history = engine.get_arbitration_history(None, None, None).unwrap();
    assert_eq!(history.len(), 200);
    assert_eq!(engine.metrics_snapshot().unwrap().agents["A"].wins, 200);
}
