//! Routing decisions and the JSONL audit sink.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::error::RouterError;
use super::metrics::ProviderMetrics;
use super::strategy::RoutingStrategy;

/// One routing attempt. Serialized as one line of the decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub timestamp: DateTime<Utc>,
    pub strategy: RoutingStrategy,
    pub provider_selected: String,
    /// Milliseconds spent on this attempt.
    pub latency: u64,
    pub cost: f64,
    pub fallback_used: bool,
    pub reason_for_selection: String,
    /// The router's score for the provider, not an agent confidence.
    pub confidence: f64,
    pub tokens_used: u32,
    /// Provider state right after the attempt was recorded.
    pub metrics_snapshot: ProviderMetrics,
}

/// Append-only JSONL file of [`RoutingDecision`]s.
#[derive(Debug)]
pub(crate) struct DecisionLog {
    path: PathBuf,
    sink: Mutex<LogSink>,
}

#[derive(Debug)]
struct LogSink {
    file: tokio::fs::File,
    /// A previous write failed and may have left a partial line.
    torn: bool,
}

impl DecisionLog {
    /// Open (creating parent directories) for appending.
    pub fn open(path: &Path) -> Result<Self, RouterError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            sink: Mutex::new(LogSink {
                file: tokio::fs::File::from_std(file),
                torn: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, decision: &RoutingDecision) -> Result<(), RouterError> {
        let json = serde_json::to_string(decision)
            .map_err(|e| RouterError::Io(std::io::Error::other(e)))?;
        let mut sink = self.sink.lock().await;
        let mut line = String::with_capacity(json.len() + 2);
        if sink.torn {
            // Terminate whatever fragment the failed write left behind.
            line.push('\n');
        }
        line.push_str(&json);
        line.push('\n');

        sink.torn = true;
        sink.file.write_all(line.as_bytes()).await?;
        sink.file.flush().await?;
        sink.torn = false;
        Ok(())
    }
}

/// Read a decision log back.
///
/// Blank lines are ignored; lines that do not parse (a record torn by a
/// failed write) are skipped with a warning.
pub fn read_decision_log(path: &Path) -> Result<Vec<RoutingDecision>, RouterError> {
    let text = std::fs::read_to_string(path)?;
    let mut decisions = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(decision) => decisions.push(decision),
            Err(err) => warn!(
                path = %path.display(),
                line = index + 1,
                error = %err,
                "Skipping malformed decision log line"
            ),
        }
    }
    Ok(decisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::metrics::HealthStatus;

    fn decision(provider: &str) -> RoutingDecision {
        RoutingDecision {
            timestamp: Utc::now(),
            strategy: RoutingStrategy::Hybrid,
            provider_selected: provider.to_string(),
            latency: 42,
            cost: 0.002,
            fallback_used: false,
            reason_for_selection: "top ranked by hybrid (score 0.910)".into(),
            confidence: 0.91,
            tokens_used: 100,
            metrics_snapshot: ProviderMetrics {
                provider: provider.to_string(),
                avg_latency_ms: Some(42.0),
                success_rate: 1.0,
                total_requests: 1,
                total_failures: 0,
                total_tokens: 100,
                cost_per_1k_tokens: 0.02,
                last_request_at: Some(Utc::now()),
                last_probe_at: None,
                health_status: HealthStatus::Healthy,
                consecutive_failures: 0,
                last_error: None,
                window_samples: 1,
            },
        }
    }

    #[test]
    fn test_decision_field_names() {
        let value = serde_json::to_value(decision("a")).unwrap();
        let mut keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "confidence",
                "cost",
                "fallback_used",
                "latency",
                "metrics_snapshot",
                "provider_selected",
                "reason_for_selection",
                "strategy",
                "timestamp",
                "tokens_used",
            ]
        );
        assert_eq!(value["strategy"], "hybrid");
    }

    #[tokio::test]
    async fn test_append_one_line_per_decision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("decisions.jsonl");
        let log = DecisionLog::open(&path).unwrap();
        log.append(&decision("a")).await.unwrap();
        log.append(&decision("b")).await.unwrap();
        assert_eq!(log.path(), path.as_path());

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        let read = read_decision_log(&path).unwrap();
        assert_eq!(read[0].provider_selected, "a");
        assert_eq!(read[1].provider_selected, "b");
    }

    #[tokio::test]
    async fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");
        DecisionLog::open(&path)
            .unwrap()
            .append(&decision("a"))
            .await
            .unwrap();
        DecisionLog::open(&path)
            .unwrap()
            .append(&decision("b"))
            .await
            .unwrap();
        assert_eq!(read_decision_log(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_line_does_not_poison_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");
        let log = DecisionLog::open(&path).unwrap();
        log.append(&decision("a")).await.unwrap();

        // Leave a fragment behind, as an interrupted write would.
        {
            let mut sink = log.sink.lock().await;
            sink.file.write_all(b"{\"timestamp\":\"2026-").await.unwrap();
            sink.file.flush().await.unwrap();
            sink.torn = true;
        }
        log.append(&decision("b")).await.unwrap();
        log.append(&decision("c")).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 4);
        let providers: Vec<String> = read_decision_log(&path)
            .unwrap()
            .into_iter()
            .map(|d| d.provider_selected)
            .collect();
        assert_eq!(providers, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_read_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");
        let good = serde_json::to_string(&decision("a")).unwrap();
        std::fs::write(&path, format!("{good}\nnot json\n\n{good}\n")).unwrap();
        assert_eq!(read_decision_log(&path).unwrap().len(), 2);
    }
}
