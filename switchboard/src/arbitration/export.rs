//! JSON / CSV serialization of arbitration history and metrics.

use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ArbitrationError;
use super::history::ArbitrationRecord;
use super::metrics::ArbitrationMetricsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// Infer from a file extension (`.json` / `.csv`).
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }
}

impl FromStr for ExportFormat {
    type Err = ArbitrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(ArbitrationError::Export(format!(
                "unsupported export format: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

/// Quote a CSV field when it contains a delimiter, quote, or line break.
pub(crate) fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row(fields: &[String]) -> String {
    let mut row = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    row.push('\n');
    row
}

const HISTORY_HEADER: [&str; 12] = [
    "recorded_at",
    "conflict_id",
    "task_id",
    "subtask_id",
    "conflict_type",
    "output_count",
    "winner_agent_id",
    "confidence",
    "strategy_used",
    "fallback_chain_used",
    "duration_us",
    "winning_output",
];

pub(crate) fn history_to_csv(records: &[ArbitrationRecord]) -> String {
    let mut out = csv_row(&HISTORY_HEADER.map(String::from));
    for r in records {
        out.push_str(&csv_row(&[
            r.recorded_at.to_rfc3339(),
            r.conflict.conflict_id.clone(),
            r.conflict.task_id.clone(),
            r.conflict.subtask_id.clone(),
            r.conflict.conflict_type.to_string(),
            r.conflict.agent_outputs.len().to_string(),
            r.result.winner_agent_id.clone(),
            format!("{:.4}", r.result.confidence),
            r.result.strategy_used.clone(),
            r.result.fallback_chain_used.join(";"),
            r.duration_us.to_string(),
            r.result.winning_output.clone(),
        ]));
    }
    out
}

pub(crate) fn metrics_to_csv(snapshot: &ArbitrationMetricsSnapshot) -> String {
    let header = [
        "scope",
        "name",
        "invocations",
        "successes",
        "failures",
        "success_rate",
        "avg_confidence",
        "avg_latency_ms",
        "wins",
    ];
    let mut out = csv_row(&header.map(String::from));
    for (name, s) in &snapshot.strategies {
        out.push_str(&csv_row(&[
            "strategy".to_string(),
            name.clone(),
            s.invocations.to_string(),
            s.successes.to_string(),
            s.failures.to_string(),
            format!("{:.4}", s.success_rate),
            format!("{:.4}", s.avg_confidence),
            format!("{:.3}", s.avg_latency_ms),
            String::new(),
        ]));
    }
    for (name, a) in &snapshot.agents {
        out.push_str(&csv_row(&[
            "agent".to_string(),
            name.clone(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            format!("{:.4}", a.avg_winning_confidence),
            a.avg_execution_time_ms
                .map(|ms| format!("{ms:.3}"))
                .unwrap_or_default(),
            a.wins.to_string(),
        ]));
    }
    out
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, ArbitrationError> {
    serde_json::to_string_pretty(value).map_err(|e| ArbitrationError::Export(e.to_string()))
}

/// Write `contents` to `path`, creating parent directories.
pub(crate) fn write_export(path: &Path, contents: &str) -> Result<(), ArbitrationError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(path)?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(())
}
