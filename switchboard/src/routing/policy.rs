//! Per-task-class escalation policy.
//!
//! A YAML document maps task types onto task classes, and each class bounds
//! how hard the router tries before giving up:
//!
//! ```yaml
//! default_class: interactive
//! task_classes:
//!   emergency:
//!     timeout_ms: 2000
//!     allow_unhealthy_last_resort: true
//!   batch:
//!     max_attempts: 2
//!     timeout_ms: 30000
//!     backoff_ms: 1000
//! task_types:
//!   incident_triage: emergency
//!   nightly_report: batch
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{read_config_file, ConfigError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskClassPolicy {
    /// Providers tried per request. Unset means every provider gets a
    /// turn; a set cap is still bounded by the provider count.
    pub max_attempts: Option<u32>,
    /// Per-attempt timeout; the router's `request_timeout_ms` when unset.
    pub timeout_ms: Option<u64>,
    /// Wall-clock budget across all attempts of one request.
    pub total_budget_ms: Option<u64>,
    /// Delay before the first failover; 0 disables backoff.
    pub backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Try unhealthy providers after every routable one has failed.
    pub allow_unhealthy_last_resort: bool,
}

impl Default for TaskClassPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            timeout_ms: None,
            total_budget_ms: None,
            backoff_ms: 0,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5_000,
            allow_unhealthy_last_resort: false,
        }
    }
}

impl TaskClassPolicy {
    /// Delay before failover number `retry` (0-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if self.backoff_ms == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.max(1.0).powi(retry.min(32) as i32);
        let ms = (self.backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Number of attempts a request may make across `providers` providers.
    pub fn attempt_cap(&self, providers: usize) -> usize {
        match self.max_attempts {
            Some(max) => (max as usize).min(providers),
            None => providers,
        }
    }

    pub fn total_budget(&self) -> Option<Duration> {
        self.total_budget_ms.map(Duration::from_millis)
    }

    fn validate(&self, class: &str) -> Result<(), ConfigError> {
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "task class '{class}': max_attempts must be at least 1"
            )));
        }
        if self.timeout_ms == Some(0) || self.total_budget_ms == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "task class '{class}': timeouts must be greater than 0"
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "task class '{class}': backoff_multiplier must be >= 1.0"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackPolicy {
    pub default_class: String,
    pub task_classes: BTreeMap<String, TaskClassPolicy>,
    /// Task type → class name.
    pub task_types: BTreeMap<String, String>,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        let mut task_classes = BTreeMap::new();
        task_classes.insert(
            "emergency".to_string(),
            TaskClassPolicy {
                timeout_ms: Some(2_000),
                total_budget_ms: Some(6_000),
                allow_unhealthy_last_resort: true,
                ..Default::default()
            },
        );
        task_classes.insert(
            "interactive".to_string(),
            TaskClassPolicy {
                total_budget_ms: Some(15_000),
                ..Default::default()
            },
        );
        task_classes.insert(
            "batch".to_string(),
            TaskClassPolicy {
                timeout_ms: Some(30_000),
                backoff_ms: 1_000,
                max_backoff_ms: 10_000,
                ..Default::default()
            },
        );
        Self {
            default_class: "interactive".to_string(),
            task_classes,
            task_types: BTreeMap::new(),
        }
    }
}

impl FallbackPolicy {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, Path::new("<inline>"))
    }

    pub fn load_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = read_config_file(path)?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let policy: Self = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        policy.validate()?;
        Ok(policy)
    }

    /// Every referenced class must exist and be well-formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.task_classes.contains_key(&self.default_class) {
            return Err(ConfigError::Invalid(format!(
                "default_class '{}' is not defined in task_classes",
                self.default_class
            )));
        }
        for (task_type, class) in &self.task_types {
            if !self.task_classes.contains_key(class) {
                return Err(ConfigError::Invalid(format!(
                    "task type '{task_type}' maps to undefined class '{class}'"
                )));
            }
        }
        for (class, policy) in &self.task_classes {
            policy.validate(class)?;
        }
        Ok(())
    }

    /// Class name for a task type; unknown or missing types use the default.
    pub fn class_for(&self, task_type: Option<&str>) -> &str {
        task_type
            .and_then(|t| self.task_types.get(t))
            .map(String::as_str)
            .unwrap_or(&self.default_class)
    }

    /// Policy for a task type, falling back to the default class.
    ///
    /// A class name is accepted in place of a task type.
    pub fn policy_for(&self, task_type: Option<&str>) -> &TaskClassPolicy {
        if let Some(policy) = task_type.and_then(|t| self.task_classes.get(t)) {
            return policy;
        }
        self.task_classes
            .get(self.class_for(task_type))
            .unwrap_or(&DEFAULT_CLASS_POLICY)
    }
}

// Only reachable for a policy mutated into an invalid state after validation.
static DEFAULT_CLASS_POLICY: TaskClassPolicy = TaskClassPolicy {
    max_attempts: None,
    timeout_ms: None,
    total_budget_ms: None,
    backoff_ms: 0,
    backoff_multiplier: 2.0,
    max_backoff_ms: 5_000,
    allow_unhealthy_last_resort: false,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = FallbackPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.class_for(None), "interactive");
        assert!(policy.policy_for(Some("emergency")).allow_unhealthy_last_resort);
        assert_eq!(policy.policy_for(Some("unknown-task")).max_attempts, None);
    }

    #[test]
    fn test_attempt_cap_defaults_to_every_provider() {
        let policy = FallbackPolicy::default();
        for class in ["emergency", "interactive", "batch"] {
            assert_eq!(policy.policy_for(Some(class)).attempt_cap(4), 4, "{class}");
        }

        let capped = TaskClassPolicy {
            max_attempts: Some(2),
            ..Default::default()
        };
        assert_eq!(capped.attempt_cap(4), 2);
        assert_eq!(capped.attempt_cap(1), 1);
    }

    #[test]
    fn test_task_type_mapping() {
        let policy = FallbackPolicy::from_yaml(
            r#"
default_class: interactive
task_classes:
  interactive:
    max_attempts: 3
  batch:
    max_attempts: 1
    timeout_ms: 60000
task_types:
  nightly_report: batch
"#,
        )
        .unwrap();
        assert_eq!(policy.class_for(Some("nightly_report")), "batch");
        assert_eq!(policy.policy_for(Some("nightly_report")).max_attempts, Some(1));
        assert_eq!(policy.policy_for(Some("chat")).max_attempts, Some(3));
        assert_eq!(policy.policy_for(Some("batch")).timeout_ms, Some(60_000));
    }

    #[test]
    fn test_undefined_class_rejected() {
        let err = FallbackPolicy::from_yaml(
            "default_class: interactive\ntask_classes:\n  interactive: {}\ntask_types:\n  triage: emergency\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("emergency"), "{err}");

        let err = FallbackPolicy::from_yaml("default_class: missing\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = FallbackPolicy::from_yaml("task_classes: [1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        let err = FallbackPolicy::from_yaml("default_class: interactive\nretries: 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = TaskClassPolicy {
            backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 350,
            ..Default::default()
        };
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(350));
        assert_eq!(TaskClassPolicy::default().backoff_for(5), Duration::ZERO);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = FallbackPolicy::from_yaml(
            "default_class: x\ntask_classes:\n  x:\n    max_attempts: 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }
}
