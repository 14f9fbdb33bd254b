//! Configuration loading
//!
//! One TOML document carries both subsystems:
//!
//! ```toml
//! fallback_policy_path = "fallback-policy.yaml"
//!
//! [router]
//! strategy = "hybrid"
//! request_timeout_ms = 5000
//!
//! [router.weights]
//! cost = 0.3
//! performance = 0.4
//! availability = 0.3
//!
//! [arbitration]
//! default_strategy = "hybrid_score"
//! fallback_chain = ["hybrid_score", "confidence_weight", "majority_vote"]
//! ```
//!
//! Missing sections fall back to defaults. Anything present but malformed is
//! a hard error: callers are expected to abort startup (or reject a reload)
//! rather than continue with silently substituted values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::arbitration::ArbitrationConfig;
use crate::routing::{FallbackPolicy, RouterConfig};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {detail}", .path.display())]
    Parse { path: PathBuf, detail: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Read a config file, attaching the path to any I/O error.
pub(crate) fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SwitchboardConfig {
    pub router: RouterConfig,
    pub arbitration: ArbitrationConfig,
    /// YAML fallback-policy document; the built-in policy is used when unset.
    pub fallback_policy_path: Option<PathBuf>,
}

impl SwitchboardConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = read_config_file(path)?;
        let config = Self::parse(&text, path)?;
        info!(
            path = %path.display(),
            router_strategy = %config.router.strategy,
            default_strategy = %config.arbitration.default_strategy,
            "Loaded switchboard config"
        );
        Ok(config)
    }

    /// Parse and validate an inline TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, Path::new("<inline>"))
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.router.validate()?;
        self.arbitration.validate()?;
        Ok(())
    }

    /// Load the fallback policy named by `fallback_policy_path`.
    ///
    /// Relative paths resolve against `base_dir` (normally the directory of
    /// the TOML file).
    pub fn load_fallback_policy(&self, base_dir: &Path) -> Result<FallbackPolicy, ConfigError> {
        match &self.fallback_policy_path {
            Some(path) if path.is_absolute() => FallbackPolicy::load_yaml_file(path),
            Some(path) => FallbackPolicy::load_yaml_file(&base_dir.join(path)),
            None => Ok(FallbackPolicy::default()),
        }
    }
}
