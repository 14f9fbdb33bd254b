//! Strategy descriptor files
//!
//! A plugin directory holds one YAML file per strategy:
//!
//! ```yaml
//! strategy_name: frugal
//! kind: cost_aware
//! description: Prefer cheap answers under a tight budget
//! params:
//!   budget_limit: 0.01
//!   quality_weight: 0.4
//!   cost_weight: 0.6
//! ```
//!
//! `kind` must name a built-in strategy. A descriptor only selects and
//! parameterizes reviewed code; nothing is executed from the file. Any
//! unreadable or invalid file, or a duplicate `strategy_name`, fails the
//! whole load.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::ArbitrationError;
use super::strategy::{BuiltinStrategy, ConfiguredStrategy};
use super::types::StrategyParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyDescriptor {
    pub strategy_name: String,
    pub kind: BuiltinStrategy,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub params: StrategyParams,
}

impl StrategyDescriptor {
    pub fn from_yaml(yaml: &str, path: &Path) -> Result<Self, ArbitrationError> {
        let descriptor: Self = serde_yaml::from_str(yaml).map_err(|e| plugin_error(path, e))?;
        if descriptor.strategy_name.trim().is_empty() {
            return Err(plugin_error(path, "strategy_name must not be empty"));
        }
        Ok(descriptor)
    }

    pub fn load_yaml_file(path: &Path) -> Result<Self, ArbitrationError> {
        let yaml = std::fs::read_to_string(path).map_err(|e| plugin_error(path, e))?;
        Self::from_yaml(&yaml, path)
    }

    /// Instantiate, validating the preset params against the base kind.
    pub fn build(&self, path: &Path) -> Result<ConfiguredStrategy, ArbitrationError> {
        ConfiguredStrategy::new(self.strategy_name.clone(), self.kind, self.params.clone())
            .map_err(|e| plugin_error(path, e))
    }
}

/// A strategy loaded from a descriptor file.
pub struct LoadedPlugin {
    pub path: PathBuf,
    pub descriptor: StrategyDescriptor,
    pub strategy: ConfiguredStrategy,
}

fn plugin_error(path: &Path, detail: impl std::fmt::Display) -> ArbitrationError {
    ArbitrationError::PluginLoad {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// Load every `*.yml` / `*.yaml` descriptor in `dir`, in file-name order.
pub fn load_plugin_dir(dir: &Path) -> Result<Vec<LoadedPlugin>, ArbitrationError> {
    if !dir.is_dir() {
        return Err(plugin_error(dir, "path is not a directory"));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| plugin_error(dir, e))? {
        let path = entry.map_err(|e| plugin_error(dir, e))?.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext == "yml" || ext == "yaml" {
            paths.push(path);
        } else {
            debug!(path = %path.display(), "Skipping non-descriptor file");
        }
    }
    paths.sort();

    let mut seen = BTreeSet::new();
    let mut plugins = Vec::with_capacity(paths.len());
    for path in paths {
        let descriptor = StrategyDescriptor::load_yaml_file(&path)?;
        if !seen.insert(descriptor.strategy_name.clone()) {
            return Err(ArbitrationError::DuplicateStrategy(
                descriptor.strategy_name,
            ));
        }
        let strategy = descriptor.build(&path)?;
        plugins.push(LoadedPlugin {
            path,
            descriptor,
            strategy,
        });
    }

    info!(
        dir = %dir.display(),
        count = plugins.len(),
        "Loaded strategy descriptors"
    );
    Ok(plugins)
}
