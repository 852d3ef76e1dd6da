//! Agent configuration model and loading.

use crate::resolve::{resolve_config_path, ConfigSource};
use crate::validate::{validate_config, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Built-in module ids enabled when the config does not name any.
pub const DEFAULT_MODULES: &[&str] = &["hardware", "system", "network", "security", "management"];

const ENV_ENGINE_PATH: &str = "HOSTFACTS_ENGINE_PATH";
const ENV_EXTENSION_PATH: &str = "HOSTFACTS_EXTENSION_PATH";
const ENV_DISABLE_EXTENSION: &str = "HOSTFACTS_DISABLE_EXTENSION";
const ENV_MODULES: &str = "HOSTFACTS_MODULES";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Semantic validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl From<ConfigError> for hf_common::Error {
    fn from(err: ConfigError) -> Self {
        hf_common::Error::Config(err.to_string())
    }
}

/// Resolved values the collection engine reads once at the start of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Query engine binary.
    pub engine_path: PathBuf,

    /// Whether queries against extension tables may load the extension.
    pub extension_enabled: bool,

    /// Explicit extension binary; takes priority over discovered paths.
    pub extension_path: Option<PathBuf>,

    /// Module ids collected by a full run.
    pub enabled_modules: Vec<String>,

    /// Timeout for each subprocess invocation.
    pub probe_timeout_secs: u64,

    /// Maximum wait for the extension to register its tables.
    pub extension_ready_timeout_secs: u64,

    /// Interpreter used for shell probes.
    pub shell: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::from("/usr/local/bin/osqueryi"),
            extension_enabled: true,
            extension_path: None,
            enabled_modules: DEFAULT_MODULES.iter().map(|s| s.to_string()).collect(),
            probe_timeout_secs: 30,
            extension_ready_timeout_secs: 15,
            shell: PathBuf::from("/bin/sh"),
        }
    }
}

impl AgentConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn extension_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.extension_ready_timeout_secs)
    }

    /// Parse a config document.
    pub fn from_json(content: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_ENGINE_PATH).filter(|v| !v.is_empty()) {
            self.engine_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_EXTENSION_PATH).filter(|v| !v.is_empty()) {
            self.extension_path = Some(PathBuf::from(path));
        }
        if let Some(flag) = lookup(ENV_DISABLE_EXTENSION) {
            if matches!(flag.trim().to_lowercase().as_str(), "1" | "true" | "yes") {
                self.extension_enabled = false;
            }
        }
        if let Some(list) = lookup(ENV_MODULES) {
            let modules: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !modules.is_empty() {
                self.enabled_modules = modules;
            }
        }
    }
}

/// Configuration together with its provenance.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AgentConfig,
    /// File the config was read from (None if using defaults).
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Load configuration with the standard resolution order, apply environment
/// overrides, and validate the result.
pub fn load_config(cli_path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let resolved = resolve_config_path(cli_path);

    let mut config = match &resolved.path {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            AgentConfig::from_json(&content, path)?
        }
        None => AgentConfig::default(),
    };

    config.apply_env_overrides();
    validate_config(&config)?;

    debug!(
        source = %resolved.source,
        path = ?resolved.path,
        modules = config.enabled_modules.len(),
        "configuration loaded"
    );

    Ok(LoadedConfig {
        config,
        path: resolved.path,
        source: resolved.source,
    })
}
