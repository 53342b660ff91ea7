//! Engine configuration
//!
//! Limits applied while validating conditions and actions, plus execution
//! settings for the engine. Loaded from YAML; every field has a default so a
//! partial file (or no file at all) is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "RULE_ENGINE_CONFIG";

/// Config file looked up relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/rule-engine.yaml";

/// Safety limits for condition trees and action lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ValidationLimits {
    /// Maximum nesting depth; the root node sits at depth 1.
    pub max_depth: usize,
    /// Maximum number of children in a single AND/OR group.
    pub max_group_size: usize,
    /// Maximum length of a field path, in characters.
    pub max_field_path_len: usize,
    /// Maximum number of literal values in an IN / NOT_IN list.
    pub max_list_values: usize,
    /// Maximum number of actions in a success or failure list.
    pub max_actions: usize,
    /// Maximum length of an action message template.
    pub max_message_len: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_group_size: 50,
            max_field_path_len: 200,
            max_list_values: 1000,
            max_actions: 50,
            max_message_len: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ExecutionSettings {
    /// Upper bound for evaluating one rule and running its actions.
    pub rule_timeout_ms: u64,
    /// Applicable rules beyond this count are ignored (lowest priority first).
    pub max_rules_per_execution: usize,
    /// Default timeout for CALL_WEBHOOK when the action does not set one.
    pub webhook_timeout_ms: u64,
    /// Keep executing remaining rules after one fails.
    pub continue_on_error: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            rule_timeout_ms: 5_000,
            max_rules_per_execution: 100,
            webhook_timeout_ms: 10_000,
            continue_on_error: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: ValidationLimits,
    pub execution: ExecutionSettings,
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse engine config")
    }
}

pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Resolve the config location.
    ///
    /// Resolution order:
    /// 1. `RULE_ENGINE_CONFIG` environment variable
    /// 2. `config/rule-engine.yaml` relative to the working directory
    /// 3. built-in defaults
    pub fn from_env() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::new(path);
        }

        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            return Self::new(DEFAULT_CONFIG_PATH);
        }

        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn load(&self) -> Result<EngineConfig> {
        let Some(path) = &self.path else {
            debug!("No engine config file found, using defaults");
            return Ok(EngineConfig::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config {}", path.display()))?;
        let config = EngineConfig::from_yaml_str(&content)
            .with_context(|| format!("Invalid engine config {}", path.display()))?;

        info!(
            path = %path.display(),
            max_depth = config.limits.max_depth,
            rule_timeout_ms = config.execution.rule_timeout_ms,
            "Loaded engine config"
        );
        Ok(config)
    }
}
