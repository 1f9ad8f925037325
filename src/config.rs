// ABOUTME: Engine configuration types and parsing for trellis.yml.
// ABOUTME: Carries the default retry policy and the blueprint nesting limit.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::provider::RetryPolicy;

pub const CONFIG_FILENAME: &str = "trellis.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Engine-wide configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Retry policy applied when a provider does not supply its own.
    pub retry_policy: RetryPolicy,
    /// Maximum nesting depth for child blueprints; exceeding it is a
    /// precondition failure detected before any destructive action.
    pub max_blueprint_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            retry_policy: RetryPolicy::default(),
            max_blueprint_depth: 10,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}
