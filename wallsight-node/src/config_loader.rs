//! Configuration loading for the wallsight node
//!
//! Wraps [`FusionConfig`] with the router layout and runner options.
//!
//! ```yaml
//! log_level: info
//! status_interval_ms: 1000
//! fusion:
//!   update_rate_hz: 100
//!   sensor_weights:
//!     gps: 0.95
//!     wifi: 0.75
//! routers:
//!   - id: r1
//!     position: { x: 0.0, y: 0.0, z: 2.0 }
//!     frequency_ghz: 2.4
//!     tx_power_dbm: 20.0
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wallsight_common::{FusionConfig, LogLevel};
use wallsight_csi::Router;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Configuration validation error
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Node configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Fusion engine options
    pub fusion: FusionConfig,
    /// Routers registered at startup
    pub routers: Vec<Router>,
    /// Log level, overridden by `RUST_LOG`
    pub log_level: LogLevel,
    /// Interval between status log lines (ms), 0 disables them
    pub status_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            fusion: FusionConfig::default(),
            routers: Vec::new(),
            log_level: LogLevel::Info,
            status_interval_ms: 1000,
        }
    }
}

/// Loads a node configuration from a YAML file without validating it.
pub fn load_node_config<P: AsRef<Path>>(path: P) -> Result<NodeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    load_node_config_from_str(&contents)
}

/// Loads a node configuration from a YAML string.
pub fn load_node_config_from_str(yaml: &str) -> Result<NodeConfig, ConfigError> {
    serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Validates a node configuration.
///
/// # Validation Rules
///
/// - the fusion options pass [`FusionConfig::validate`]
/// - router ids are unique and every router passes [`Router::validate`]
pub fn validate_node_config(config: &NodeConfig) -> Result<(), ConfigError> {
    config
        .fusion
        .validate()
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    let mut seen = BTreeSet::new();
    for router in &config.routers {
        router
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        if !seen.insert(router.id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "router {} is listed twice",
                router.id
            )));
        }
    }
    Ok(())
}

/// Loads and validates a node configuration from a YAML file.
pub fn load_and_validate_node_config<P: AsRef<Path>>(path: P) -> Result<NodeConfig, ConfigError> {
    let config = load_node_config(path)?;
    validate_node_config(&config)?;
    Ok(config)
}
