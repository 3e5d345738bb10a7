//! wallsight node runner
//!
//! Configuration loading and recorded-data replay for the `wallsight` binary.

pub mod config_loader;
pub mod replay;

pub use config_loader::{
    load_and_validate_node_config, load_node_config, load_node_config_from_str,
    validate_node_config, ConfigError, NodeConfig,
};
pub use replay::{
    apply_record, load_replay, parse_replay, replay, ReplayError, ReplayRecord, ReplaySummary,
};
