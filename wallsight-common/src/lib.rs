//! Common types and utilities for wallsight
//!
//! This crate provides the shared sensor types, configuration structures,
//! error taxonomy, logging setup, tick bookkeeping and the small linear
//! algebra helpers used by the CSI and fusion crates.

pub mod config;
pub mod error;
pub mod linalg;
pub mod logging;
pub mod tick;
pub mod types;

pub use config::{
    default_material_database, FusionConfig, PriorConfig, ProcessNoiseConfig, RangingConfig,
    SensorWeights,
};
pub use error::{Error, Result};
pub use logging::{
    format_values, init_logging, init_logging_with_filter, log_observation, Disposition, LogLevel,
};
pub use tick::{TickClock, TickCounter, TickTiming};
pub use types::*;
