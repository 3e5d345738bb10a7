//! Logging infrastructure for wallsight
//!
//! Configurable logging on top of the `tracing` crate, plus helpers that keep
//! per-observation log lines uniform across the CSI and fusion crates.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use crate::types::SensorType;

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level - most verbose
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level - least verbose
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("unknown log level: {s}")),
        }
    }
}

/// Initialize the tracing subscriber with the specified log level.
///
/// Call once at startup. `RUST_LOG` overrides the level.
///
/// # Example
///
/// ```
/// use wallsight_common::logging::{init_logging, LogLevel};
///
/// init_logging(LogLevel::Debug);
/// ```
pub fn init_logging(level: LogLevel) {
    init_logging_with_filter(&level.to_string());
}

/// Initialize logging with a custom filter string.
///
/// # Example
///
/// ```
/// use wallsight_common::logging::init_logging_with_filter;
///
/// // Info everywhere, every gate decision from the fusion crate
/// init_logging_with_filter("info,wallsight_fusion=debug");
/// ```
pub fn init_logging_with_filter(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_span_events(FmtSpan::NONE)
        .try_init();
}

/// What happened to an observation on its way to the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Applied to the state
    Accepted,
    /// Failed the Mahalanobis gate
    Rejected,
    /// Evicted from a full queue
    Dropped,
    /// Sensor weight is zero
    Disabled,
    /// Correction skipped to keep the covariance valid
    Unstable,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Accepted => write!(f, "ACCEPT"),
            Disposition::Rejected => write!(f, "REJECT"),
            Disposition::Dropped => write!(f, "DROP"),
            Disposition::Disabled => write!(f, "DISABLED"),
            Disposition::Unstable => write!(f, "UNSTABLE"),
        }
    }
}

/// Log an observation decision.
///
/// Accepted observations go to trace level, everything else to debug, so a
/// rejection storm is visible without drowning in normal traffic.
pub fn log_observation(
    disposition: Disposition,
    sensor_type: SensorType,
    source_id: &str,
    detail: &str,
) {
    match disposition {
        Disposition::Accepted => tracing::trace!(
            target: "wallsight::observation",
            "[{}] {} from {} {}",
            disposition,
            sensor_type,
            source_id,
            detail
        ),
        _ => tracing::debug!(
            target: "wallsight::observation",
            "[{}] {} from {} {}",
            disposition,
            sensor_type,
            source_id,
            detail
        ),
    }
}

/// Formats a slice compactly with fixed precision: `[1.000, 2.500]`.
pub fn format_values(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{v:.3}")).collect();
    format!("[{}]", parts.join(", "))
}
