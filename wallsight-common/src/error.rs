//! Error types for wallsight

use std::time::Duration;

use thiserror::Error;

/// Error types for the wallsight fusion engine.
///
/// Everything except [`Error::Config`], [`Error::Io`] and [`Error::YamlParse`]
/// is recoverable: the fusion loop logs or counts it and keeps running.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed sensor reading (NaN, dimension mismatch, time going backwards).
    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    /// Malformed CSI frame (empty or mismatched subcarrier arrays).
    #[error("Invalid CSI frame: {0}")]
    InvalidFrame(String),

    /// Router parameters that cannot be used as an anchor.
    #[error("Invalid router: {0}")]
    InvalidRouter(String),

    /// A router with the same identifier is already registered.
    #[error("Duplicate router id: {0}")]
    DuplicateRouterId(String),

    /// No router with this identifier is registered.
    #[error("Router not found: {0}")]
    RouterNotFound(String),

    /// Triangulation cannot run with the observations at hand.
    #[error("Insufficient anchors: {available} available, {required} required")]
    InsufficientAnchors {
        /// Number of usable anchor observations
        available: usize,
        /// Configured minimum
        required: usize,
    },

    /// Observation is statistically inconsistent with the current estimate.
    #[error("Outlier rejected: Mahalanobis distance {distance:.3} exceeds {threshold:.3}")]
    OutlierRejected {
        /// Mahalanobis distance of the innovation
        distance: f64,
        /// Configured gate threshold
        threshold: f64,
    },

    /// A correction would break covariance positive semi-definiteness.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// A tick overran its period; the missed ticks are skipped.
    #[error("Scheduler stalled: tick overran by {overrun:?}, skipping {skipped} tick(s)")]
    SchedulerStalled {
        /// Time beyond the nominal tick period
        overrun: Duration,
        /// Number of whole periods that will not be executed
        skipped: u64,
    },

    /// Scheduler lifecycle misuse (start while running, etc.).
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns true if the error must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Io(_) | Error::YamlParse(_))
    }
}

/// Result alias used across wallsight crates.
pub type Result<T> = std::result::Result<T, Error>;
