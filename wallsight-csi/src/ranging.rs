//! Loss to range conversion
//!
//! Log-distance path loss anchored at the 1 m free-space loss:
//!
//! ```text
//! n     = path_loss_exponent + min(max_multipath_exponent, spread / multipath_exponent_scale)
//! range = 10 ^ ((measured_loss - FSPL_1m) / (10 n))
//! ```
//!
//! clamped below at `min_range_m`. The mapping is monotonic non-decreasing in
//! measured loss for a fixed spread. Material excess loss is not subtracted;
//! wall attenuation lengthens the inferred range.

use wallsight_common::RangingConfig;

use crate::registry::free_space_loss_db;

/// Monotonic measured-loss to range model.
#[derive(Debug, Clone, Default)]
pub struct RangingModel {
    config: RangingConfig,
}

impl RangingModel {
    /// Creates a model from configuration
    pub fn new(config: RangingConfig) -> Self {
        Self { config }
    }

    /// Model parameters
    pub fn config(&self) -> &RangingConfig {
        &self.config
    }

    /// Effective path loss exponent for a multipath spread.
    pub fn path_loss_exponent(&self, multipath_spread: f64) -> f64 {
        let spread = if multipath_spread.is_finite() {
            multipath_spread.max(0.0)
        } else {
            0.0
        };
        let extra = (spread / self.config.multipath_exponent_scale)
            .min(self.config.max_multipath_exponent);
        self.config.path_loss_exponent + extra
    }

    /// Inferred range (meters) for a measured loss.
    pub fn range_for_loss(&self, measured_loss_db: f64, frequency_ghz: f64, multipath_spread: f64) -> f64 {
        let n = self.path_loss_exponent(multipath_spread);
        let excess = measured_loss_db - free_space_loss_db(frequency_ghz);
        let range = 10f64.powf(excess / (10.0 * n));
        if range.is_finite() {
            range.max(self.config.min_range_m)
        } else {
            self.config.min_range_m
        }
    }

    /// Measured loss that maps to `range_m`; the inverse of
    /// [`RangingModel::range_for_loss`] above the minimum range.
    pub fn loss_for_range(&self, range_m: f64, frequency_ghz: f64, multipath_spread: f64) -> f64 {
        let n = self.path_loss_exponent(multipath_spread);
        free_space_loss_db(frequency_ghz) + 10.0 * n * range_m.max(f64::MIN_POSITIVE).log10()
    }
}
