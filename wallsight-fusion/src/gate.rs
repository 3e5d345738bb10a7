//! Mahalanobis outlier gate

use wallsight_common::linalg::inverse_quadratic_form;
use wallsight_common::{Error, Result};

use crate::ekf::Innovation;

/// Rejects innovations whose Mahalanobis distance exceeds a threshold.
///
/// The gate only reads the innovation. A rejected observation never touches
/// the filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierGate {
    threshold: f64,
}

impl OutlierGate {
    /// Creates a gate. Distances strictly greater than `threshold` fail.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Gate threshold
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Mahalanobis distance `sqrt(yᵀ S⁻¹ y)`.
    pub fn mahalanobis(&self, innovation: &Innovation) -> Result<f64> {
        let d2 = inverse_quadratic_form(&innovation.covariance, &innovation.residual).ok_or_else(
            || Error::NumericalInstability("innovation covariance is singular".into()),
        )?;
        Ok(d2.max(0.0).sqrt())
    }

    /// Returns the distance if the innovation passes.
    ///
    /// # Errors
    ///
    /// [`Error::OutlierRejected`] when the distance exceeds the threshold.
    pub fn check(&self, innovation: &Innovation) -> Result<f64> {
        let distance = self.mahalanobis(innovation)?;
        if distance > self.threshold {
            return Err(Error::OutlierRejected {
                distance,
                threshold: self.threshold,
            });
        }
        Ok(distance)
    }
}

impl Default for OutlierGate {
    fn default() -> Self {
        Self::new(3.0)
    }
}
