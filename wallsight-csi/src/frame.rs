//! CSI frame processing
//!
//! Turns a raw per-subcarrier CSI frame into a path loss and multipath
//! observation for the router that produced it.
//!
//! Phase spread is measured around the circular mean with deviations wrapped
//! to (-π, π], so phases straddling ±π read as tightly clustered.

use std::f64::consts::PI;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use wallsight_common::{Error, Result};

use crate::registry::Router;

/// Raw CSI frame as delivered by a capture device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsiFrame {
    /// Router the frame was received from
    pub router_id: String,
    /// Per-subcarrier magnitude (linear, mW^0.5 scale so that 20·log10 gives dBm)
    pub magnitudes: Vec<f64>,
    /// Per-subcarrier phase (radians)
    pub phases: Vec<f64>,
    /// Timestamp (ms since epoch)
    pub timestamp_ms: u64,
}

impl CsiFrame {
    /// Creates a new frame
    pub fn new(
        router_id: impl Into<String>,
        magnitudes: Vec<f64>,
        phases: Vec<f64>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            router_id: router_id.into(),
            magnitudes,
            phases,
            timestamp_ms,
        }
    }

    /// Number of subcarriers
    pub fn subcarriers(&self) -> usize {
        self.magnitudes.len()
    }

    fn validate(&self) -> Result<()> {
        if self.magnitudes.is_empty() || self.phases.is_empty() {
            return Err(Error::InvalidFrame(format!(
                "frame from {} has no subcarriers",
                self.router_id
            )));
        }
        if self.magnitudes.len() != self.phases.len() {
            return Err(Error::InvalidFrame(format!(
                "frame from {} has {} magnitudes but {} phases",
                self.router_id,
                self.magnitudes.len(),
                self.phases.len()
            )));
        }
        if self
            .magnitudes
            .iter()
            .chain(self.phases.iter())
            .any(|v| !v.is_finite())
        {
            return Err(Error::InvalidFrame(format!(
                "frame from {} contains non-finite values",
                self.router_id
            )));
        }
        Ok(())
    }
}

/// Per-router observation derived from one CSI frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsiObservation {
    /// Router the observation belongs to
    pub router_id: String,
    /// Received power (dBm)
    pub rx_power_dbm: f64,
    /// Transmit power minus received power (dB)
    pub measured_loss_db: f64,
    /// Population variance of subcarrier phases about their circular mean (rad^2)
    pub multipath_spread: f64,
    /// Squared coefficient of variation of subcarrier magnitudes
    pub magnitude_dispersion: f64,
    /// `1 / (1 + multipath_spread) · 1 / (1 + magnitude_dispersion)`, in (0, 1]
    pub confidence: f64,
    /// Frame timestamp (ms since epoch)
    pub timestamp_ms: u64,
}

/// Stateless CSI frame processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsiFrameProcessor;

impl CsiFrameProcessor {
    /// Creates a processor
    pub fn new() -> Self {
        Self
    }

    /// Processes a frame received from `router`.
    pub fn process(&self, frame: &CsiFrame, router: &Router) -> Result<CsiObservation> {
        if frame.router_id != router.id {
            return Err(Error::InvalidFrame(format!(
                "frame from {} processed against router {}",
                frame.router_id, router.id
            )));
        }
        frame.validate()?;

        let magnitudes = Array1::from_vec(frame.magnitudes.clone());
        let phases = Array1::from_vec(frame.phases.clone());

        let mean_power = magnitudes.mapv(|m| m * m).mean().unwrap_or(0.0);
        let rms = mean_power.sqrt();
        if rms <= 0.0 {
            return Err(Error::InvalidFrame(format!(
                "frame from {} has zero RMS magnitude",
                frame.router_id
            )));
        }
        let rx_power_dbm = 20.0 * rms.log10();
        let measured_loss_db = router.tx_power_dbm - rx_power_dbm;

        let multipath_spread = circular_phase_spread(&phases);
        let magnitude_mean = magnitudes.mean().unwrap_or(0.0);
        let magnitude_dispersion = if magnitude_mean > 0.0 {
            magnitudes.mapv(|m| (m - magnitude_mean).powi(2)).mean().unwrap_or(0.0)
                / (magnitude_mean * magnitude_mean)
        } else {
            0.0
        };
        let confidence = 1.0 / (1.0 + multipath_spread) / (1.0 + magnitude_dispersion);

        Ok(CsiObservation {
            router_id: frame.router_id.clone(),
            rx_power_dbm,
            measured_loss_db,
            multipath_spread,
            magnitude_dispersion,
            confidence,
            timestamp_ms: frame.timestamp_ms,
        })
    }
}

fn wrap_phase(phase: f64) -> f64 {
    let wrapped = (phase + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Mean squared deviation of phases from their circular mean.
fn circular_phase_spread(phases: &Array1<f64>) -> f64 {
    let sin_sum: f64 = phases.iter().map(|p| p.sin()).sum();
    let cos_sum: f64 = phases.iter().map(|p| p.cos()).sum();
    let mean = if sin_sum == 0.0 && cos_sum == 0.0 {
        0.0
    } else {
        sin_sum.atan2(cos_sum)
    };
    phases
        .mapv(|p| wrap_phase(p - mean).powi(2))
        .mean()
        .unwrap_or(0.0)
}
