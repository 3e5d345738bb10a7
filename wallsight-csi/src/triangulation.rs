//! Multi-anchor triangulation via iterative weighted least squares
//!
//! Starts at the confidence-weighted centroid of the anchors and refines with
//! Gauss-Newton steps on the range residuals. The default solve is planar: the
//! height stays at the centroid and ranges are compared in the XY plane. The
//! 3D solve adds Levenberg-Marquardt damping so coplanar anchors do not make
//! the normal equations singular.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use wallsight_common::linalg::solve_spd;
use wallsight_common::{Error, FusionConfig, Result, Vector3};

/// Anchor distance below which a residual row is skipped (meters).
const MIN_ANCHOR_DISTANCE: f64 = 1e-3;

/// One router's contribution to a triangulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorObservation {
    /// Router identifier
    pub router_id: String,
    /// Known router position
    pub position: Vector3,
    /// Inferred range to the target (meters)
    pub range_m: f64,
    /// Observation confidence, used as the least-squares weight
    pub confidence: f64,
    /// Timestamp of the underlying frame (ms since epoch)
    pub timestamp_ms: u64,
}

impl AnchorObservation {
    fn is_usable(&self) -> bool {
        self.position.is_finite()
            && self.range_m.is_finite()
            && self.range_m > 0.0
            && self.confidence.is_finite()
            && self.confidence > 0.0
    }
}

/// Configuration for the triangulation solver.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangulationConfig {
    /// Minimum usable anchors
    pub min_anchors: usize,
    /// Maximum number of Gauss-Newton iterations
    pub max_iterations: usize,
    /// Step norm below which the solve counts as converged (meters)
    pub convergence_threshold_m: f64,
    /// Solve for height as well
    pub solve_3d: bool,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self {
            min_anchors: 2,
            max_iterations: 6,
            convergence_threshold_m: 0.01,
            solve_3d: false,
        }
    }
}

impl From<&FusionConfig> for TriangulationConfig {
    fn from(config: &FusionConfig) -> Self {
        Self {
            min_anchors: config.min_routers,
            max_iterations: config.max_iterations,
            convergence_threshold_m: config.convergence_threshold_m,
            solve_3d: config.triangulate_3d,
        }
    }
}

/// Whether the solver met its convergence criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriangulationStatus {
    /// Step norm fell below the threshold
    Converged,
    /// Iterations exhausted or geometry singular; best estimate returned
    NonConverged,
}

/// Result of a triangulation solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangulationResult {
    /// Estimated position
    pub position: Vector3,
    /// Confidence in [0, 1], halved when not converged
    pub confidence: f64,
    /// Iterations executed
    pub iterations: usize,
    /// Confidence-weighted mean absolute range residual (meters)
    pub fit_error_m: f64,
    /// `exp(-fit_error_m / 5)`
    pub fit_score: f64,
    /// Anchors that took part
    pub anchor_count: usize,
    /// Convergence status
    pub status: TriangulationStatus,
    /// Newest anchor timestamp (ms since epoch)
    pub timestamp_ms: u64,
}

impl TriangulationResult {
    /// Returns true if the solve converged
    pub fn is_converged(&self) -> bool {
        self.status == TriangulationStatus::Converged
    }
}

/// Weighted least-squares triangulator.
#[derive(Debug, Clone, Default)]
pub struct Triangulator {
    config: TriangulationConfig,
}

impl Triangulator {
    /// Creates a triangulator
    pub fn new(config: TriangulationConfig) -> Self {
        Self { config }
    }

    /// Solver configuration
    pub fn config(&self) -> &TriangulationConfig {
        &self.config
    }

    /// Minimum anchors required, never below two
    pub fn required_anchors(&self) -> usize {
        self.config.min_anchors.max(2)
    }

    /// Estimates a position from anchor observations.
    ///
    /// Anchors with non-finite values, a non-positive range or a
    /// non-positive confidence are ignored.
    ///
    /// # Errors
    ///
    /// [`Error::InsufficientAnchors`] when fewer than the configured minimum
    /// of usable anchors remain.
    pub fn solve(&self, anchors: &[AnchorObservation]) -> Result<TriangulationResult> {
        let usable: Vec<&AnchorObservation> = anchors.iter().filter(|a| a.is_usable()).collect();
        let required = self.required_anchors();
        if usable.len() < required {
            return Err(Error::InsufficientAnchors {
                available: usable.len(),
                required,
            });
        }

        let dims = if self.config.solve_3d { 3 } else { 2 };
        let n = usable.len();

        // Initial guess: confidence-weighted centroid
        let weight_sum: f64 = usable.iter().map(|a| a.confidence).sum();
        let mut x = usable.iter().fold(Array1::<f64>::zeros(3), |mut acc, a| {
            acc[0] += a.confidence * a.position.x;
            acc[1] += a.confidence * a.position.y;
            acc[2] += a.confidence * a.position.z;
            acc
        });
        x /= weight_sum;

        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..self.config.max_iterations {
            iterations = iter + 1;

            let mut j = Array2::<f64>::zeros((n, dims));
            let mut r = Array1::<f64>::zeros(n);
            let mut w = Array1::<f64>::zeros(n);

            for (i, anchor) in usable.iter().enumerate() {
                let diff = [
                    x[0] - anchor.position.x,
                    x[1] - anchor.position.y,
                    x[2] - anchor.position.z,
                ];
                let dist = diff[..dims].iter().map(|d| d * d).sum::<f64>().sqrt();
                if dist < MIN_ANCHOR_DISTANCE {
                    continue;
                }
                for k in 0..dims {
                    j[[i, k]] = diff[k] / dist;
                }
                r[i] = dist - anchor.range_m;
                w[i] = anchor.confidence;
            }

            // Normal equations: (Jᵀ W J) delta = -Jᵀ W r
            let jtw = &j.t() * &w;
            let mut normal = jtw.dot(&j);
            let rhs = -jtw.dot(&r);

            if self.config.solve_3d {
                let diag_avg = normal.diag().sum() / dims as f64;
                let lambda = (diag_avg * 1e-6).max(1e-10);
                for k in 0..dims {
                    normal[[k, k]] += lambda;
                }
            }

            let delta = match solve_spd(&normal, &rhs) {
                Some(delta) if delta.iter().all(|d| d.is_finite()) => delta,
                _ => {
                    tracing::debug!(
                        "Triangulation geometry singular at iteration {} with {} anchors",
                        iterations,
                        n
                    );
                    break;
                }
            };

            for k in 0..dims {
                x[k] += delta[k];
            }

            let step = delta.dot(&delta).sqrt();
            if step < self.config.convergence_threshold_m {
                converged = true;
                break;
            }
        }

        let position = Vector3::new(x[0], x[1], x[2]);

        let mut fit_error = 0.0;
        for anchor in &usable {
            let dist = if self.config.solve_3d {
                position.distance_to(&anchor.position)
            } else {
                position.distance_2d_to(&anchor.position)
            };
            fit_error += (dist - anchor.range_m).abs() * anchor.confidence;
        }
        fit_error /= weight_sum;

        let avg_confidence = weight_sum / n as f64;
        let router_factor = (n as f64 / 3.0).min(1.0);
        let fit_score = (-fit_error / 5.0).exp();
        let mut confidence =
            (0.6 * avg_confidence + 0.2 * router_factor + 0.2 * fit_score).clamp(0.0, 1.0);

        let status = if converged {
            TriangulationStatus::Converged
        } else {
            confidence *= 0.5;
            TriangulationStatus::NonConverged
        };

        let timestamp_ms = usable.iter().map(|a| a.timestamp_ms).max().unwrap_or(0);

        Ok(TriangulationResult {
            position,
            confidence,
            iterations,
            fit_error_m: fit_error,
            fit_score,
            anchor_count: n,
            status,
            timestamp_ms,
        })
    }
}
