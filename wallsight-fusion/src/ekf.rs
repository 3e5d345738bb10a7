//! 15-state Extended Kalman Filter
//!
//! State vector layout:
//!
//! ```text
//! [ 0.. 3]  position        (m)
//! [ 3.. 6]  velocity        (m/s)
//! [ 6.. 9]  roll/pitch/yaw  (rad, wrapped to (-π, π])
//! [ 9..12]  gyro bias       (rad/s)
//! [12..15]  accel bias      (m/s^2)
//! ```
//!
//! Process model: constant velocity, with attitude and velocity integrated
//! from an optional IMU motion input corrected by the bias states. Biases are
//! random walks.
//!
//! Correction is split in two steps so the outlier gate can inspect the
//! innovation before anything is mutated: [`ExtendedKalmanFilter::innovation`]
//! is read-only, [`ExtendedKalmanFilter::correct`] applies it.

use std::f64::consts::PI;

use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};
use wallsight_common::linalg::{invert_spd, is_positive_semidefinite, symmetrize};
use wallsight_common::{
    Error, FusionConfig, PriorConfig, ProcessNoiseConfig, Result, SensorReading, SensorType,
    Vector3,
};

/// State dimension
pub const STATE_DIM: usize = 15;

/// Offset of the position block
pub const POS: usize = 0;
/// Offset of the velocity block
pub const VEL: usize = 3;
/// Offset of the roll/pitch/yaw block
pub const ATT: usize = 6;
/// Offset of the gyroscope bias block
pub const GYRO_BIAS: usize = 9;
/// Offset of the accelerometer bias block
pub const ACCEL_BIAS: usize = 12;

/// Wraps an angle to (-π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// State mean and covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEstimate {
    /// 15-element state vector
    pub state: Array1<f64>,
    /// 15x15 covariance, symmetric positive semi-definite
    pub covariance: Array2<f64>,
}

impl StateEstimate {
    /// Builds the prior estimate with a diagonal covariance.
    pub fn from_prior(prior: &PriorConfig) -> Self {
        let mut state = Array1::<f64>::zeros(STATE_DIM);
        for (offset, v) in [
            (POS, prior.position),
            (VEL, prior.velocity),
            (ATT, prior.attitude),
        ] {
            state[offset] = v.x;
            state[offset + 1] = v.y;
            state[offset + 2] = v.z;
        }
        for i in 0..3 {
            state[ATT + i] = wrap_angle(state[ATT + i]);
        }

        let mut variances = Array1::<f64>::zeros(STATE_DIM);
        for (offset, sigma) in [
            (POS, prior.position_sigma),
            (VEL, prior.velocity_sigma),
            (ATT, prior.attitude_sigma),
            (GYRO_BIAS, prior.gyro_bias_sigma),
            (ACCEL_BIAS, prior.accel_bias_sigma),
        ] {
            variances.slice_mut(s![offset..offset + 3]).fill(sigma * sigma);
        }

        Self {
            state,
            covariance: Array2::from_diag(&variances),
        }
    }

    fn block(&self, offset: usize) -> Vector3 {
        Vector3::new(
            self.state[offset],
            self.state[offset + 1],
            self.state[offset + 2],
        )
    }

    /// Position estimate
    pub fn position(&self) -> Vector3 {
        self.block(POS)
    }

    /// Velocity estimate
    pub fn velocity(&self) -> Vector3 {
        self.block(VEL)
    }

    /// Roll/pitch/yaw estimate
    pub fn attitude(&self) -> Vector3 {
        self.block(ATT)
    }

    /// Gyroscope bias estimate
    pub fn gyro_bias(&self) -> Vector3 {
        self.block(GYRO_BIAS)
    }

    /// Accelerometer bias estimate
    pub fn accel_bias(&self) -> Vector3 {
        self.block(ACCEL_BIAS)
    }

    /// Trace of the position block of the covariance (m^2).
    pub fn position_variance_trace(&self) -> f64 {
        (0..3).map(|i| self.covariance[[POS + i, POS + i]]).sum()
    }

    /// Position uncertainty (square root of the position trace).
    pub fn position_uncertainty(&self) -> f64 {
        self.position_variance_trace().sqrt()
    }

    /// Scalar confidence `1 / (1 + trace(P_pos) / 3)`, in (0, 1].
    pub fn confidence(&self) -> f64 {
        1.0 / (1.0 + self.position_variance_trace().max(0.0) / 3.0)
    }
}

/// IMU control input for the prediction step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionInput {
    /// Body angular rate (rad/s)
    pub angular_rate: Vector3,
    /// Acceleration (m/s^2)
    pub acceleration: Vector3,
}

/// Observation models. Every sensor type maps to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObservationModel {
    /// Observes position directly
    Position,
    /// Observes velocity and roll/pitch/yaw (INS)
    VelocityAttitude,
}

impl ObservationModel {
    /// Model used for a sensor type
    pub fn for_sensor(sensor_type: SensorType) -> Self {
        match sensor_type {
            SensorType::Ins => ObservationModel::VelocityAttitude,
            SensorType::Gps
            | SensorType::Radar
            | SensorType::Lidar
            | SensorType::WifiCsi
            | SensorType::Visual
            | SensorType::Ir => ObservationModel::Position,
        }
    }

    /// Measurement dimension
    pub fn dim(&self) -> usize {
        match self {
            ObservationModel::Position => 3,
            ObservationModel::VelocityAttitude => 6,
        }
    }

    /// Observation matrix H (dim x 15). Both models are linear selections.
    pub fn jacobian(&self) -> Array2<f64> {
        let mut h = Array2::<f64>::zeros((self.dim(), STATE_DIM));
        match self {
            ObservationModel::Position => {
                for i in 0..3 {
                    h[[i, POS + i]] = 1.0;
                }
            }
            ObservationModel::VelocityAttitude => {
                for i in 0..3 {
                    h[[i, VEL + i]] = 1.0;
                    h[[3 + i, ATT + i]] = 1.0;
                }
            }
        }
        h
    }

    /// Wraps angular residual components.
    pub fn wrap_residual(&self, residual: &mut Array1<f64>) {
        if *self == ObservationModel::VelocityAttitude {
            for i in 3..6 {
                residual[i] = wrap_angle(residual[i]);
            }
        }
    }
}

/// A validated reading ready for the filter, noise already scaled by weight.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Sensor type
    pub sensor_type: SensorType,
    /// Producing device
    pub source_id: String,
    /// Reading timestamp (ms since epoch)
    pub timestamp_ms: u64,
    /// Observation model
    pub model: ObservationModel,
    /// Measurement vector z
    pub measurement: Array1<f64>,
    /// Diagonal of R / weight
    pub noise: Array1<f64>,
    /// Sensor weight that scaled the noise
    pub weight: f64,
}

impl Observation {
    /// Builds an observation from a reading and its sensor weight.
    ///
    /// The effective measurement variance is `noise / weight`, so a trusted
    /// sensor pulls harder. Weight must be positive; zero-weight sensors are
    /// filtered out before this point.
    pub fn from_reading(reading: &SensorReading, weight: f64) -> Result<Self> {
        reading.validate()?;
        if !weight.is_finite() || weight <= 0.0 {
            return Err(Error::InvalidReading(format!(
                "{} from {} has non-positive weight {}",
                reading.sensor_type, reading.source_id, weight
            )));
        }
        let noise = Array1::from_vec(reading.noise.clone()) / weight;
        Ok(Self {
            sensor_type: reading.sensor_type,
            source_id: reading.source_id.clone(),
            timestamp_ms: reading.timestamp_ms,
            model: ObservationModel::for_sensor(reading.sensor_type),
            measurement: Array1::from_vec(reading.measurement.clone()),
            noise,
            weight,
        })
    }
}

/// Innovation of an observation against the current estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct Innovation {
    /// Observation model
    pub model: ObservationModel,
    /// Residual y = z - Hx, angles wrapped
    pub residual: Array1<f64>,
    /// Innovation covariance S = H P Hᵀ + R
    pub covariance: Array2<f64>,
    /// Diagonal of R used to build S
    pub measurement_noise: Array1<f64>,
}

impl Innovation {
    /// Measurement dimension
    pub fn dim(&self) -> usize {
        self.residual.len()
    }
}

/// Extended Kalman Filter over the 15-element state.
#[derive(Debug, Clone)]
pub struct ExtendedKalmanFilter {
    estimate: StateEstimate,
    process_noise: ProcessNoiseConfig,
    max_predict_dt_s: f64,
    motion: Option<MotionInput>,
    update_count: u64,
}

impl ExtendedKalmanFilter {
    /// Creates a filter at the given prior.
    pub fn new(prior: &PriorConfig, process_noise: ProcessNoiseConfig, max_predict_dt_s: f64) -> Self {
        Self {
            estimate: StateEstimate::from_prior(prior),
            process_noise,
            max_predict_dt_s,
            motion: None,
            update_count: 0,
        }
    }

    /// Creates a filter from fusion configuration.
    pub fn from_config(config: &FusionConfig) -> Self {
        Self::new(
            &config.prior,
            config.process_noise.clone(),
            config.max_predict_dt_s,
        )
    }

    /// Returns to the given prior and clears the update count and motion input.
    pub fn reset(&mut self, prior: &PriorConfig) {
        self.estimate = StateEstimate::from_prior(prior);
        self.motion = None;
        self.update_count = 0;
    }

    /// Current estimate
    pub fn estimate(&self) -> &StateEstimate {
        &self.estimate
    }

    /// Copy of the current estimate
    pub fn snapshot(&self) -> StateEstimate {
        self.estimate.clone()
    }

    /// Position estimate
    pub fn position(&self) -> Vector3 {
        self.estimate.position()
    }

    /// Velocity estimate
    pub fn velocity(&self) -> Vector3 {
        self.estimate.velocity()
    }

    /// Attitude estimate
    pub fn attitude(&self) -> Vector3 {
        self.estimate.attitude()
    }

    /// Number of applied corrections
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Sets or clears the IMU input used by subsequent predicts.
    pub fn set_motion_input(&mut self, input: Option<MotionInput>) {
        self.motion = input;
    }

    /// Current IMU input
    pub fn motion_input(&self) -> Option<&MotionInput> {
        self.motion.as_ref()
    }

    /// Non-finite or non-positive intervals become 0; long ones are clamped.
    fn effective_dt(&self, dt: f64) -> f64 {
        if !dt.is_finite() || dt <= 0.0 {
            0.0
        } else {
            dt.min(self.max_predict_dt_s)
        }
    }

    /// State transition matrix F.
    ///
    /// ```text
    /// pos   += vel · dt
    /// att   -= b_g · dt   (with motion input)
    /// vel   -= b_a · dt   (with motion input)
    /// ```
    fn state_transition(&self, dt: f64) -> Array2<f64> {
        let mut f = Array2::<f64>::eye(STATE_DIM);
        for i in 0..3 {
            f[[POS + i, VEL + i]] = dt;
        }
        if self.motion.is_some() {
            for i in 0..3 {
                f[[ATT + i, GYRO_BIAS + i]] = -dt;
                f[[VEL + i, ACCEL_BIAS + i]] = -dt;
            }
        }
        f
    }

    /// Diagonal process noise Q · dt.
    fn process_noise_matrix(&self, dt: f64) -> Array2<f64> {
        let q = &self.process_noise;
        let mut diag = Array1::<f64>::zeros(STATE_DIM);
        for (offset, density) in [
            (POS, q.position),
            (VEL, q.velocity),
            (ATT, q.attitude),
            (GYRO_BIAS, q.gyro_bias),
            (ACCEL_BIAS, q.accel_bias),
        ] {
            diag.slice_mut(s![offset..offset + 3]).fill(density * dt);
        }
        Array2::from_diag(&diag)
    }

    /// Propagates state and covariance by `dt` seconds.
    ///
    /// Returns the interval actually applied.
    pub fn predict(&mut self, dt: f64) -> f64 {
        let dt = self.effective_dt(dt);
        if dt == 0.0 {
            return 0.0;
        }

        let f = self.state_transition(dt);
        let mut state = f.dot(&self.estimate.state);
        if let Some(input) = self.motion {
            let omega = input.angular_rate.to_array();
            let accel = input.acceleration.to_array();
            for i in 0..3 {
                state[ATT + i] += omega[i] * dt;
                state[VEL + i] += accel[i] * dt;
            }
        }
        for i in 0..3 {
            state[ATT + i] = wrap_angle(state[ATT + i]);
        }

        let mut covariance =
            f.dot(&self.estimate.covariance).dot(&f.t()) + self.process_noise_matrix(dt);
        symmetrize(&mut covariance);

        self.estimate.state = state;
        self.estimate.covariance = covariance;
        dt
    }

    /// State covariance projected into measurement space, H P Hᵀ.
    pub fn projected_covariance(&self, model: ObservationModel) -> Array2<f64> {
        let h = model.jacobian();
        h.dot(&self.estimate.covariance).dot(&h.t())
    }

    /// Computes the innovation of `observation` against the current estimate.
    ///
    /// Read-only: the filter is not modified.
    pub fn innovation(&self, observation: &Observation) -> Result<Innovation> {
        let model = observation.model;
        if observation.measurement.len() != model.dim() || observation.noise.len() != model.dim() {
            return Err(Error::InvalidReading(format!(
                "{} observation has dimension {}, model expects {}",
                observation.sensor_type,
                observation.measurement.len(),
                model.dim()
            )));
        }

        let h = model.jacobian();
        let mut residual = &observation.measurement - &h.dot(&self.estimate.state);
        model.wrap_residual(&mut residual);

        let mut covariance =
            self.projected_covariance(model) + Array2::from_diag(&observation.noise);
        symmetrize(&mut covariance);

        if residual.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
            return Err(Error::NumericalInstability(format!(
                "non-finite innovation for {} from {}",
                observation.sensor_type, observation.source_id
            )));
        }

        Ok(Innovation {
            model,
            residual,
            covariance,
            measurement_noise: observation.noise.clone(),
        })
    }

    /// Applies an innovation with a Joseph-form covariance update.
    ///
    /// # Errors
    ///
    /// [`Error::NumericalInstability`] if S cannot be inverted or the updated
    /// covariance fails the Cholesky PSD check. The estimate is left exactly
    /// as it was.
    pub fn correct(&mut self, innovation: &Innovation) -> Result<()> {
        let model = innovation.model;
        if innovation.dim() != model.dim() || innovation.measurement_noise.len() != model.dim() {
            return Err(Error::NumericalInstability(format!(
                "innovation dimension {} does not match model dimension {}",
                innovation.dim(),
                model.dim()
            )));
        }

        let s_inv = invert_spd(&innovation.covariance).ok_or_else(|| {
            Error::NumericalInstability("innovation covariance is not positive definite".into())
        })?;

        let h = model.jacobian();
        let p = &self.estimate.covariance;

        // K = P Hᵀ S⁻¹  (15 x m)
        let k = p.dot(&h.t()).dot(&s_inv);

        let mut state = &self.estimate.state + &k.dot(&innovation.residual);
        for i in 0..3 {
            state[ATT + i] = wrap_angle(state[ATT + i]);
        }

        // Joseph form: P = (I - K H) P (I - K H)ᵀ + K R Kᵀ
        let i_kh = Array2::<f64>::eye(STATE_DIM) - k.dot(&h);
        let r = Array2::from_diag(&innovation.measurement_noise);
        let mut covariance = i_kh.dot(p).dot(&i_kh.t()) + k.dot(&r).dot(&k.t());
        symmetrize(&mut covariance);

        if state.iter().any(|v| !v.is_finite()) {
            return Err(Error::NumericalInstability(
                "corrected state is not finite".into(),
            ));
        }
        if !is_positive_semidefinite(&covariance) {
            return Err(Error::NumericalInstability(
                "corrected covariance is not positive semi-definite".into(),
            ));
        }

        self.estimate.state = state;
        self.estimate.covariance = covariance;
        self.update_count += 1;
        Ok(())
    }
}
