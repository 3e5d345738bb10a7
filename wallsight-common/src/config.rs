//! Configuration structures for the fusion engine
//!
//! All options carry documented defaults so a YAML file only needs to name
//! the values it changes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::{SensorType, Vector3};

/// Per-sensor trust weights in `[0, 1]`.
///
/// Higher weight shrinks the injected measurement noise and pulls the
/// estimate harder toward the observation. Weight 0 disables a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorWeights(BTreeMap<SensorType, f64>);

impl SensorWeights {
    /// Built-in weight for a sensor type.
    pub fn default_weight(sensor_type: SensorType) -> f64 {
        match sensor_type {
            SensorType::Gps => 0.95,
            SensorType::Ins => 0.85,
            SensorType::Radar => 0.80,
            SensorType::Lidar => 0.80,
            SensorType::WifiCsi => 0.75,
            SensorType::Visual => 0.70,
            SensorType::Ir => 0.65,
        }
    }

    /// Returns the weight for a sensor, falling back to the built-in value
    /// when the map does not name it.
    pub fn weight(&self, sensor_type: SensorType) -> f64 {
        self.0
            .get(&sensor_type)
            .copied()
            .unwrap_or_else(|| Self::default_weight(sensor_type))
    }

    /// Overrides the weight for one sensor type.
    pub fn set(&mut self, sensor_type: SensorType, weight: f64) {
        self.0.insert(sensor_type, weight);
    }

    /// Iterates over explicitly configured weights.
    pub fn iter(&self) -> impl Iterator<Item = (&SensorType, &f64)> {
        self.0.iter()
    }
}

impl Default for SensorWeights {
    fn default() -> Self {
        Self(
            SensorType::ALL
                .iter()
                .map(|t| (*t, Self::default_weight(*t)))
                .collect(),
        )
    }
}

/// Default material table: label -> nominal excess loss (dB).
pub fn default_material_database() -> BTreeMap<String, f64> {
    [
        ("glass", 2.0),
        ("drywall", 3.0),
        ("wood", 4.0),
        ("composite", 6.0),
        ("brick", 8.0),
        ("concrete", 12.0),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Log-distance path loss parameters used to turn measured loss into range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingConfig {
    /// Base path loss exponent (2.0 is free space)
    pub path_loss_exponent: f64,
    /// Upper bound on the extra exponent contributed by multipath
    pub max_multipath_exponent: f64,
    /// Phase variance that adds 1.0 to the exponent
    pub multipath_exponent_scale: f64,
    /// Lower clamp on inferred range (meters)
    pub min_range_m: f64,
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            path_loss_exponent: 2.0,
            max_multipath_exponent: 2.0,
            multipath_exponent_scale: 10.0,
            min_range_m: 0.5,
        }
    }
}

/// Process noise spectral densities, variance per second for each state block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessNoiseConfig {
    /// Position (m^2/s)
    pub position: f64,
    /// Velocity ((m/s)^2/s)
    pub velocity: f64,
    /// Attitude (rad^2/s)
    pub attitude: f64,
    /// Gyroscope bias random walk ((rad/s)^2/s)
    pub gyro_bias: f64,
    /// Accelerometer bias random walk ((m/s^2)^2/s)
    pub accel_bias: f64,
}

impl Default for ProcessNoiseConfig {
    fn default() -> Self {
        Self {
            position: 0.01,
            velocity: 0.1,
            attitude: 0.001,
            gyro_bias: 1e-6,
            accel_bias: 1e-5,
        }
    }
}

/// Prior state used when the filter is created or reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    /// Initial position (m)
    pub position: Vector3,
    /// Initial velocity (m/s)
    pub velocity: Vector3,
    /// Initial roll/pitch/yaw (rad)
    pub attitude: Vector3,
    /// 1-sigma position uncertainty (m)
    pub position_sigma: f64,
    /// 1-sigma velocity uncertainty (m/s)
    pub velocity_sigma: f64,
    /// 1-sigma attitude uncertainty (rad)
    pub attitude_sigma: f64,
    /// 1-sigma gyroscope bias uncertainty (rad/s)
    pub gyro_bias_sigma: f64,
    /// 1-sigma accelerometer bias uncertainty (m/s^2)
    pub accel_bias_sigma: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            position: Vector3::default(),
            velocity: Vector3::default(),
            attitude: Vector3::default(),
            position_sigma: 30.0,
            velocity_sigma: 5.0,
            attitude_sigma: 0.5,
            gyro_bias_sigma: 0.01,
            accel_bias_sigma: 0.1,
        }
    }
}

/// Fusion engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Scheduler tick rate (Hz)
    pub update_rate_hz: f64,
    /// Mahalanobis gate threshold
    pub outlier_threshold: f64,
    /// Sensor type -> weight in `[0, 1]`
    pub sensor_weights: SensorWeights,
    /// Minimum anchors for triangulation
    pub min_routers: usize,
    /// Triangulation iteration cap
    pub max_iterations: usize,
    /// Triangulation step size that counts as converged (m)
    pub convergence_threshold_m: f64,
    /// Material label -> nominal excess loss (dB)
    pub material_database: BTreeMap<String, f64>,
    /// Minimum confidence downstream consumers should trust
    pub confidence_threshold: f64,
    /// Observation queue capacity before the oldest entry is dropped
    pub queue_capacity: usize,
    /// Tick duration, in periods, beyond which a tick counts as stalled
    pub stall_factor: f64,
    /// Upper clamp on a single predict interval (s)
    pub max_predict_dt_s: f64,
    /// Solve triangulation in 3D instead of the XY plane
    pub triangulate_3d: bool,
    /// Age after which a router's CSI observation no longer contributes (ms)
    pub csi_observation_ttl_ms: u64,
    /// Loss to range model
    pub ranging: RangingConfig,
    /// EKF process noise
    pub process_noise: ProcessNoiseConfig,
    /// EKF prior
    pub prior: PriorConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            update_rate_hz: 100.0,
            outlier_threshold: 3.0,
            sensor_weights: SensorWeights::default(),
            min_routers: 2,
            max_iterations: 6,
            convergence_threshold_m: 0.01,
            material_database: default_material_database(),
            confidence_threshold: 0.5,
            queue_capacity: 1024,
            stall_factor: 2.0,
            max_predict_dt_s: 1.0,
            triangulate_3d: false,
            csi_observation_ttl_ms: 2000,
            ranging: RangingConfig::default(),
            process_noise: ProcessNoiseConfig::default(),
            prior: PriorConfig::default(),
        }
    }
}

impl FusionConfig {
    /// Nominal scheduler tick period.
    ///
    /// Falls back to 10 ms when `update_rate_hz` has no representable
    /// period; [`FusionConfig::validate`] refuses such rates.
    pub fn tick_period(&self) -> Duration {
        self.checked_tick_period()
            .unwrap_or(Duration::from_millis(10))
    }

    /// Tick period, or [`Error::Config`] when `update_rate_hz` is not
    /// positive or its period is zero or too long for a `Duration`.
    pub fn checked_tick_period(&self) -> Result<Duration, Error> {
        if !self.update_rate_hz.is_finite() || self.update_rate_hz <= 0.0 {
            return Err(Error::Config(format!(
                "update_rate_hz must be positive, got {}",
                self.update_rate_hz
            )));
        }
        match Duration::try_from_secs_f64(1.0 / self.update_rate_hz) {
            Ok(period) if !period.is_zero() => Ok(period),
            _ => Err(Error::Config(format!(
                "update_rate_hz {} has no usable tick period",
                self.update_rate_hz
            ))),
        }
    }

    /// Validates every option. Any error here is fatal at startup.
    pub fn validate(&self) -> Result<(), Error> {
        self.checked_tick_period()?;
        if !self.outlier_threshold.is_finite() || self.outlier_threshold <= 0.0 {
            return Err(Error::Config(format!(
                "outlier_threshold must be positive, got {}",
                self.outlier_threshold
            )));
        }
        for (sensor, weight) in self.sensor_weights.iter() {
            if !(0.0..=1.0).contains(weight) {
                return Err(Error::Config(format!(
                    "sensor weight for {sensor} must be within [0, 1], got {weight}"
                )));
            }
        }
        if self.min_routers < 2 {
            return Err(Error::Config(format!(
                "min_routers must be at least 2, got {}",
                self.min_routers
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::Config("max_iterations must be at least 1".to_string()));
        }
        if !self.convergence_threshold_m.is_finite() || self.convergence_threshold_m <= 0.0 {
            return Err(Error::Config(format!(
                "convergence_threshold_m must be positive, got {}",
                self.convergence_threshold_m
            )));
        }
        if self.material_database.is_empty() {
            return Err(Error::Config("material_database must not be empty".to_string()));
        }
        for (label, loss) in &self.material_database {
            if !loss.is_finite() || *loss <= 0.0 {
                return Err(Error::Config(format!(
                    "material {label} must have a positive loss, got {loss}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".to_string()));
        }
        if !self.stall_factor.is_finite() || self.stall_factor < 1.0 {
            return Err(Error::Config(format!(
                "stall_factor must be >= 1.0, got {}",
                self.stall_factor
            )));
        }
        if !self.max_predict_dt_s.is_finite() || self.max_predict_dt_s <= 0.0 {
            return Err(Error::Config(format!(
                "max_predict_dt_s must be positive, got {}",
                self.max_predict_dt_s
            )));
        }
        self.validate_ranging()?;
        self.validate_filter()?;
        Ok(())
    }

    fn validate_ranging(&self) -> Result<(), Error> {
        let r = &self.ranging;
        if !r.path_loss_exponent.is_finite() || r.path_loss_exponent <= 0.0 {
            return Err(Error::Config(format!(
                "ranging.path_loss_exponent must be positive, got {}",
                r.path_loss_exponent
            )));
        }
        if !r.max_multipath_exponent.is_finite() || r.max_multipath_exponent < 0.0 {
            return Err(Error::Config(
                "ranging.max_multipath_exponent must be non-negative".to_string(),
            ));
        }
        if !r.multipath_exponent_scale.is_finite() || r.multipath_exponent_scale <= 0.0 {
            return Err(Error::Config(
                "ranging.multipath_exponent_scale must be positive".to_string(),
            ));
        }
        if !r.min_range_m.is_finite() || r.min_range_m <= 0.0 {
            return Err(Error::Config("ranging.min_range_m must be positive".to_string()));
        }
        Ok(())
    }

    fn validate_filter(&self) -> Result<(), Error> {
        let q = &self.process_noise;
        let densities = [q.position, q.velocity, q.attitude, q.gyro_bias, q.accel_bias];
        if densities.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(Error::Config(
                "process_noise densities must be finite and non-negative".to_string(),
            ));
        }

        let p = &self.prior;
        if !(p.position.is_finite() && p.velocity.is_finite() && p.attitude.is_finite()) {
            return Err(Error::Config("prior mean must be finite".to_string()));
        }
        let sigmas = [
            p.position_sigma,
            p.velocity_sigma,
            p.attitude_sigma,
            p.gyro_bias_sigma,
            p.accel_bias_sigma,
        ];
        if sigmas.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(Error::Config("prior sigmas must be positive".to_string()));
        }
        Ok(())
    }

    /// Parses a fusion configuration from a YAML string.
    ///
    /// # Example
    /// ```
    /// use wallsight_common::FusionConfig;
    ///
    /// let yaml = r#"
    /// update_rate_hz: 50.0
    /// sensor_weights:
    ///   gps: 0.9
    /// "#;
    ///
    /// let config = FusionConfig::from_yaml(yaml).unwrap();
    /// assert_eq!(config.update_rate_hz, 50.0);
    /// assert_eq!(config.outlier_threshold, 3.0);
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Loads a fusion configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Serializes the configuration to a YAML string.
    pub fn to_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(self)?)
    }
}
