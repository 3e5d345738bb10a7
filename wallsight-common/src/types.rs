//! Core data types shared by the CSI and fusion crates

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// 3D position vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    /// X coordinate (meters)
    pub x: f64,
    /// Y coordinate (meters)
    pub y: f64,
    /// Z coordinate (meters)
    pub z: f64,
}

impl Vector3 {
    /// Creates a new Vector3
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Calculates Euclidean distance to another point
    pub fn distance_to(&self, other: &Vector3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Calculates distance to another point in the XY plane
    pub fn distance_2d_to(&self, other: &Vector3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Calculates magnitude
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Returns the components as an array `[x, y, z]`
    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Returns true if all components are finite
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f64; 3]> for Vector3 {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Sensor type tag.
///
/// The set is closed: every variant maps to exactly one observation model in
/// the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    /// Global Positioning System
    Gps,
    /// Inertial Navigation System
    Ins,
    /// Radio Detection and Ranging
    Radar,
    /// Light Detection and Ranging
    Lidar,
    /// Position derived from WiFi CSI triangulation
    #[serde(rename = "wifi", alias = "wificsi")]
    WifiCsi,
    /// Visual/camera-based tracking
    Visual,
    /// Infrared sensor
    Ir,
}

impl SensorType {
    /// All sensor types in declaration order.
    pub const ALL: [SensorType; 7] = [
        SensorType::Gps,
        SensorType::Ins,
        SensorType::Radar,
        SensorType::Lidar,
        SensorType::WifiCsi,
        SensorType::Visual,
        SensorType::Ir,
    ];

    /// Fixed measurement vector dimensionality for this sensor type.
    ///
    /// INS reports velocity and roll/pitch/yaw; everything else reports a
    /// position.
    pub fn measurement_dim(&self) -> usize {
        match self {
            SensorType::Ins => 6,
            _ => 3,
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorType::Gps => write!(f, "gps"),
            SensorType::Ins => write!(f, "ins"),
            SensorType::Radar => write!(f, "radar"),
            SensorType::Lidar => write!(f, "lidar"),
            SensorType::WifiCsi => write!(f, "wifi"),
            SensorType::Visual => write!(f, "visual"),
            SensorType::Ir => write!(f, "ir"),
        }
    }
}

impl FromStr for SensorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gps" => Ok(SensorType::Gps),
            "ins" => Ok(SensorType::Ins),
            "radar" => Ok(SensorType::Radar),
            "lidar" => Ok(SensorType::Lidar),
            "wifi" | "wificsi" | "wifi_csi" => Ok(SensorType::WifiCsi),
            "visual" => Ok(SensorType::Visual),
            "ir" => Ok(SensorType::Ir),
            _ => Err(format!("unknown sensor type: {s}")),
        }
    }
}

/// A single sensor measurement in canonical in-memory form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Sensor type tag
    pub sensor_type: SensorType,
    /// Timestamp (ms since epoch)
    pub timestamp_ms: u64,
    /// Measurement vector, length fixed by [`SensorType::measurement_dim`]
    pub measurement: Vec<f64>,
    /// Per-field noise variance (diagonal of the measurement covariance)
    pub noise: Vec<f64>,
    /// Identifier of the producing device or pipeline
    pub source_id: String,
}

impl SensorReading {
    /// Position reading with isotropic noise `sigma` (meters, 1-sigma) per axis.
    pub fn position(
        sensor_type: SensorType,
        source_id: impl Into<String>,
        timestamp_ms: u64,
        position: Vector3,
        sigma: f64,
    ) -> Self {
        let var = sigma * sigma;
        Self {
            sensor_type,
            timestamp_ms,
            measurement: position.to_array().to_vec(),
            noise: vec![var; 3],
            source_id: source_id.into(),
        }
    }

    /// INS reading carrying velocity (m/s) and roll/pitch/yaw (rad).
    pub fn ins(
        source_id: impl Into<String>,
        timestamp_ms: u64,
        velocity: Vector3,
        attitude: Vector3,
        velocity_sigma: f64,
        attitude_sigma: f64,
    ) -> Self {
        let vv = velocity_sigma * velocity_sigma;
        let av = attitude_sigma * attitude_sigma;
        Self {
            sensor_type: SensorType::Ins,
            timestamp_ms,
            measurement: vec![
                velocity.x, velocity.y, velocity.z, attitude.x, attitude.y, attitude.z,
            ],
            noise: vec![vv, vv, vv, av, av, av],
            source_id: source_id.into(),
        }
    }

    /// Checks dimensionality and finiteness.
    ///
    /// Timestamp ordering is a property of the stream and is checked at
    /// ingestion.
    pub fn validate(&self) -> Result<(), Error> {
        let dim = self.sensor_type.measurement_dim();
        if self.measurement.len() != dim {
            return Err(Error::InvalidReading(format!(
                "{} reading from {} has {} values, expected {}",
                self.sensor_type,
                self.source_id,
                self.measurement.len(),
                dim
            )));
        }
        if self.noise.len() != dim {
            return Err(Error::InvalidReading(format!(
                "{} reading from {} has {} noise terms, expected {}",
                self.sensor_type,
                self.source_id,
                self.noise.len(),
                dim
            )));
        }
        if self.measurement.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidReading(format!(
                "{} reading from {} contains non-finite values",
                self.sensor_type, self.source_id
            )));
        }
        if self.noise.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(Error::InvalidReading(format!(
                "{} reading from {} has non-positive or non-finite noise",
                self.sensor_type, self.source_id
            )));
        }
        Ok(())
    }
}
