//! Multi-sensor fusion for wallsight
//!
//! A 15-state Extended Kalman Filter fed by heterogeneous sensor readings and
//! by WiFi CSI triangulation fixes:
//!
//! ```text
//!  producers ──► FusionEngine ──► ObservationQueue ──► FusionScheduler
//!                    │                                      │ every tick
//!                    │ CSI frames                           ▼
//!                    └──► CsiPipeline ──► reading    FusionCore
//!                                                    predict ─► gate ─► correct
//!                                                           │
//!                                                           ▼
//!                                                    FusedSnapshot
//! ```
//!
//! The scheduler task is the only writer of the filter. Readers get
//! snapshots published at tick boundaries.

pub mod core;
pub mod ekf;
pub mod engine;
pub mod gate;
pub mod queue;
pub mod scheduler;

pub use crate::core::{FusedSnapshot, FusionCore, FusionStats, PublishedState, TickReport};
pub use ekf::{
    wrap_angle, ExtendedKalmanFilter, Innovation, MotionInput, Observation, ObservationModel,
    StateEstimate, STATE_DIM,
};
pub use engine::FusionEngine;
pub use gate::OutlierGate;
pub use queue::ObservationQueue;
pub use scheduler::{FusionScheduler, SchedulerState};
