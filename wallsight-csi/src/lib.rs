//! WiFi CSI through-wall positioning
//!
//! Turns channel state information captured from known routers into
//! position observations:
//!
//! ```text
//! CsiFrame ──► CsiFrameProcessor ──► loss + multipath spread
//!                                        │
//!                   ┌────────────────────┴───────────────┐
//!                   ▼                                    ▼
//!          MaterialClassifier                      RangingModel
//!          (wall material label)                   (range per router)
//!                                                        │
//!                                                        ▼
//!                                                  Triangulator
//!                                                        │
//!                                                        ▼
//!                                     WiFi CSI position SensorReading
//! ```
//!
//! The classifier and the triangulator do not feed each other: material is
//! reported alongside the fix, never subtracted from the range.

pub mod frame;
pub mod material;
pub mod pipeline;
pub mod ranging;
pub mod registry;
pub mod triangulation;

pub use frame::{CsiFrame, CsiFrameProcessor, CsiObservation};
pub use material::{MaterialClassifier, MaterialMatch, MaterialProfile};
pub use pipeline::{CsiIngestOutcome, CsiPipeline, ThroughWallObservation, CSI_SOURCE_ID};
pub use ranging::RangingModel;
pub use registry::{free_space_loss_db, Router, RouterRegistry};
pub use triangulation::{
    AnchorObservation, TriangulationConfig, TriangulationResult, TriangulationStatus, Triangulator,
};
