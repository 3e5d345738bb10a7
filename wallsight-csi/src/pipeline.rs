//! CSI pipeline
//!
//! Frame -> loss observation -> material + range -> triangulation -> WiFi CSI
//! position reading for the filter. Keeps the latest observation per router
//! and the last triangulation result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wallsight_common::{Error, FusionConfig, Result, SensorReading, SensorType};

use crate::frame::{CsiFrame, CsiFrameProcessor};
use crate::material::MaterialClassifier;
use crate::ranging::RangingModel;
use crate::registry::Router;
use crate::triangulation::{AnchorObservation, TriangulationConfig, TriangulationResult, Triangulator};

/// Source id carried by readings produced from triangulation.
pub const CSI_SOURCE_ID: &str = "csi-triangulation";

/// A planar fix says little about height.
const PLANAR_HEIGHT_SIGMA_SCALE: f64 = 10.0;

/// Floor on confidence when turning it into a noise sigma.
const MIN_READING_CONFIDENCE: f64 = 0.05;

/// What one router's latest frame says about the wall between it and the
/// subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughWallObservation {
    /// Router identifier
    pub router_id: String,
    /// Closest material label
    pub material: String,
    /// Transmit minus received power (dB)
    pub measured_loss_db: f64,
    /// Loss beyond 1 m free space (dB)
    pub excess_loss_db: f64,
    /// Inferred range to the subject (meters)
    pub range_m: f64,
    /// Phase variance across subcarriers
    pub multipath_spread: f64,
    /// Signal quality from the frame alone
    pub signal_confidence: f64,
    /// Material match quality
    pub material_confidence: f64,
    /// `signal_confidence * material_confidence`
    pub confidence: f64,
    /// Frame timestamp (ms since epoch)
    pub timestamp_ms: u64,
}

/// Result of feeding one CSI frame through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CsiIngestOutcome {
    /// Observation derived from the frame
    pub observation: ThroughWallObservation,
    /// Triangulation over the fresh per-router observations, if enough exist
    pub triangulation: Option<TriangulationResult>,
    /// Position reading for the filter, present with a triangulation
    pub reading: Option<SensorReading>,
}

#[derive(Debug, Clone)]
struct RouterEntry {
    observation: ThroughWallObservation,
    anchor: AnchorObservation,
}

/// Stateful CSI pipeline.
#[derive(Debug, Clone)]
pub struct CsiPipeline {
    processor: CsiFrameProcessor,
    classifier: MaterialClassifier,
    ranging: RangingModel,
    triangulator: Triangulator,
    observation_ttl_ms: u64,
    latest: BTreeMap<String, RouterEntry>,
    last_result: Option<TriangulationResult>,
    last_reading_ms: u64,
}

impl CsiPipeline {
    /// Builds the pipeline from fusion configuration.
    pub fn new(config: &FusionConfig) -> Result<Self> {
        Ok(Self {
            processor: CsiFrameProcessor::new(),
            classifier: MaterialClassifier::from_database(&config.material_database)?,
            ranging: RangingModel::new(config.ranging.clone()),
            triangulator: Triangulator::new(TriangulationConfig::from(config)),
            observation_ttl_ms: config.csi_observation_ttl_ms,
            latest: BTreeMap::new(),
            last_result: None,
            last_reading_ms: 0,
        })
    }

    /// Material classifier in use
    pub fn classifier(&self) -> &MaterialClassifier {
        &self.classifier
    }

    /// Ranging model in use
    pub fn ranging(&self) -> &RangingModel {
        &self.ranging
    }

    /// Processes a frame received from `router`.
    pub fn ingest(&mut self, frame: &CsiFrame, router: &Router) -> Result<CsiIngestOutcome> {
        let csi = self.processor.process(frame, router)?;
        let material = self
            .classifier
            .classify(csi.measured_loss_db, router.frequency_ghz);
        let range_m = self.ranging.range_for_loss(
            csi.measured_loss_db,
            router.frequency_ghz,
            csi.multipath_spread,
        );

        let observation = ThroughWallObservation {
            router_id: router.id.clone(),
            material: material.label.clone(),
            measured_loss_db: csi.measured_loss_db,
            excess_loss_db: material.excess_loss_db,
            range_m,
            multipath_spread: csi.multipath_spread,
            signal_confidence: csi.confidence,
            material_confidence: material.confidence,
            confidence: (csi.confidence * material.confidence).clamp(0.0, 1.0),
            timestamp_ms: csi.timestamp_ms,
        };
        tracing::debug!(
            "CSI {}: loss {:.1} dB, excess {:.1} dB ({}), range {:.2} m, spread {:.3}",
            router.id,
            observation.measured_loss_db,
            observation.excess_loss_db,
            observation.material,
            observation.range_m,
            observation.multipath_spread
        );

        // Anchors are weighted by signal quality only; material does not
        // feed the geometry.
        let anchor = AnchorObservation {
            router_id: router.id.clone(),
            position: router.position,
            range_m,
            confidence: csi.confidence,
            timestamp_ms: csi.timestamp_ms,
        };
        self.latest.insert(
            router.id.clone(),
            RouterEntry {
                observation: observation.clone(),
                anchor,
            },
        );

        let triangulation = self.retriangulate();
        let reading = triangulation.as_ref().map(|result| self.reading_for(result));

        Ok(CsiIngestOutcome {
            observation,
            triangulation,
            reading,
        })
    }

    /// Drops everything known about a router and re-solves without it.
    pub fn forget_router(&mut self, router_id: &str) {
        if self.latest.remove(router_id).is_some() {
            self.retriangulate();
        }
    }

    /// Latest observation per router, in router id order.
    pub fn through_wall_observations(&self) -> Vec<ThroughWallObservation> {
        self.latest.values().map(|e| e.observation.clone()).collect()
    }

    /// Latest observations whose confidence reaches `threshold`.
    pub fn confident_observations(&self, threshold: f64) -> Vec<ThroughWallObservation> {
        self.latest
            .values()
            .filter(|e| e.observation.confidence >= threshold)
            .map(|e| e.observation.clone())
            .collect()
    }

    /// Last triangulation result.
    ///
    /// # Errors
    ///
    /// [`Error::InsufficientAnchors`] if the fresh observations do not cover
    /// enough routers.
    pub fn triangulation_result(&self) -> Result<TriangulationResult> {
        match &self.last_result {
            Some(result) => Ok(result.clone()),
            None => Err(Error::InsufficientAnchors {
                available: self.fresh_anchors().len(),
                required: self.triangulator.required_anchors(),
            }),
        }
    }

    /// Anchors whose frames are within the TTL of the newest frame.
    fn fresh_anchors(&self) -> Vec<AnchorObservation> {
        let newest = self
            .latest
            .values()
            .map(|e| e.anchor.timestamp_ms)
            .max()
            .unwrap_or(0);
        self.latest
            .values()
            .filter(|e| e.anchor.timestamp_ms.saturating_add(self.observation_ttl_ms) >= newest)
            .map(|e| e.anchor.clone())
            .collect()
    }

    fn retriangulate(&mut self) -> Option<TriangulationResult> {
        match self.triangulator.solve(&self.fresh_anchors()) {
            Ok(result) => {
                tracing::debug!(
                    "Triangulated {} from {} routers ({:?}, confidence {:.2}, {} iterations)",
                    result.position,
                    result.anchor_count,
                    result.status,
                    result.confidence,
                    result.iterations
                );
                self.last_result = Some(result.clone());
                Some(result)
            }
            Err(err) => {
                tracing::trace!("No triangulation: {}", err);
                self.last_result = None;
                None
            }
        }
    }

    /// Turns a triangulation result into a WiFi CSI position reading.
    ///
    /// Noise grows with the fit error and shrinks with confidence. Reading
    /// timestamps never go backwards even if frames from different routers
    /// arrive out of order.
    fn reading_for(&mut self, result: &TriangulationResult) -> SensorReading {
        let sigma = (1.0 + result.fit_error_m) / result.confidence.max(MIN_READING_CONFIDENCE);
        let mut reading = SensorReading::position(
            SensorType::WifiCsi,
            CSI_SOURCE_ID,
            result.timestamp_ms.max(self.last_reading_ms),
            result.position,
            sigma,
        );
        if !self.triangulator.config().solve_3d {
            let z_sigma = sigma * PLANAR_HEIGHT_SIGMA_SCALE;
            reading.noise[2] = z_sigma * z_sigma;
        }
        self.last_reading_ms = reading.timestamp_ms;
        reading
    }
}
