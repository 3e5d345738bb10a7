//! Fusion engine facade
//!
//! Owns the router registry, the CSI pipeline, the observation queue and the
//! scheduler. Ingestion methods only validate and enqueue; the filter is
//! touched by the fusion task alone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use wallsight_common::{Error, FusionConfig, Result, SensorReading, SensorType, Vector3};
use wallsight_csi::{
    CsiFrame, CsiIngestOutcome, CsiPipeline, Router, RouterRegistry, ThroughWallObservation,
    TriangulationResult,
};

use crate::core::{FusedSnapshot, FusionStats, PublishedState, TickReport};
use crate::ekf::MotionInput;
use crate::queue::ObservationQueue;
use crate::scheduler::{FusionScheduler, SchedulerState};

/// Multi-sensor fusion and through-wall positioning engine.
pub struct FusionEngine {
    config: FusionConfig,
    registry: RwLock<RouterRegistry>,
    csi: Mutex<CsiPipeline>,
    queue: Arc<ObservationQueue>,
    published: Arc<PublishedState>,
    scheduler: tokio::sync::Mutex<FusionScheduler>,
    scheduler_state: Arc<RwLock<SchedulerState>>,
    stream_clock: Mutex<HashMap<(SensorType, String), u64>>,
}

impl FusionEngine {
    /// Creates a stopped engine.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the configuration does not validate.
    pub fn new(config: FusionConfig) -> Result<Self> {
        config.validate()?;
        let queue = Arc::new(ObservationQueue::new(config.queue_capacity));
        let published = Arc::new(PublishedState::new(&config));
        let scheduler = FusionScheduler::new(&config, Arc::clone(&queue), Arc::clone(&published));
        let scheduler_state = scheduler.state_handle();

        Ok(Self {
            csi: Mutex::new(CsiPipeline::new(&config)?),
            registry: RwLock::new(RouterRegistry::new()),
            queue,
            published,
            scheduler: tokio::sync::Mutex::new(scheduler),
            scheduler_state,
            stream_clock: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Registers a router as a triangulation anchor.
    pub fn register_router(
        &self,
        id: impl Into<String>,
        position: Vector3,
        frequency_ghz: f64,
        tx_power_dbm: f64,
    ) -> Result<Router> {
        self.registry
            .write()
            .register(Router::new(id, position, frequency_ghz, tx_power_dbm))
    }

    /// Registered routers in id order
    pub fn list_routers(&self) -> Vec<Router> {
        self.registry.read().list()
    }

    /// Removes a router and forgets its CSI observations.
    pub fn remove_router(&self, id: &str) -> Result<Router> {
        let router = self.registry.write().remove(id)?;
        self.csi.lock().forget_router(id);
        Ok(router)
    }

    /// Validates a reading and queues it for the next tick.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidReading`] for malformed readings and for timestamps
    /// that go backwards within a (sensor type, source) stream.
    pub fn ingest_reading(&self, reading: SensorReading) -> Result<()> {
        if let Err(e) = self.check_reading(&reading) {
            self.published.update_stats(|s| s.invalid += 1);
            debug!("Refusing reading: {}", e);
            return Err(e);
        }
        self.queue.push(reading);
        Ok(())
    }

    fn check_reading(&self, reading: &SensorReading) -> Result<()> {
        reading.validate()?;

        let mut clock = self.stream_clock.lock();
        let key = (reading.sensor_type, reading.source_id.clone());
        if let Some(&last) = clock.get(&key) {
            if reading.timestamp_ms < last {
                return Err(Error::InvalidReading(format!(
                    "{} from {}: timestamp {} precedes {}",
                    reading.sensor_type, reading.source_id, reading.timestamp_ms, last
                )));
            }
        }
        clock.insert(key, reading.timestamp_ms);
        Ok(())
    }

    /// Runs a CSI frame through the through-wall pipeline.
    ///
    /// A fresh triangulation fix is queued as a WiFi CSI position reading.
    ///
    /// # Errors
    ///
    /// [`Error::RouterNotFound`] for unknown routers, [`Error::InvalidFrame`]
    /// for malformed frames.
    pub fn ingest_csi_frame(&self, frame: &CsiFrame) -> Result<CsiIngestOutcome> {
        let router = self.registry.read().get(&frame.router_id)?.clone();
        let outcome = self.csi.lock().ingest(frame, &router)?;

        let fixed = outcome.triangulation.is_some();
        self.published.update_stats(|s| {
            s.csi_frames += 1;
            if fixed {
                s.triangulations += 1;
            } else {
                s.insufficient_anchors += 1;
            }
        });

        if let Some(reading) = &outcome.reading {
            if let Err(e) = self.ingest_reading(reading.clone()) {
                warn!("Triangulated reading not queued: {}", e);
            }
        }
        Ok(outcome)
    }

    /// Latest fused snapshot. Its `age()` tells how stale it is.
    pub fn fused_state(&self) -> FusedSnapshot {
        self.published.snapshot()
    }

    /// Last triangulation fix.
    pub fn triangulation_result(&self) -> Result<TriangulationResult> {
        self.csi.lock().triangulation_result()
    }

    /// Latest through-wall observation per router
    pub fn through_wall_observations(&self) -> Vec<ThroughWallObservation> {
        self.csi.lock().through_wall_observations()
    }

    /// Through-wall observations at or above `confidence_threshold`
    pub fn confident_through_wall_observations(&self) -> Vec<ThroughWallObservation> {
        self.csi
            .lock()
            .confident_observations(self.config.confidence_threshold)
    }

    /// Sets or clears the IMU input used by the prediction step.
    pub fn set_motion_input(&self, input: Option<MotionInput>) {
        self.published.set_motion_input(input);
    }

    /// Starts the fusion loop.
    pub async fn start(&self) -> Result<()> {
        self.scheduler.lock().await.start()?;
        info!(
            "Fusion engine running with {} router(s)",
            self.registry.read().len()
        );
        Ok(())
    }

    /// Stops the fusion loop; a no-op when already stopped.
    pub async fn stop(&self) -> Result<()> {
        self.scheduler.lock().await.stop().await
    }

    /// Runs one tick by hand on a stopped engine.
    pub async fn step_at(&self, now: Instant) -> Result<TickReport> {
        self.scheduler.lock().await.step_at(now)
    }

    /// Returns the filter to its prior on a stopped engine.
    pub async fn reset(&self) -> Result<()> {
        self.scheduler.lock().await.reset()?;
        self.stream_clock.lock().clear();
        Ok(())
    }

    /// Scheduler lifecycle state
    pub fn scheduler_state(&self) -> SchedulerState {
        *self.scheduler_state.read()
    }

    /// Engine counters
    pub fn stats(&self) -> FusionStats {
        FusionStats {
            dropped: self.queue.dropped(),
            ..self.published.stats()
        }
    }

    /// Readings waiting for the next tick
    pub fn pending_readings(&self) -> usize {
        self.queue.len()
    }
}
