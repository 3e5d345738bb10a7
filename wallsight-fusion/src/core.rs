//! Per-tick fusion step
//!
//! [`FusionCore`] is the single writer of the filter. One call to
//! [`FusionCore::run_tick`] is one scheduler tick:
//!
//! 1. predict once over the real elapsed interval
//! 2. turn the drained readings into weighted observations
//! 3. group same-model, same-weight observations, gate each member, fuse the
//!    survivors in information form and correct once per group
//! 4. publish an immutable snapshot and the counters
//!
//! Groups are applied in the order of their first arrival.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::{Array1, Array2};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};
use wallsight_common::linalg::symmetrize;
use wallsight_common::{
    log_observation, Disposition, Error, FusionConfig, SensorReading, SensorWeights, TickClock,
    TickCounter, TickTiming, Vector3,
};

use crate::ekf::{
    ExtendedKalmanFilter, Innovation, MotionInput, Observation, ObservationModel, StateEstimate,
};
use crate::gate::OutlierGate;

/// Fusion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FusionStats {
    /// Executed ticks
    pub ticks: u64,
    /// Predict calls, exactly one per tick
    pub predicts: u64,
    /// Observations applied to the state
    pub accepted: u64,
    /// Observations rejected by the outlier gate
    pub rejected: u64,
    /// Observations skipped because the correction was numerically unstable
    pub instabilities: u64,
    /// Readings evicted from the full queue
    pub dropped: u64,
    /// Stalled ticks
    pub stalls: u64,
    /// Tick periods swallowed by stalls
    pub skipped_ticks: u64,
    /// Observations from sensors with weight 0
    pub disabled: u64,
    /// Readings refused as malformed
    pub invalid: u64,
    /// CSI frames processed
    pub csi_frames: u64,
    /// Triangulation fixes produced
    pub triangulations: u64,
    /// Triangulation attempts with too few anchors
    pub insufficient_anchors: u64,
}

/// State published at a tick boundary.
#[derive(Debug, Clone)]
pub struct FusedSnapshot {
    /// Tick that produced the snapshot (0 before the first tick)
    pub tick: TickCounter,
    /// Copy of the filter estimate
    pub estimate: StateEstimate,
    /// `1 / (1 + trace(P_pos) / 3)`
    pub confidence: f64,
    /// When the snapshot was taken
    pub captured_at: Instant,
    /// Filter corrections applied so far
    pub update_count: u64,
}

impl FusedSnapshot {
    /// Snapshot of a filter that has not ticked yet.
    pub fn initial(estimate: StateEstimate) -> Self {
        Self {
            tick: TickCounter::initial(),
            confidence: estimate.confidence(),
            estimate,
            captured_at: Instant::now(),
            update_count: 0,
        }
    }

    /// Time since the snapshot was taken
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Fused position
    pub fn position(&self) -> Vector3 {
        self.estimate.position()
    }

    /// Fused velocity
    pub fn velocity(&self) -> Vector3 {
        self.estimate.velocity()
    }

    /// Fused roll/pitch/yaw
    pub fn attitude(&self) -> Vector3 {
        self.estimate.attitude()
    }
}

/// Shared between the fusion task (writer) and readers.
#[derive(Debug)]
pub struct PublishedState {
    snapshot: RwLock<FusedSnapshot>,
    stats: Mutex<FusionStats>,
    motion: RwLock<Option<MotionInput>>,
}

impl PublishedState {
    /// Creates published state holding the prior.
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            snapshot: RwLock::new(FusedSnapshot::initial(StateEstimate::from_prior(&config.prior))),
            stats: Mutex::new(FusionStats::default()),
            motion: RwLock::new(None),
        }
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> FusedSnapshot {
        self.snapshot.read().clone()
    }

    /// Counters as of the last tick
    pub fn stats(&self) -> FusionStats {
        *self.stats.lock()
    }

    /// Updates the ingestion-side counters. Tick-side counters are owned by
    /// the core and overwritten at every publish.
    pub fn update_stats(&self, f: impl FnOnce(&mut FusionStats)) {
        f(&mut self.stats.lock());
    }

    /// IMU input for the next predicts
    pub fn set_motion_input(&self, input: Option<MotionInput>) {
        *self.motion.write() = input;
    }

    /// Current IMU input
    pub fn motion_input(&self) -> Option<MotionInput> {
        *self.motion.read()
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    /// Tick number
    pub tick: TickCounter,
    /// Interval applied by predict (s)
    pub dt: f64,
    /// Whether the tick stalled
    pub stalled: bool,
    /// Periods swallowed by the stall
    pub skipped: u64,
    /// Observations applied
    pub accepted: u64,
    /// Observations rejected by the gate
    pub rejected: u64,
    /// Observations skipped to keep the covariance valid
    pub unstable: u64,
    /// Observations from disabled sensors
    pub disabled: u64,
    /// Malformed readings
    pub invalid: u64,
}

/// Filter, gate and tick clock driven by the scheduler.
#[derive(Debug)]
pub struct FusionCore {
    ekf: ExtendedKalmanFilter,
    gate: OutlierGate,
    weights: SensorWeights,
    clock: TickClock,
    stats: FusionStats,
    published: Arc<PublishedState>,
}

impl FusionCore {
    /// Creates a core at the configured prior.
    pub fn new(config: &FusionConfig, published: Arc<PublishedState>) -> Self {
        Self {
            ekf: ExtendedKalmanFilter::from_config(config),
            gate: OutlierGate::new(config.outlier_threshold),
            weights: config.sensor_weights.clone(),
            clock: TickClock::new(config.tick_period(), config.stall_factor),
            stats: FusionStats::default(),
            published,
        }
    }

    /// Filter state
    pub fn filter(&self) -> &ExtendedKalmanFilter {
        &self.ekf
    }

    /// Outlier gate
    pub fn gate(&self) -> &OutlierGate {
        &self.gate
    }

    /// Counters kept by the core
    pub fn stats(&self) -> FusionStats {
        self.stats
    }

    /// Tick clock
    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Sets the instant the first tick's interval is measured from.
    pub fn start_clock(&mut self, now: Instant) {
        self.clock.start(now);
    }

    /// Runs a tick at `now`, measuring the interval since the previous one.
    pub fn tick_at(&mut self, now: Instant, readings: Vec<SensorReading>) -> TickReport {
        let timing = self.clock.advance(now);
        self.run_tick(&timing, readings)
    }

    /// Runs one tick with an explicit timing.
    pub fn run_tick(&mut self, timing: &TickTiming, readings: Vec<SensorReading>) -> TickReport {
        let mut report = TickReport {
            tick: timing.tick,
            stalled: timing.is_stalled(),
            skipped: timing.skipped,
            ..Default::default()
        };

        if let Some(stall) = timing.stall() {
            warn!("{} at {}", stall, timing.tick);
            self.stats.stalls += 1;
            self.stats.skipped_ticks += timing.skipped;
        }

        self.ekf.set_motion_input(self.published.motion_input());
        report.dt = self.ekf.predict(timing.dt_seconds());
        self.stats.predicts += 1;

        let observations = self.prepare(readings, &mut report);
        for group in group_observations(observations) {
            self.apply_group(group, &mut report);
        }

        self.stats.ticks += 1;
        self.stats.accepted += report.accepted;
        self.stats.rejected += report.rejected;
        self.stats.instabilities += report.unstable;
        self.stats.disabled += report.disabled;
        self.stats.invalid += report.invalid;
        self.publish(timing.tick, report.invalid);

        if report.accepted + report.rejected + report.unstable > 0 {
            debug!(
                "{}: dt={:.4}s accepted={} rejected={} unstable={}",
                report.tick, report.dt, report.accepted, report.rejected, report.unstable
            );
        }
        report
    }

    /// Returns the filter to its prior and restarts the tick count.
    pub fn reset(&mut self, config: &FusionConfig) {
        self.ekf.reset(&config.prior);
        self.clock.reset();
        self.publish(self.clock.current_tick(), 0);
    }

    fn prepare(&self, readings: Vec<SensorReading>, report: &mut TickReport) -> Vec<Observation> {
        let mut observations = Vec::with_capacity(readings.len());
        for reading in readings {
            let weight = self.weights.weight(reading.sensor_type);
            if weight <= 0.0 {
                report.disabled += 1;
                log_observation(
                    Disposition::Disabled,
                    reading.sensor_type,
                    &reading.source_id,
                    &format!("ts={}", reading.timestamp_ms),
                );
                continue;
            }
            match Observation::from_reading(&reading, weight) {
                Ok(obs) => observations.push(obs),
                Err(e) => {
                    report.invalid += 1;
                    warn!("Dropping queued reading: {}", e);
                }
            }
        }
        observations
    }

    fn apply_group(&mut self, group: Vec<Observation>, report: &mut TickReport) {
        let mut survivors: Vec<(Observation, Innovation, f64)> = Vec::with_capacity(group.len());

        for obs in group {
            let innovation = match self.ekf.innovation(&obs) {
                Ok(innovation) => innovation,
                Err(e) => {
                    report.unstable += 1;
                    warn!("{} from {}: {}", obs.sensor_type, obs.source_id, e);
                    continue;
                }
            };
            match self.gate.check(&innovation) {
                Ok(distance) => survivors.push((obs, innovation, distance)),
                Err(Error::OutlierRejected {
                    distance,
                    threshold,
                }) => {
                    report.rejected += 1;
                    log_observation(
                        Disposition::Rejected,
                        obs.sensor_type,
                        &obs.source_id,
                        &format!("ts={} d={distance:.3} > {threshold:.3}", obs.timestamp_ms),
                    );
                }
                Err(e) => {
                    report.unstable += 1;
                    warn!("{} from {}: {}", obs.sensor_type, obs.source_id, e);
                }
            }
        }

        if survivors.is_empty() {
            return;
        }

        let innovation = if survivors.len() == 1 {
            survivors[0].1.clone()
        } else {
            let model = survivors[0].1.model;
            let innovations: Vec<&Innovation> = survivors.iter().map(|(_, i, _)| i).collect();
            combine_innovations(model, &self.ekf.projected_covariance(model), &innovations)
        };

        let count = survivors.len() as u64;
        match self.ekf.correct(&innovation) {
            Ok(()) => {
                report.accepted += count;
                for (obs, _, distance) in &survivors {
                    log_observation(
                        Disposition::Accepted,
                        obs.sensor_type,
                        &obs.source_id,
                        &format!("ts={} d={distance:.3} group={count}", obs.timestamp_ms),
                    );
                }
            }
            Err(e) => {
                report.unstable += count;
                warn!("Correction skipped for {} observation(s): {}", count, e);
                for (obs, _, _) in &survivors {
                    log_observation(
                        Disposition::Unstable,
                        obs.sensor_type,
                        &obs.source_id,
                        &format!("ts={}", obs.timestamp_ms),
                    );
                }
            }
        }
    }

    /// `invalid` is added to the shared count, which also holds readings
    /// refused at ingestion.
    fn publish(&self, tick: TickCounter, invalid: u64) {
        let estimate = self.ekf.snapshot();
        let snapshot = FusedSnapshot {
            tick,
            confidence: estimate.confidence(),
            estimate,
            captured_at: Instant::now(),
            update_count: self.ekf.update_count(),
        };
        *self.published.snapshot.write() = snapshot;

        let mut stats = self.published.stats.lock();
        *stats = FusionStats {
            csi_frames: stats.csi_frames,
            triangulations: stats.triangulations,
            insufficient_anchors: stats.insufficient_anchors,
            dropped: stats.dropped,
            invalid: stats.invalid + invalid,
            ..self.stats
        };
    }
}

/// Groups observations by (model, weight), ordered by first arrival.
fn group_observations(observations: Vec<Observation>) -> Vec<Vec<Observation>> {
    let mut groups: Vec<((ObservationModel, u64), Vec<Observation>)> = Vec::new();
    for obs in observations {
        let key = (obs.model, obs.weight.to_bits());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(obs),
            None => groups.push((key, vec![obs])),
        }
    }
    groups.into_iter().map(|(_, members)| members).collect()
}

/// Fuses innovations of one model in information form.
///
/// ```text
/// R_c = (Σ R_i⁻¹)⁻¹
/// y_c = R_c Σ R_i⁻¹ y_i
/// S_c = H P Hᵀ + R_c
/// ```
///
/// All `R_i` are diagonal, so the sums are element-wise.
fn combine_innovations(
    model: ObservationModel,
    projected: &Array2<f64>,
    innovations: &[&Innovation],
) -> Innovation {
    let dim = model.dim();
    let mut information = Array1::<f64>::zeros(dim);
    let mut weighted_residual = Array1::<f64>::zeros(dim);
    for innovation in innovations {
        information += &innovation.measurement_noise.mapv(|r| 1.0 / r);
        weighted_residual += &(&innovation.residual / &innovation.measurement_noise);
    }

    let noise = information.mapv(|i| 1.0 / i);
    let mut residual = &noise * &weighted_residual;
    model.wrap_residual(&mut residual);

    let mut covariance = projected + &Array2::from_diag(&noise);
    symmetrize(&mut covariance);

    Innovation {
        model,
        residual,
        covariance,
        measurement_noise: noise,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallsight_common::{PriorConfig, SensorType};

    fn config() -> FusionConfig {
        let mut config = FusionConfig::default();
        config.sensor_weights.set(SensorType::Gps, 1.0);
        config
    }

    fn core_with(config: &FusionConfig) -> FusionCore {
        FusionCore::new(config, Arc::new(PublishedState::new(config)))
    }

    fn zero_dt(tick: u64) -> TickTiming {
        TickTiming {
            tick: TickCounter::new(tick),
            elapsed: Duration::ZERO,
            skipped: 0,
            overrun: Duration::ZERO,
        }
    }

    fn gps(x: f64, y: f64, sigma: f64, ts: u64) -> SensorReading {
        SensorReading::position(SensorType::Gps, "gps0", ts, Vector3::new(x, y, 0.0), sigma)
    }

    #[test]
    fn test_outlier_leaves_state_untouched() {
        let mut config = config();
        config.prior = PriorConfig {
            position_sigma: 1.0,
            ..Default::default()
        };
        let mut core = core_with(&config);
        let before = core.filter().snapshot();

        // S = 2I, |y|^2 = 50 -> d = 5
        let report = core.run_tick(&zero_dt(1), vec![gps(5.0, 5.0, 1.0, 1)]);

        assert_eq!(report.rejected, 1);
        assert_eq!(report.accepted, 0);
        assert_eq!(core.filter().snapshot(), before);
        assert_eq!(core.filter().update_count(), 0);
        assert_eq!(core.stats().rejected, 1);
    }

    #[test]
    fn test_inlier_is_applied() {
        let mut config = config();
        config.prior.position_sigma = 1.0;
        let mut core = core_with(&config);

        let report = core.run_tick(&zero_dt(1), vec![gps(1.0, 1.0, 1.0, 1)]);
        assert_eq!(report.accepted, 1);
        // Equal prior and measurement variance: halfway
        assert!((core.filter().position().x - 0.5).abs() < 1e-12);
        assert_eq!(core.filter().update_count(), 1);
    }

    #[test]
    fn test_dead_reckoning_between_ticks() {
        let mut config = config();
        config.prior.velocity = Vector3::new(2.0, 0.0, 0.0);
        let published = Arc::new(PublishedState::new(&config));
        let mut core = FusionCore::new(&config, Arc::clone(&published));

        let t0 = Instant::now();
        core.start_clock(t0);
        let report = core.tick_at(t0 + Duration::from_millis(10), Vec::new());
        assert!(!report.stalled);
        assert!((report.dt - 0.01).abs() < 1e-12);

        let snapshot = published.snapshot();
        assert_eq!(snapshot.tick.value(), 1);
        assert!((snapshot.position().x - 0.02).abs() < 1e-12);
        assert!(snapshot.confidence > 0.0 && snapshot.confidence <= 1.0);
    }

    #[test]
    fn test_stall_predicts_once_over_gap() {
        let mut config = config();
        config.prior.velocity = Vector3::new(1.0, 0.0, 0.0);
        let published = Arc::new(PublishedState::new(&config));
        let mut core = FusionCore::new(&config, Arc::clone(&published));

        let t0 = Instant::now();
        core.start_clock(t0);
        core.tick_at(t0 + Duration::from_millis(10), Vec::new());
        let report = core.tick_at(t0 + Duration::from_millis(110), Vec::new());

        assert!(report.stalled);
        assert_eq!(report.skipped, 9);
        assert!((report.dt - 0.1).abs() < 1e-12);

        let stats = published.stats();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.predicts, 2);
        assert_eq!(stats.stalls, 1);
        assert_eq!(stats.skipped_ticks, 9);
        assert!((published.snapshot().position().x - 0.11).abs() < 1e-9);
    }

    #[test]
    fn test_same_tick_group_matches_single_combined_update() {
        let config = config();
        let mut core = core_with(&config);
        core.run_tick(
            &zero_dt(1),
            vec![gps(2.0, 0.0, 1.0, 1), {
                let mut r = gps(4.0, 0.0, 1.0, 1);
                r.source_id = "gps1".into();
                r
            }],
        );

        let mut reference = ExtendedKalmanFilter::from_config(&config);
        let combined = Observation::from_reading(&gps(3.0, 0.0, 0.5f64.sqrt(), 1), 1.0).unwrap();
        let innovation = reference.innovation(&combined).unwrap();
        reference.correct(&innovation).unwrap();

        let fused = core.filter().estimate();
        let expected = reference.estimate();
        for (a, b) in fused.state.iter().zip(expected.state.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
        for (a, b) in fused.covariance.iter().zip(expected.covariance.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
        // Two observations accepted, one correction
        assert_eq!(core.stats().accepted, 2);
        assert_eq!(core.filter().update_count(), 1);
    }

    #[test]
    fn test_group_members_are_gated_individually() {
        let mut config = config();
        config.prior.position_sigma = 1.0;
        let mut core = core_with(&config);

        let report = core.run_tick(
            &zero_dt(1),
            vec![gps(0.5, 0.0, 1.0, 1), gps(40.0, 40.0, 1.0, 2)],
        );
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 1);
        assert!((core.filter().position().x - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weight_disables_sensor() {
        let mut config = config();
        config.sensor_weights.set(SensorType::Radar, 0.0);
        let mut core = core_with(&config);
        let before = core.filter().snapshot();

        let radar =
            SensorReading::position(SensorType::Radar, "r0", 1, Vector3::new(1.0, 1.0, 0.0), 0.5);
        let report = core.run_tick(&zero_dt(1), vec![radar]);

        assert_eq!(report.disabled, 1);
        assert_eq!(report.accepted, 0);
        assert_eq!(core.filter().snapshot(), before);
    }

    #[test]
    fn test_different_weights_apply_separately() {
        let config = config();
        let mut core = core_with(&config);
        let lidar =
            SensorReading::position(SensorType::Lidar, "l0", 1, Vector3::new(1.0, 0.0, 0.0), 1.0);
        core.run_tick(&zero_dt(1), vec![gps(1.0, 0.0, 1.0, 1), lidar]);
        assert_eq!(core.filter().update_count(), 2);
    }

    #[test]
    fn test_motion_input_from_published_state() {
        let config = config();
        let published = Arc::new(PublishedState::new(&config));
        let mut core = FusionCore::new(&config, Arc::clone(&published));
        published.set_motion_input(Some(MotionInput {
            angular_rate: Vector3::new(0.0, 0.0, 0.5),
            acceleration: Vector3::default(),
        }));

        let t0 = Instant::now();
        core.start_clock(t0);
        core.tick_at(t0 + Duration::from_millis(100), Vec::new());
        assert!((published.snapshot().attitude().z - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_publish_keeps_ingestion_counters() {
        let config = config();
        let published = Arc::new(PublishedState::new(&config));
        let mut core = FusionCore::new(&config, Arc::clone(&published));
        published.update_stats(|s| {
            s.invalid += 2;
            s.csi_frames += 1;
        });

        let mut bad = gps(1.0, 0.0, 1.0, 1);
        bad.noise.pop();
        let report = core.run_tick(&zero_dt(1), vec![bad]);
        assert_eq!(report.invalid, 1);

        let stats = published.stats();
        assert_eq!(stats.invalid, 3);
        assert_eq!(stats.csi_frames, 1);
        assert_eq!(stats.ticks, 1);

        core.run_tick(&zero_dt(2), Vec::new());
        assert_eq!(published.stats().invalid, 3);
    }

    #[test]
    fn test_reset_publishes_prior() {
        let mut config = config();
        config.prior.velocity = Vector3::new(1.0, 0.0, 0.0);
        let published = Arc::new(PublishedState::new(&config));
        let mut core = FusionCore::new(&config, Arc::clone(&published));
        let t0 = Instant::now();
        core.start_clock(t0);
        core.tick_at(t0 + Duration::from_millis(10), vec![gps(0.1, 0.0, 1.0, 1)]);

        core.reset(&config);
        let snapshot = published.snapshot();
        assert!(snapshot.tick.is_initial());
        assert_eq!(snapshot.update_count, 0);
        assert_eq!(snapshot.position(), Vector3::default());
    }
}
