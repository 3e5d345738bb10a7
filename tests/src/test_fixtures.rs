//! Test fixtures and scenario helpers
//!
//! Synthetic CSI frames are built by running the ranging model backwards, so
//! a frame for "router r at range d" decodes to exactly d under the default
//! configuration.

use wallsight_common::{FusionConfig, RangingConfig, SensorReading, SensorType, Vector3};
use wallsight_csi::{CsiFrame, RangingModel, Router};
use wallsight_fusion::FusionEngine;

/// Carrier used by the test routers (GHz)
pub const TEST_FREQUENCY_GHZ: f64 = 2.4;

/// Transmit power used by the test routers (dBm)
pub const TEST_TX_POWER_DBM: f64 = 20.0;

/// Subcarriers per synthetic frame
pub const TEST_SUBCARRIERS: usize = 32;

/// Three routers around a 10 m x 10 m floor.
pub fn house_routers() -> Vec<Router> {
    vec![
        Router::new("r1", Vector3::new(0.0, 0.0, 0.0), TEST_FREQUENCY_GHZ, TEST_TX_POWER_DBM),
        Router::new("r2", Vector3::new(10.0, 0.0, 0.0), TEST_FREQUENCY_GHZ, TEST_TX_POWER_DBM),
        Router::new("r3", Vector3::new(5.0, 10.0, 0.0), TEST_FREQUENCY_GHZ, TEST_TX_POWER_DBM),
    ]
}

/// Engine with [`house_routers`] registered.
pub fn engine_with_routers(config: FusionConfig) -> FusionEngine {
    let engine = FusionEngine::new(config).expect("valid test configuration");
    for router in house_routers() {
        engine
            .register_router(router.id, router.position, router.frequency_ghz, router.tx_power_dbm)
            .expect("unique router ids");
    }
    engine
}

/// Flat-phase frame whose measured loss equals the free-space loss at
/// `range_m` plus `wall_loss_db`.
pub fn csi_frame_for_range(router: &Router, range_m: f64, wall_loss_db: f64, timestamp_ms: u64) -> CsiFrame {
    let model = RangingModel::new(RangingConfig::default());
    let loss = model.loss_for_range(range_m, router.frequency_ghz, 0.0) + wall_loss_db;
    let magnitude = 10f64.powf((router.tx_power_dbm - loss) / 20.0);
    CsiFrame::new(
        router.id.clone(),
        vec![magnitude; TEST_SUBCARRIERS],
        vec![0.25; TEST_SUBCARRIERS],
        timestamp_ms,
    )
}

/// One frame per router for a subject standing at `target` (planar ranges).
pub fn csi_frames_for_target(routers: &[Router], target: Vector3, timestamp_ms: u64) -> Vec<CsiFrame> {
    routers
        .iter()
        .enumerate()
        .map(|(i, router)| {
            let range = router.position.distance_2d_to(&target);
            csi_frame_for_range(router, range, 0.0, timestamp_ms + i as u64)
        })
        .collect()
}

/// GPS position reading.
pub fn gps_reading(position: Vector3, sigma: f64, timestamp_ms: u64) -> SensorReading {
    SensorReading::position(SensorType::Gps, "gps0", timestamp_ms, position, sigma)
}

/// INS velocity and attitude reading.
pub fn ins_reading(velocity: Vector3, yaw: f64, timestamp_ms: u64) -> SensorReading {
    SensorReading::ins("imu0", timestamp_ms, velocity, Vector3::new(0.0, 0.0, yaw), 0.1, 0.02)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallsight_csi::CsiFrameProcessor;

    #[test]
    fn test_frame_decodes_to_range() {
        let router = &house_routers()[0];
        let frame = csi_frame_for_range(router, 6.0, 0.0, 1);
        let obs = CsiFrameProcessor::new().process(&frame, router).unwrap();
        let range = RangingModel::default().range_for_loss(
            obs.measured_loss_db,
            router.frequency_ghz,
            obs.multipath_spread,
        );
        assert!((range - 6.0).abs() < 1e-6);
    }
}
