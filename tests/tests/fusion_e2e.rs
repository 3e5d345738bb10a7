//! End-to-end fusion tests
//!
//! Readings enter through the engine, pass the queue and the gate, and come
//! out as fused snapshots.

use std::time::{Duration, Instant};

use integration_tests::{
    assert_close, gps_reading, init_test_logging, ins_reading, wait_for_condition,
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT,
};
use wallsight_common::{Error, FusionConfig, SensorReading, SensorType, Vector3};
use wallsight_fusion::{FusionEngine, MotionInput, SchedulerState};

fn tight_prior_config() -> FusionConfig {
    let mut config = FusionConfig::default();
    config.prior.position_sigma = 1.0;
    config.sensor_weights.set(SensorType::Gps, 1.0);
    config
}

#[tokio::test]
async fn test_running_engine_converges_on_gps() {
    init_test_logging();
    let engine = FusionEngine::new(FusionConfig::default()).unwrap();
    let target = Vector3::new(3.0, 4.0, 0.0);

    engine.start().await.unwrap();
    assert_eq!(engine.scheduler_state(), SchedulerState::Running);

    for ts in 0..20u64 {
        engine.ingest_reading(gps_reading(target, 0.5, ts * 10)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    wait_for_condition(
        || async {
            engine.pending_readings() == 0
                && engine.fused_state().position().distance_to(&target) < 0.3
        },
        DEFAULT_TEST_TIMEOUT,
        DEFAULT_POLL_INTERVAL,
    )
    .await
    .unwrap();

    engine.stop().await.unwrap();
    assert_eq!(engine.scheduler_state(), SchedulerState::Stopped);

    let stats = engine.stats();
    assert_eq!(stats.accepted, 20);
    assert_eq!(stats.rejected, 0);
    assert_eq!(stats.ticks, stats.predicts);
    assert!(engine.fused_state().age() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_outlier_never_touches_state() {
    let engine = FusionEngine::new(tight_prior_config()).unwrap();
    let t0 = Instant::now();
    engine.step_at(t0).await.unwrap();
    let before = engine.fused_state();

    // Innovation of about 7.07 m against S of about 2 m^2: d close to 5
    engine
        .ingest_reading(gps_reading(Vector3::new(5.0, 5.0, 0.0), 1.0, 1))
        .unwrap();
    let report = engine.step_at(t0).await.unwrap();

    assert_eq!(report.rejected, 1);
    assert_eq!(report.accepted, 0);
    let after = engine.fused_state();
    assert_eq!(after.estimate.state, before.estimate.state);
    assert_eq!(after.estimate.covariance, before.estimate.covariance);
    assert_eq!(after.update_count, 0);
    assert_eq!(engine.stats().rejected, 1);
}

#[tokio::test]
async fn test_stall_predicts_once() {
    let mut config = FusionConfig::default();
    config.prior.velocity = Vector3::new(1.0, 0.0, 0.0);
    let engine = FusionEngine::new(config).unwrap();

    let t0 = Instant::now();
    engine.step_at(t0).await.unwrap();
    let x0 = engine.fused_state().position().x;

    let report = engine.step_at(t0 + Duration::from_millis(500)).await.unwrap();
    assert!(report.stalled);
    assert_eq!(report.skipped, 49);
    assert_close(report.dt, 0.5, 1e-12);
    assert_close(engine.fused_state().position().x - x0, 0.5, 1e-9);

    let stats = engine.stats();
    assert_eq!(stats.ticks, 2);
    assert_eq!(stats.predicts, 2);
    assert_eq!(stats.stalls, 1);
}

#[tokio::test]
async fn test_ins_sets_velocity_and_yaw() {
    let engine = FusionEngine::new(FusionConfig::default()).unwrap();
    let t0 = Instant::now();
    let velocity = Vector3::new(1.5, -0.5, 0.0);

    for step in 0..20u64 {
        engine.ingest_reading(ins_reading(velocity, 0.8, step)).unwrap();
        engine
            .step_at(t0 + Duration::from_millis(10 * step))
            .await
            .unwrap();
    }

    let snapshot = engine.fused_state();
    assert!(snapshot.velocity().distance_to(&velocity) < 0.05);
    assert_close(snapshot.attitude().z, 0.8, 0.02);
}

#[tokio::test]
async fn test_motion_input_integrates_yaw() {
    let engine = FusionEngine::new(FusionConfig::default()).unwrap();
    engine.set_motion_input(Some(MotionInput {
        angular_rate: Vector3::new(0.0, 0.0, 0.2),
        acceleration: Vector3::default(),
    }));

    let t0 = Instant::now();
    engine.step_at(t0).await.unwrap();
    let yaw0 = engine.fused_state().attitude().z;
    engine.step_at(t0 + Duration::from_millis(10)).await.unwrap();
    assert_close(engine.fused_state().attitude().z - yaw0, 0.002, 1e-12);
}

#[tokio::test]
async fn test_queue_overflow_drops_oldest() {
    let config = FusionConfig {
        queue_capacity: 4,
        ..Default::default()
    };
    let engine = FusionEngine::new(config).unwrap();
    for ts in 0..10u64 {
        engine
            .ingest_reading(gps_reading(Vector3::new(1.0, 1.0, 0.0), 1.0, ts))
            .unwrap();
    }
    assert_eq!(engine.pending_readings(), 4);
    assert_eq!(engine.stats().dropped, 6);

    let report = engine.step_at(Instant::now()).await.unwrap();
    assert_eq!(report.accepted, 4);
    assert_eq!(engine.pending_readings(), 0);
}

#[tokio::test]
async fn test_disabled_sensor_is_counted() {
    let mut config = FusionConfig::default();
    config.sensor_weights.set(SensorType::Visual, 0.0);
    let engine = FusionEngine::new(config).unwrap();

    let visual = SensorReading::position(SensorType::Visual, "cam0", 1, Vector3::new(2.0, 0.0, 0.0), 0.3);
    engine.ingest_reading(visual).unwrap();
    let report = engine.step_at(Instant::now()).await.unwrap();

    assert_eq!(report.disabled, 1);
    assert_eq!(engine.stats().disabled, 1);
    assert_eq!(engine.fused_state().update_count, 0);
}

#[tokio::test]
async fn test_confidence_stays_in_unit_interval() {
    let engine = FusionEngine::new(FusionConfig::default()).unwrap();
    let t0 = Instant::now();
    let mut last_confidence = engine.fused_state().confidence;
    assert!(last_confidence > 0.0 && last_confidence <= 1.0);

    for step in 1..=30u64 {
        engine
            .ingest_reading(gps_reading(Vector3::new(2.0, 2.0, 0.0), 0.5, step))
            .unwrap();
        engine
            .step_at(t0 + Duration::from_millis(10 * step))
            .await
            .unwrap();
        let confidence = engine.fused_state().confidence;
        assert!(confidence > 0.0 && confidence <= 1.0);
        last_confidence = confidence;
    }
    // Tight GPS beats the 30 m prior
    assert!(last_confidence > 0.5);
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let engine = FusionEngine::new(FusionConfig::default()).unwrap();
    engine.stop().await.unwrap();

    engine.start().await.unwrap();
    assert!(matches!(engine.start().await, Err(Error::Scheduler(_))));
    assert!(matches!(
        engine.step_at(Instant::now()).await,
        Err(Error::Scheduler(_))
    ));
    engine.stop().await.unwrap();
    engine.stop().await.unwrap();

    engine.reset().await.unwrap();
    assert!(engine.fused_state().tick.is_initial());
}

#[tokio::test]
async fn test_backwards_timestamp_refused() {
    let engine = FusionEngine::new(FusionConfig::default()).unwrap();
    engine
        .ingest_reading(gps_reading(Vector3::default(), 1.0, 50))
        .unwrap();
    let result = engine.ingest_reading(gps_reading(Vector3::default(), 1.0, 49));
    assert!(matches!(result, Err(Error::InvalidReading(_))));
    assert_eq!(engine.pending_readings(), 1);
}
