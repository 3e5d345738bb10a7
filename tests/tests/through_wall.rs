//! Through-wall positioning tests
//!
//! CSI frames from registered routers become material labels, triangulation
//! fixes and, finally, WiFi CSI corrections of the fused state.

use std::time::Instant;

use integration_tests::{
    csi_frame_for_range, csi_frames_for_target, engine_with_routers, house_routers,
    init_test_logging, wait_for_condition, DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT,
    TEST_FREQUENCY_GHZ, TEST_TX_POWER_DBM,
};
use wallsight_common::{Error, FusionConfig, Vector3};
use wallsight_csi::{TriangulationStatus, CSI_SOURCE_ID};
use wallsight_fusion::FusionEngine;

#[test]
fn test_eight_db_excess_is_brick() {
    let engine = FusionEngine::new(FusionConfig::default()).unwrap();
    let router = engine
        .register_router("hall", Vector3::default(), TEST_FREQUENCY_GHZ, TEST_TX_POWER_DBM)
        .unwrap();

    let frame = csi_frame_for_range(&router, 1.0, 8.0, 10);
    let outcome = engine.ingest_csi_frame(&frame).unwrap();

    assert_eq!(outcome.observation.material, "brick");
    assert!((outcome.observation.excess_loss_db - 8.0).abs() < 1e-6);
    assert!(outcome.observation.confidence > 0.0 && outcome.observation.confidence <= 1.0);
    // Wall loss lengthens the inferred range
    assert!(outcome.observation.range_m > 1.0);
}

#[test]
fn test_three_routers_converge() {
    let engine = engine_with_routers(FusionConfig::default());
    let target = Vector3::new(5.0, 3.0, 0.0);

    for frame in csi_frames_for_target(&house_routers(), target, 100) {
        engine.ingest_csi_frame(&frame).unwrap();
    }

    let result = engine.triangulation_result().unwrap();
    assert_eq!(result.status, TriangulationStatus::Converged);
    assert!(result.iterations <= 6);
    assert!(result.position.distance_2d_to(&target) < 0.05);
    assert_eq!(result.anchor_count, 3);
    assert!(result.confidence > 0.0 && result.confidence <= 1.0);
}

#[test]
fn test_single_router_is_insufficient() {
    let engine = engine_with_routers(FusionConfig::default());
    let router = &house_routers()[0];
    engine
        .ingest_csi_frame(&csi_frame_for_range(router, 4.0, 0.0, 1))
        .unwrap();

    match engine.triangulation_result() {
        Err(Error::InsufficientAnchors {
            available,
            required,
        }) => {
            assert_eq!(available, 1);
            assert_eq!(required, 2);
        }
        other => panic!("expected InsufficientAnchors, got {other:?}"),
    }
    assert_eq!(engine.stats().insufficient_anchors, 1);
}

#[test]
fn test_unknown_router_and_bad_frame() {
    let engine = engine_with_routers(FusionConfig::default());
    let mut frame = csi_frame_for_range(&house_routers()[0], 3.0, 0.0, 1);

    frame.router_id = "attic".into();
    assert!(matches!(
        engine.ingest_csi_frame(&frame),
        Err(Error::RouterNotFound(_))
    ));

    frame.router_id = "r1".into();
    frame.phases.pop();
    assert!(matches!(
        engine.ingest_csi_frame(&frame),
        Err(Error::InvalidFrame(_))
    ));
    assert!(engine.through_wall_observations().is_empty());
}

#[test]
fn test_confident_observations_respect_threshold() {
    let config = FusionConfig {
        confidence_threshold: 0.0,
        ..Default::default()
    };
    let engine = engine_with_routers(config);
    for frame in csi_frames_for_target(&house_routers(), Vector3::new(2.0, 2.0, 0.0), 5) {
        engine.ingest_csi_frame(&frame).unwrap();
    }
    assert_eq!(engine.through_wall_observations().len(), 3);
    assert_eq!(engine.confident_through_wall_observations().len(), 3);
}

#[test]
fn test_removed_router_stops_contributing() {
    let engine = engine_with_routers(FusionConfig::default());
    let routers = house_routers();
    for frame in csi_frames_for_target(&routers[..2], Vector3::new(5.0, 3.0, 0.0), 1) {
        engine.ingest_csi_frame(&frame).unwrap();
    }
    assert!(engine.triangulation_result().is_ok());

    engine.remove_router("r2").unwrap();
    assert!(engine.triangulation_result().is_err());
    assert_eq!(engine.list_routers().len(), 2);
    assert_eq!(engine.through_wall_observations().len(), 1);
}

#[tokio::test]
async fn test_csi_fix_corrects_filter() {
    let config = FusionConfig {
        min_routers: 3,
        ..Default::default()
    };
    let engine = engine_with_routers(config);
    let target = Vector3::new(5.0, 3.0, 0.0);

    let mut readings = Vec::new();
    for frame in csi_frames_for_target(&house_routers(), target, 100) {
        let outcome = engine.ingest_csi_frame(&frame).unwrap();
        readings.extend(outcome.reading);
    }
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].source_id, CSI_SOURCE_ID);

    let report = engine.step_at(Instant::now()).await.unwrap();
    assert_eq!(report.accepted, 1);
    assert!(engine.fused_state().position().distance_2d_to(&target) < 0.2);
}

#[tokio::test]
async fn test_running_engine_tracks_csi_subject() {
    init_test_logging();
    let config = FusionConfig {
        min_routers: 3,
        ..Default::default()
    };
    let engine = engine_with_routers(config);
    let target = Vector3::new(6.0, 4.0, 0.0);
    engine.start().await.unwrap();

    for round in 0..5u64 {
        for frame in csi_frames_for_target(&house_routers(), target, 1000 + round * 50) {
            engine.ingest_csi_frame(&frame).unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    wait_for_condition(
        || async {
            engine.pending_readings() == 0
                && engine.fused_state().position().distance_2d_to(&target) < 0.5
        },
        DEFAULT_TEST_TIMEOUT,
        DEFAULT_POLL_INTERVAL,
    )
    .await
    .unwrap();
    engine.stop().await.unwrap();

    let stats = engine.stats();
    assert_eq!(stats.csi_frames, 15);
    // The first round needs all three routers before the first fix
    assert_eq!(stats.triangulations, 13);
    assert_eq!(stats.insufficient_anchors, 2);
    assert!(stats.accepted >= 1);
}
