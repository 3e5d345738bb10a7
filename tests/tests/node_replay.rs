//! Node configuration and replay tests

use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use integration_tests::{csi_frames_for_target, gps_reading, house_routers};
use wallsight_common::{SensorType, Vector3};
use wallsight_fusion::FusionEngine;
use wallsight_node::{
    load_and_validate_node_config, load_replay, replay, validate_node_config, NodeConfig,
    ReplayRecord,
};

fn sample_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("config")
        .join("wallsight.yaml")
}

#[test]
fn test_sample_config_is_valid() {
    let config = load_and_validate_node_config(sample_config_path()).unwrap();
    assert_eq!(config.routers.len(), 3);
    assert_eq!(config.fusion.min_routers, 3);
    assert_eq!(config.fusion.sensor_weights.weight(SensorType::WifiCsi), 0.75);
    assert_eq!(config.fusion.material_database.get("brick"), Some(&8.0));

    // The loaded routers register cleanly
    let engine = FusionEngine::new(config.fusion.clone()).unwrap();
    for router in &config.routers {
        engine
            .register_router(
                router.id.clone(),
                router.position,
                router.frequency_ghz,
                router.tx_power_dbm,
            )
            .unwrap();
    }
    assert_eq!(engine.list_routers().len(), 3);
}

#[test]
fn test_default_node_config_validates() {
    assert!(validate_node_config(&NodeConfig::default()).is_ok());
}

#[tokio::test]
async fn test_replay_file_feeds_engine() {
    let routers = house_routers();
    let target = Vector3::new(4.0, 2.0, 0.0);

    let mut records = vec![ReplayRecord::Reading(gps_reading(target, 1.0, 0))];
    records.extend(
        csi_frames_for_target(&routers, target, 10)
            .into_iter()
            .map(ReplayRecord::Csi),
    );

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# synthetic capture").unwrap();
    for record in &records {
        writeln!(file, "{}", serde_json::to_string(record).unwrap()).unwrap();
    }
    file.flush().unwrap();

    let loaded = load_replay(file.path()).unwrap();
    assert_eq!(loaded.len(), records.len());
    let timestamps: Vec<Option<u64>> = loaded.iter().map(ReplayRecord::timestamp_ms).collect();
    assert_eq!(timestamps, vec![Some(0), Some(10), Some(11), Some(12)]);

    let engine = FusionEngine::new(Default::default()).unwrap();
    for router in &routers {
        engine
            .register_router(
                router.id.clone(),
                router.position,
                router.frequency_ghz,
                router.tx_power_dbm,
            )
            .unwrap();
    }

    let summary = replay(&engine, &loaded, 0.0).await;
    assert_eq!(summary.readings, 1);
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.refused, 0);

    engine.step_at(Instant::now()).await.unwrap();
    let snapshot = engine.fused_state();
    assert!(snapshot.update_count >= 1);
    assert!(snapshot.position().distance_2d_to(&target) < 1.0);
}
