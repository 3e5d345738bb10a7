//! Integration test framework for wallsight
#![allow(missing_docs)]
//!
//! Fixtures and helpers shared by the end-to-end tests under `tests/`.
//!
//! # Components
//!
//! - [`test_fixtures`] - Router layouts, synthetic CSI frames, sensor readings
//! - [`test_utils`] - Logging setup, polling and numeric assertions
//!
//! # Test Categories
//!
//! 1. **Fusion** - readings through the engine into the fused state
//! 2. **Through-wall** - CSI frames to materials, fixes and filter updates
//! 3. **Node** - configuration files and replay

pub mod test_fixtures;
pub mod test_utils;

pub use test_fixtures::{
    csi_frame_for_range, csi_frames_for_target, engine_with_routers, gps_reading, house_routers,
    ins_reading, TEST_FREQUENCY_GHZ, TEST_SUBCARRIERS, TEST_TX_POWER_DBM,
};
pub use test_utils::{
    assert_close, init_test_logging, wait_for_condition, TestResult, DEFAULT_POLL_INTERVAL,
    DEFAULT_TEST_TIMEOUT,
};
