//! wallsight node
//!
//! Runs the fusion engine from a YAML configuration:
//! - CLI argument parsing
//! - configuration loading and validation
//! - router registration
//! - optional replay of recorded readings and CSI frames
//! - periodic status logging until Ctrl+C
//!
//! # Usage
//!
//! ```bash
//! wallsight -c config/wallsight.yaml --replay capture.jsonl
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use wallsight_common::{init_logging, LogLevel};
use wallsight_fusion::FusionEngine;
use wallsight_node::{load_and_validate_node_config, load_replay, replay};

/// wallsight - multi-sensor fusion and through-wall positioning
#[derive(Parser, Debug)]
#[command(name = "wallsight")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the node configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config_file: PathBuf,

    /// JSON-lines file of recorded readings and CSI frames to replay
    #[arg(short = 'r', long = "replay", value_name = "FILE")]
    replay_file: Option<PathBuf>,

    /// Replay speed factor; 0 feeds records as fast as possible
    #[arg(long = "replay-speed", default_value_t = 1.0)]
    replay_speed: f64,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short = 'd', long = "duration", value_name = "SECONDS")]
    duration_s: Option<u64>,

    /// Log level, overrides the configuration file
    #[arg(short = 'l', long = "log-level")]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run_node(args).await {
        Ok(()) => {
            info!("wallsight exited successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            // Logging may not be up if the configuration failed to load
            init_logging(LogLevel::Info);
            error!("wallsight failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_node(args: Args) -> Result<()> {
    let config = load_and_validate_node_config(&args.config_file).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            args.config_file.display()
        )
    })?;
    init_logging(args.log_level.unwrap_or(config.log_level));

    info!("Configuration loaded from {}", args.config_file.display());
    info!(
        "Fusion: {} Hz, gate {:.1}, {} router(s) configured",
        config.fusion.update_rate_hz,
        config.fusion.outlier_threshold,
        config.routers.len()
    );

    let engine =
        Arc::new(FusionEngine::new(config.fusion.clone()).context("Failed to create fusion engine")?);
    for router in &config.routers {
        engine
            .register_router(
                router.id.clone(),
                router.position,
                router.frequency_ghz,
                router.tx_power_dbm,
            )
            .with_context(|| format!("Failed to register router {}", router.id))?;
    }

    let records = match &args.replay_file {
        Some(path) => {
            let records = load_replay(path)
                .with_context(|| format!("Failed to load replay from {}", path.display()))?;
            info!("Loaded {} replay records from {}", records.len(), path.display());
            records
        }
        None => Vec::new(),
    };

    engine.start().await.context("Failed to start fusion engine")?;

    let replay_task = (!records.is_empty()).then(|| {
        let engine = Arc::clone(&engine);
        let speed = args.replay_speed;
        tokio::spawn(async move { replay(&engine, &records, speed).await })
    });

    wait_for_shutdown(&engine, config.status_interval_ms, args.duration_s).await;

    if let Some(task) = replay_task {
        task.abort();
    }
    if let Err(e) = engine.stop().await {
        warn!("Fusion engine did not stop cleanly: {}", e);
    }
    log_status(&engine);
    Ok(())
}

/// Logs status periodically until Ctrl+C or the optional deadline.
async fn wait_for_shutdown(engine: &FusionEngine, status_interval_ms: u64, duration_s: Option<u64>) {
    let mut status = (status_interval_ms > 0).then(|| {
        let mut timer = interval(Duration::from_millis(status_interval_ms));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    });
    let deadline = async {
        match duration_s {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    info!("wallsight running, press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, initiating shutdown...");
                break;
            }
            _ = &mut deadline => {
                info!("Run duration elapsed, initiating shutdown...");
                break;
            }
            _ = async {
                match status.as_mut() {
                    Some(timer) => {
                        timer.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {
                log_status(engine);
            }
        }
    }
}

fn log_status(engine: &FusionEngine) {
    let snapshot = engine.fused_state();
    let stats = engine.stats();
    info!(
        "[{}] {} pos={} vel={} conf={:.3} age={:?}",
        engine.scheduler_state(),
        snapshot.tick,
        snapshot.position(),
        snapshot.velocity(),
        snapshot.confidence,
        snapshot.age()
    );
    info!(
        "accepted={} rejected={} unstable={} dropped={} stalls={} csi_frames={} fixes={}",
        stats.accepted,
        stats.rejected,
        stats.instabilities,
        stats.dropped,
        stats.stalls,
        stats.csi_frames,
        stats.triangulations
    );
    match engine.triangulation_result() {
        Ok(fix) => info!(
            "CSI fix {} from {} routers ({:?}, conf {:.2})",
            fix.position, fix.anchor_count, fix.status, fix.confidence
        ),
        Err(e) => info!("CSI fix unavailable: {}", e),
    }
}
