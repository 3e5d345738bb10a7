//! Fixed-rate fusion loop
//!
//! The scheduler moves the [`FusionCore`] into a tokio task for as long as it
//! runs and takes it back on stop, so the filter always has exactly one
//! writer. Shutdown is a `watch` signal checked between ticks; a tick in
//! progress always completes.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};
use wallsight_common::{Error, FusionConfig, Result};

use crate::core::{FusionCore, PublishedState, TickReport};
use crate::queue::ObservationQueue;

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    /// Not ticking
    #[default]
    Stopped,
    /// Ticking at the configured rate
    Running,
    /// Stop requested, waiting for the current tick to finish
    Stopping,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Stopped => write!(f, "Stopped"),
            SchedulerState::Running => write!(f, "Running"),
            SchedulerState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Drives [`FusionCore`] at `update_rate_hz`.
pub struct FusionScheduler {
    config: FusionConfig,
    state: Arc<RwLock<SchedulerState>>,
    core: Option<FusionCore>,
    queue: Arc<ObservationQueue>,
    published: Arc<PublishedState>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<FusionCore>>,
}

impl FusionScheduler {
    /// Creates a stopped scheduler.
    pub fn new(
        config: &FusionConfig,
        queue: Arc<ObservationQueue>,
        published: Arc<PublishedState>,
    ) -> Self {
        Self {
            config: config.clone(),
            state: Arc::new(RwLock::new(SchedulerState::Stopped)),
            core: Some(FusionCore::new(config, Arc::clone(&published))),
            queue,
            published,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SchedulerState {
        *self.state.read()
    }

    /// Shared handle to the lifecycle state, readable without the scheduler.
    pub fn state_handle(&self) -> Arc<RwLock<SchedulerState>> {
        Arc::clone(&self.state)
    }

    /// Nominal tick period
    pub fn period(&self) -> Duration {
        self.config.tick_period()
    }

    /// Spawns the fusion task. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Scheduler`] if the scheduler is not stopped.
    pub fn start(&mut self) -> Result<()> {
        let current = self.state();
        if current != SchedulerState::Stopped || self.handle.is_some() {
            return Err(Error::Scheduler(format!(
                "cannot start scheduler in state {current}"
            )));
        }
        let core = self
            .core
            .take()
            .ok_or_else(|| Error::Scheduler("fusion core unavailable".into()))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.state.write() = SchedulerState::Running;
        self.handle = Some(tokio::spawn(run_loop(
            core,
            Arc::clone(&self.queue),
            shutdown_rx,
            self.period(),
        )));
        self.shutdown_tx = Some(shutdown_tx);
        info!("Fusion scheduler started at {} Hz", self.config.update_rate_hz);
        Ok(())
    }

    /// Stops the fusion task after its current tick. Stopping a stopped
    /// scheduler is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::Scheduler`] if the task panicked; the filter is then rebuilt
    /// at its prior.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        *self.state.write() = SchedulerState::Stopping;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }

        let outcome = match handle.await {
            Ok(core) => {
                self.core = Some(core);
                Ok(())
            }
            Err(e) => {
                error!("Fusion task failed: {}", e);
                let mut core = FusionCore::new(&self.config, Arc::clone(&self.published));
                core.reset(&self.config);
                self.core = Some(core);
                Err(Error::Scheduler(format!("fusion task failed: {e}")))
            }
        };

        *self.state.write() = SchedulerState::Stopped;
        info!("Fusion scheduler stopped");
        outcome
    }

    /// Runs a single tick at `now` on a stopped scheduler.
    ///
    /// # Errors
    ///
    /// [`Error::Scheduler`] while the fusion task is running.
    pub fn step_at(&mut self, now: Instant) -> Result<TickReport> {
        let queue = Arc::clone(&self.queue);
        let core = self.stopped_core()?;
        Ok(core.tick_at(now, queue.drain()))
    }

    /// Returns the filter to its prior on a stopped scheduler.
    pub fn reset(&mut self) -> Result<()> {
        let config = self.config.clone();
        self.stopped_core()?.reset(&config);
        Ok(())
    }

    fn stopped_core(&mut self) -> Result<&mut FusionCore> {
        let current = *self.state.read();
        if current != SchedulerState::Stopped {
            return Err(Error::Scheduler(format!(
                "scheduler is {current}, stop it first"
            )));
        }
        self.core
            .as_mut()
            .ok_or_else(|| Error::Scheduler("fusion core unavailable".into()))
    }
}

impl Drop for FusionScheduler {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }
}

async fn run_loop(
    mut core: FusionCore,
    queue: Arc<ObservationQueue>,
    mut shutdown_rx: watch::Receiver<bool>,
    period: Duration,
) -> FusionCore {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; it only anchors the clock.
    ticker.tick().await;
    core.start_clock(Instant::now());

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let readings = queue.drain();
                core.tick_at(Instant::now(), readings);
            }
        }
    }

    info!("Fusion loop exiting at {}", core.clock().current_tick());
    core
}
