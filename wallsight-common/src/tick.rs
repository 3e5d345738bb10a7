//! Fixed-rate tick bookkeeping for the fusion loop
//!
//! The clock does not sleep; the scheduler owns the timer. The clock turns
//! wall-clock instants into the elapsed interval the filter should predict
//! over and decides when a tick overran badly enough to count as a stall.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Tick counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TickCounter(u64);

impl TickCounter {
    /// Creates a new tick counter
    pub fn new(tick: u64) -> Self {
        Self(tick)
    }

    /// Creates the initial tick (tick 0)
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the tick value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Advances to the next tick
    pub fn next(&mut self) {
        self.0 += 1;
    }

    /// Returns true if no tick has executed yet
    pub fn is_initial(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TickCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tick({})", self.0)
    }
}

impl From<u64> for TickCounter {
    fn from(tick: u64) -> Self {
        Self::new(tick)
    }
}

/// Timing of one executed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTiming {
    /// Tick number, starting at 1 for the first executed tick
    pub tick: TickCounter,
    /// Real time since the previous tick (or since start)
    pub elapsed: Duration,
    /// Whole periods that were not executed because of a stall
    pub skipped: u64,
    /// Time beyond the nominal period
    pub overrun: Duration,
}

impl TickTiming {
    /// Returns true if the tick overran by more than the stall factor.
    pub fn is_stalled(&self) -> bool {
        self.skipped > 0
    }

    /// Returns the stall as an error value for logging, if this tick stalled.
    pub fn stall(&self) -> Option<Error> {
        self.is_stalled().then_some(Error::SchedulerStalled {
            overrun: self.overrun,
            skipped: self.skipped,
        })
    }

    /// Elapsed time in seconds, the interval handed to the filter's predict.
    pub fn dt_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Wall-clock tick bookkeeping.
#[derive(Debug, Clone)]
pub struct TickClock {
    period: Duration,
    stall_factor: f64,
    current_tick: TickCounter,
    last_tick_at: Option<Instant>,
    stalls: u64,
    skipped_total: u64,
}

impl TickClock {
    /// Creates a clock for the given nominal period.
    ///
    /// `stall_factor` is the number of periods a tick may take before it is
    /// treated as a stall; values below 1.0 are raised to 1.0.
    pub fn new(period: Duration, stall_factor: f64) -> Self {
        Self {
            period,
            stall_factor: stall_factor.max(1.0),
            current_tick: TickCounter::initial(),
            last_tick_at: None,
            stalls: 0,
            skipped_total: 0,
        }
    }

    /// Nominal tick period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Last executed tick
    pub fn current_tick(&self) -> TickCounter {
        self.current_tick
    }

    /// Number of stalled ticks so far
    pub fn stalls(&self) -> u64 {
        self.stalls
    }

    /// Number of periods skipped across all stalls
    pub fn skipped_total(&self) -> u64 {
        self.skipped_total
    }

    /// Marks the reference instant the first tick is measured from.
    pub fn start(&mut self, now: Instant) {
        self.last_tick_at = Some(now);
    }

    /// Records a tick executing at `now` and returns its timing.
    ///
    /// A stalled tick still yields a single interval covering the whole gap;
    /// the periods it swallowed are reported as skipped, never replayed.
    pub fn advance(&mut self, now: Instant) -> TickTiming {
        let elapsed = match self.last_tick_at {
            Some(last) => now.saturating_duration_since(last),
            None => self.period,
        };
        self.last_tick_at = Some(now);
        self.current_tick.next();

        let overrun = elapsed.saturating_sub(self.period);
        let period_s = self.period.as_secs_f64();
        let skipped = if period_s > 0.0 && elapsed.as_secs_f64() > period_s * self.stall_factor {
            ((elapsed.as_secs_f64() / period_s).floor() as u64).saturating_sub(1)
        } else {
            0
        };
        if skipped > 0 {
            self.stalls += 1;
            self.skipped_total += skipped;
        }

        TickTiming {
            tick: self.current_tick,
            elapsed,
            skipped,
            overrun,
        }
    }

    /// Resets to the initial state.
    pub fn reset(&mut self) {
        self.current_tick = TickCounter::initial();
        self.last_tick_at = None;
        self.stalls = 0;
        self.skipped_total = 0;
    }
}
