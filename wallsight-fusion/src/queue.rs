//! Bounded observation queue
//!
//! Producers push from any task; the fusion loop drains once per tick. When
//! full, the oldest reading is evicted so fresh data is never blocked.

use std::collections::VecDeque;

use parking_lot::Mutex;
use wallsight_common::{log_observation, Disposition, SensorReading};

#[derive(Debug, Default)]
struct QueueInner {
    readings: VecDeque<SensorReading>,
    pushed: u64,
    dropped: u64,
}

/// Multi-producer drop-oldest queue of sensor readings.
#[derive(Debug)]
pub struct ObservationQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

impl ObservationQueue {
    /// Creates a queue holding at most `capacity` readings (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                readings: VecDeque::with_capacity(capacity.min(4096)),
                ..Default::default()
            }),
            capacity,
        }
    }

    /// Enqueues a reading, returning the evicted reading if the queue was full.
    pub fn push(&self, reading: SensorReading) -> Option<SensorReading> {
        let mut inner = self.inner.lock();
        inner.pushed += 1;
        let evicted = if inner.readings.len() >= self.capacity {
            inner.dropped += 1;
            inner.readings.pop_front()
        } else {
            None
        };
        inner.readings.push_back(reading);
        drop(inner);

        if let Some(old) = &evicted {
            log_observation(
                Disposition::Dropped,
                old.sensor_type,
                &old.source_id,
                &format!("ts={} queue full ({})", old.timestamp_ms, self.capacity),
            );
        }
        evicted
    }

    /// Takes every queued reading in arrival order.
    pub fn drain(&self) -> Vec<SensorReading> {
        self.inner.lock().readings.drain(..).collect()
    }

    /// Number of queued readings
    pub fn len(&self) -> usize {
        self.inner.lock().readings.len()
    }

    /// Returns true if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.inner.lock().readings.is_empty()
    }

    /// Maximum number of queued readings
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Readings evicted so far
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Readings pushed so far, including evicted ones
    pub fn pushed(&self) -> u64 {
        self.inner.lock().pushed
    }
}
