//! Sliding-window latency percentiles.
//!
//! Samples go into a fixed-size ring buffer. Percentiles are computed from a
//! sorted copy of the window, and the result is cached for `snapshot_ttl` so
//! that frequent readers do not re-sort on every call.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Percentiles over the current window, in microseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencySnapshot {
    /// Samples in the window.
    pub count: usize,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
}

impl LatencySnapshot {
    fn from_sorted(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let percentile = |p: f64| {
            let rank = ((p / 100.0) * samples.len() as f64).ceil() as usize;
            samples[rank.clamp(1, samples.len()) - 1]
        };
        Self {
            count: samples.len(),
            min: samples[0],
            max: samples[samples.len() - 1],
            mean: samples.iter().sum::<u64>() as f64 / samples.len() as f64,
            p50: percentile(50.0),
            p90: percentile(90.0),
            p99: percentile(99.0),
        }
    }
}

#[derive(Debug)]
struct Window {
    samples: Vec<u64>,
    next: usize,
}

/// Fixed-size ring buffer of latency samples.
#[derive(Debug)]
pub struct LatencyMonitor {
    capacity: usize,
    snapshot_ttl: Duration,
    window: Mutex<Window>,
    cached: Mutex<Option<(Instant, LatencySnapshot)>>,
    total: AtomicU64,
}

impl LatencyMonitor {
    /// Create a monitor keeping the last `capacity` samples.
    pub fn new(capacity: usize, snapshot_ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            snapshot_ttl,
            window: Mutex::new(Window {
                samples: Vec::with_capacity(capacity),
                next: 0,
            }),
            cached: Mutex::new(None),
            total: AtomicU64::new(0),
        }
    }

    /// Record one sample.
    pub fn record(&self, latency: Duration) {
        let micros = latency.as_micros().min(u64::MAX as u128) as u64;
        let mut window = self.window.lock();
        if window.samples.len() < self.capacity {
            window.samples.push(micros);
        } else {
            let slot = window.next;
            window.samples[slot] = micros;
        }
        window.next = (window.next + 1) % self.capacity;
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Samples ever recorded.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Percentiles of the window, recomputed at most once per `snapshot_ttl`.
    pub fn snapshot(&self) -> LatencySnapshot {
        let mut cached = self.cached.lock();
        if let Some((at, snapshot)) = cached.as_ref() {
            if at.elapsed() < self.snapshot_ttl {
                return snapshot.clone();
            }
        }
        let snapshot = self.compute();
        *cached = Some((Instant::now(), snapshot.clone()));
        snapshot
    }

    /// Drop the cached snapshot.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    fn compute(&self) -> LatencySnapshot {
        let mut samples = self.window.lock().samples.clone();
        samples.sort_unstable();
        LatencySnapshot::from_sorted(&samples)
    }
}
