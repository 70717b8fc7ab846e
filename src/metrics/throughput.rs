//! Per-second throughput over a sliding window.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    second: u64,
    count: u64,
}

/// Counts events in one-second buckets covering the last `window` seconds.
#[derive(Debug)]
pub struct ThroughputMonitor {
    started: Instant,
    buckets: Mutex<Vec<Bucket>>,
}

impl ThroughputMonitor {
    /// Create a monitor with one bucket per second of `window`.
    pub fn new(window: Duration) -> Self {
        let slots = window.as_secs().max(1) as usize;
        Self {
            started: Instant::now(),
            buckets: Mutex::new(vec![Bucket::default(); slots]),
        }
    }

    fn now(&self) -> u64 {
        // seconds are counted from 1 so the zeroed buckets never match
        self.started.elapsed().as_secs() + 1
    }

    /// Record `n` events now.
    pub fn record(&self, n: u64) {
        self.record_at(self.now(), n);
    }

    /// Events recorded within the window.
    pub fn total(&self) -> u64 {
        self.total_at(self.now())
    }

    /// Mean events per second over the window.
    pub fn per_second(&self) -> f64 {
        let slots = self.buckets.lock().len();
        self.total() as f64 / slots as f64
    }

    fn record_at(&self, second: u64, n: u64) {
        let mut buckets = self.buckets.lock();
        let slot = (second % buckets.len() as u64) as usize;
        let bucket = &mut buckets[slot];
        if bucket.second != second {
            *bucket = Bucket { second, count: 0 };
        }
        bucket.count += n;
    }

    fn total_at(&self, second: u64) -> u64 {
        let buckets = self.buckets.lock();
        let window = buckets.len() as u64;
        buckets
            .iter()
            .filter(|b| b.second != 0 && b.second <= second && second - b.second < window)
            .map(|b| b.count)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_within_window() {
        let monitor = ThroughputMonitor::new(Duration::from_secs(5));
        monitor.record_at(1, 10);
        monitor.record_at(3, 5);
        monitor.record_at(3, 5);
        assert_eq!(monitor.total_at(3), 20);
        assert_eq!(monitor.total_at(5), 20);
    }

    #[test]
    fn test_old_buckets_expire() {
        let monitor = ThroughputMonitor::new(Duration::from_secs(5));
        monitor.record_at(1, 10);
        monitor.record_at(4, 1);
        assert_eq!(monitor.total_at(6), 1);

        // slot reuse drops the stale count
        monitor.record_at(6, 2);
        assert_eq!(monitor.total_at(6), 3);
    }

    #[test]
    fn test_record_now() {
        let monitor = ThroughputMonitor::new(Duration::from_secs(60));
        monitor.record(3);
        assert_eq!(monitor.total(), 3);
        assert!(monitor.per_second() > 0.0);
    }
}
