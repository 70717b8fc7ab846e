//! Client-side metrics.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ClientMetrics                           │
//! │  ┌──────────────┐  ┌──────────────────┐  ┌──────────────┐  │
//! │  │  Counters    │  │  LatencyMonitor  │  │  Throughput  │  │
//! │  │ - batches    │  │ - ring buffer    │  │ - per-second │  │
//! │  │ - redirects  │  │ - cached p50/p99 │  │   buckets    │  │
//! │  │ - timeouts   │  └──────────────────┘  └──────────────┘  │
//! │  └──────────────┘                                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A [`ClientMetrics`] is created by the caller and passed to the components
//! that record into it; there is no process-wide instance.

mod counters;
mod latency;
mod throughput;

pub use counters::{Counter, LabeledCounter};
pub use latency::{LatencyMonitor, LatencySnapshot};
pub use throughput::ThroughputMonitor;

use crate::config::MetricsConfig;
use crate::operation::Completion;
use std::time::Duration;

/// Metrics recorded by the pipeline executor.
#[derive(Debug)]
pub struct ClientMetrics {
    /// Batches handed to the executor.
    pub batches_submitted: Counter,
    /// Batches resolved with a result.
    pub batches_completed: Counter,
    /// Batches whose result arrived after the deadline.
    pub batches_timed_out: Counter,
    /// Batches that failed routing (no node, redirect limit).
    pub batches_failed: Counter,
    /// Commands handed to the executor.
    pub commands_submitted: Counter,
    /// Pipeline operations cancelled before completing.
    pub operations_cancelled: Counter,
    /// Pipeline operations that ended in `REDIRECT`.
    pub redirects: Counter,
    /// Keys resubmitted after a redirect, by target node.
    pub redirected_keys: LabeledCounter<1>,
    /// Batch latency from submission to result.
    pub latency: LatencyMonitor,
    /// Commands submitted per second.
    pub throughput: ThroughputMonitor,
}

impl ClientMetrics {
    /// Create the metric set described by `config`.
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            batches_submitted: Counter::new("pipe_batches_submitted_total", "Batches submitted"),
            batches_completed: Counter::new("pipe_batches_completed_total", "Batches completed"),
            batches_timed_out: Counter::new(
                "pipe_batches_timed_out_total",
                "Batches resolved after their deadline",
            ),
            batches_failed: Counter::new("pipe_batches_failed_total", "Batches failed by routing"),
            commands_submitted: Counter::new("pipe_commands_submitted_total", "Commands submitted"),
            operations_cancelled: Counter::new(
                "pipe_operations_cancelled_total",
                "Pipeline operations cancelled",
            ),
            redirects: Counter::new("pipe_redirects_total", "Pipeline operations redirected"),
            redirected_keys: LabeledCounter::new(
                "pipe_redirected_keys_total",
                "Keys resubmitted after a redirect",
                ["node"],
            ),
            latency: LatencyMonitor::new(config.latency_window, config.snapshot_ttl),
            throughput: ThroughputMonitor::new(config.throughput_window),
        }
    }

    /// Record a batch handed to the executor.
    pub fn record_submit(&self, commands: usize) {
        self.batches_submitted.inc();
        self.commands_submitted.inc_by(commands as u64);
        self.throughput.record(commands as u64);
    }

    /// Record how a batch result was delivered.
    pub fn record_completion(&self, completion: Completion, latency: Duration) {
        match completion {
            Completion::Delivered => {
                self.batches_completed.inc();
                self.latency.record(latency);
            }
            Completion::Expired => self.batches_timed_out.inc(),
            Completion::AlreadyDone => {}
        }
    }

    /// Record keys resubmitted to `node` after a redirect.
    pub fn record_redirect(&self, node: &str, keys: usize) {
        self.redirected_keys.inc_by([node], keys as u64);
    }

    /// Capture the current values of every metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_submitted: self.batches_submitted.get(),
            batches_completed: self.batches_completed.get(),
            batches_timed_out: self.batches_timed_out.get(),
            batches_failed: self.batches_failed.get(),
            commands_submitted: self.commands_submitted.get(),
            operations_cancelled: self.operations_cancelled.get(),
            redirects: self.redirects.get(),
            redirected_keys: self.redirected_keys.total(),
            latency: self.latency.snapshot(),
            commands_per_second: self.throughput.per_second(),
        }
    }

    /// Render counters in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        for counter in [
            &self.batches_submitted,
            &self.batches_completed,
            &self.batches_timed_out,
            &self.batches_failed,
            &self.commands_submitted,
            &self.operations_cancelled,
            &self.redirects,
        ] {
            output.push_str(&format!(
                "# HELP {name} {}\n# TYPE {name} counter\n{name} {}\n",
                counter.help(),
                counter.get(),
                name = counter.name(),
            ));
        }

        let name = self.redirected_keys.name();
        output.push_str(&format!(
            "# HELP {name} {}\n# TYPE {name} counter\n",
            self.redirected_keys.help()
        ));
        let label = self.redirected_keys.label_names()[0];
        for ([node], value) in self.redirected_keys.get_all() {
            output.push_str(&format!("{name}{{{label}=\"{node}\"}} {value}\n"));
        }
        output
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new(&MetricsConfig::default())
    }
}

/// Point-in-time copy of [`ClientMetrics`].
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub batches_submitted: u64,
    pub batches_completed: u64,
    pub batches_timed_out: u64,
    pub batches_failed: u64,
    pub commands_submitted: u64,
    pub operations_cancelled: u64,
    pub redirects: u64,
    pub redirected_keys: u64,
    pub latency: LatencySnapshot,
    pub commands_per_second: f64,
}

impl MetricsSnapshot {
    /// Share of submitted batches that ended in a redirect at least once.
    pub fn redirect_rate(&self) -> f64 {
        if self.batches_submitted == 0 {
            0.0
        } else {
            self.redirects as f64 / self.batches_submitted as f64
        }
    }
}
