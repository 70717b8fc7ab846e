//! Monotonic counters.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter at zero.
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    /// Get the metric name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the help text.
    pub fn help(&self) -> &'static str {
        self.help
    }

    /// Increment by one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `n`.
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A counter split by label values, e.g. redirected keys per target node.
#[derive(Debug)]
pub struct LabeledCounter<const N: usize> {
    name: &'static str,
    help: &'static str,
    label_names: [&'static str; N],
    values: DashMap<[String; N], AtomicU64>,
}

impl<const N: usize> LabeledCounter<N> {
    /// Create a new counter with no label sets yet.
    pub fn new(name: &'static str, help: &'static str, label_names: [&'static str; N]) -> Self {
        Self {
            name,
            help,
            label_names,
            values: DashMap::new(),
        }
    }

    /// Get the metric name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the help text.
    pub fn help(&self) -> &'static str {
        self.help
    }

    /// Get the label names, in label order.
    pub fn label_names(&self) -> &[&'static str; N] {
        &self.label_names
    }

    /// Increment the label set by one.
    pub fn inc(&self, labels: [&str; N]) {
        self.inc_by(labels, 1);
    }

    /// Increment the label set by `n`.
    pub fn inc_by(&self, labels: [&str; N], n: u64) {
        let key = labels.map(str::to_string);
        if let Some(counter) = self.values.get(&key) {
            counter.fetch_add(n, Ordering::Relaxed);
            return;
        }
        self.values
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Value for one label set; 0 if never incremented.
    pub fn get(&self, labels: [&str; N]) -> u64 {
        self.values
            .get(&labels.map(str::to_string))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Every label set with its value, sorted by labels.
    pub fn get_all(&self) -> Vec<([String; N], u64)> {
        let mut all: Vec<_> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Sum over all label sets.
    pub fn total(&self) -> u64 {
        self.values
            .iter()
            .map(|entry| entry.value().load(Ordering::Relaxed))
            .sum()
    }
}
