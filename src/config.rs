//! Configuration types for the cache client.

use crate::error::{Error, Result};
use crate::partitioning::HashAlgorithm;
use std::time::Duration;

/// Default operation timeout.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(700);

/// Default number of ring points per routing key (the standard Ketama constant).
pub const DEFAULT_REPETITIONS: usize = 160;

/// Default bound on recursive redirect recovery.
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

/// Main configuration for the cache client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Time budget for a single operation or pipeline batch.
    pub op_timeout: Duration,

    /// Hash ring configuration.
    pub locator: LocatorConfig,

    /// Pipeline execution configuration.
    pub pipeline: PipelineConfig,

    /// Metrics collector configuration.
    pub metrics: MetricsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            op_timeout: DEFAULT_OP_TIMEOUT,
            locator: LocatorConfig::default(),
            pipeline: PipelineConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the operation timeout.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    /// Set the locator configuration.
    pub fn with_locator_config(mut self, locator: LocatorConfig) -> Self {
        self.locator = locator;
        self
    }

    /// Enable or disable shard-key routing.
    pub fn with_shard_key_enabled(mut self, enabled: bool) -> Self {
        self.locator.shard_key_enabled = enabled;
        self
    }

    /// Enable or disable replica-group routing.
    pub fn with_replication_enabled(mut self, enabled: bool) -> Self {
        self.locator.replication_enabled = enabled;
        self
    }

    /// Set the pipeline configuration.
    pub fn with_pipeline_config(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Set the maximum number of redirect rounds per batch.
    pub fn with_max_redirects(mut self, max: u32) -> Self {
        self.pipeline.max_redirects = max;
        self
    }

    /// Set the metrics configuration.
    pub fn with_metrics_config(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    /// Check the configuration for values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.op_timeout.is_zero() {
            return Err(Error::Config("op_timeout must be non-zero".to_string()));
        }
        self.locator.validate()?;
        self.metrics.validate()
    }
}

/// Hash ring configuration.
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Ring points per routing key.
    pub repetitions: usize,

    /// Hash used for both ring points and key lookups.
    pub hash: HashAlgorithm,

    /// Route by shard name instead of node address.
    pub shard_key_enabled: bool,

    /// Route by replica-group name instead of node address.
    pub replication_enabled: bool,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            repetitions: DEFAULT_REPETITIONS,
            hash: HashAlgorithm::KetamaMd5,
            shard_key_enabled: false,
            replication_enabled: false,
        }
    }
}

impl LocatorConfig {
    /// Set the repetition count.
    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions;
        self
    }

    /// Set the hash algorithm.
    pub fn with_hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = hash;
        self
    }

    /// Validate the locator settings.
    pub fn validate(&self) -> Result<()> {
        if self.repetitions == 0 {
            return Err(Error::Config("repetitions must be non-zero".to_string()));
        }
        if self.hash == HashAlgorithm::KetamaMd5 && self.repetitions % 4 != 0 {
            return Err(Error::Config(format!(
                "ketama repetitions must be a multiple of 4, got {}",
                self.repetitions
            )));
        }
        Ok(())
    }
}

/// Pipeline execution configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Redirect rounds allowed before a batch fails with a routing error.
    pub max_redirects: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

/// Metrics collector configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Number of latency samples kept in the sliding window.
    pub latency_window: usize,

    /// How long a computed latency snapshot stays valid.
    pub snapshot_ttl: Duration,

    /// Span covered by the throughput monitor.
    pub throughput_window: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            latency_window: 1024,
            snapshot_ttl: Duration::from_secs(1),
            throughput_window: Duration::from_secs(60),
        }
    }
}

impl MetricsConfig {
    /// Validate the metrics settings.
    pub fn validate(&self) -> Result<()> {
        if self.latency_window == 0 {
            return Err(Error::Config("latency_window must be non-zero".to_string()));
        }
        if self.throughput_window.as_secs() == 0 {
            return Err(Error::Config(
                "throughput_window must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}
