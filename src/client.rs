//! Client facade.
//!
//! A [`CollectionClient`] owns the hash ring, the pipeline executor and the
//! metrics collector. The transport is injected as an [`OperationSink`], so
//! the same client runs over real connections or an in-memory double.

use crate::collection::{PipelineBatch, PipelineBuilder, Transcoder};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::metrics::ClientMetrics;
use crate::node::MemcachedNode;
use crate::operation::{CompletionPolicy, OperationFuture};
use crate::partitioning::KetamaLocator;
use crate::pipeline::{BatchResult, OperationSink, PipelineExecutor};
use std::sync::Arc;
use tracing::info;

/// Entry point for piped collection operations against a cluster.
#[derive(Debug)]
pub struct CollectionClient {
    config: ClientConfig,
    locator: Arc<KetamaLocator>,
    metrics: Arc<ClientMetrics>,
    executor: PipelineExecutor,
}

impl CollectionClient {
    /// Create a client over `sink`.
    ///
    /// Fails with [`Error::Config`](crate::Error::Config) if the configuration
    /// is invalid.
    pub fn new(config: ClientConfig, sink: Arc<dyn OperationSink>) -> Result<Self> {
        config.validate()?;

        let locator = Arc::new(KetamaLocator::new(&config.locator)?);
        let metrics = Arc::new(ClientMetrics::new(&config.metrics));
        let executor = PipelineExecutor::new(
            Arc::clone(&locator),
            sink,
            &config,
            Arc::clone(&metrics),
        );

        info!(
            routing_mode = ?locator.routing_mode(),
            repetitions = config.locator.repetitions,
            "Collection client created"
        );

        Ok(Self {
            config,
            locator,
            metrics,
            executor,
        })
    }

    /// Get the configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Add a node to the ring.
    pub fn add_node(&self, node: Arc<MemcachedNode>) {
        self.locator.insert(node);
    }

    /// Remove a node from the ring. Returns false if it was not present.
    pub fn remove_node(&self, node: &MemcachedNode) -> bool {
        self.locator.remove(node)
    }

    /// Replace the whole cluster view.
    pub fn update_nodes(&self, nodes: Vec<Arc<MemcachedNode>>) {
        self.locator.update_nodes(nodes);
    }

    /// Start a pipeline batch whose values are encoded with `transcoder`.
    pub fn pipeline<T>(&self, transcoder: Arc<dyn Transcoder<T>>) -> PipelineBuilder<T> {
        PipelineBuilder::new(transcoder)
    }

    /// Submit a batch.
    pub fn execute(&self, batch: PipelineBatch) -> Result<OperationFuture<BatchResult>> {
        self.executor.execute(batch)
    }

    /// Submit a batch with an explicit completion policy.
    pub fn execute_with_policy(
        &self,
        batch: PipelineBatch,
        policy: Arc<dyn CompletionPolicy>,
    ) -> Result<OperationFuture<BatchResult>> {
        self.executor.execute_with_policy(batch, policy)
    }

    /// Batches still waiting on at least one operation.
    pub fn in_flight(&self) -> usize {
        self.executor.in_flight()
    }

    /// Get the locator, for diagnostics.
    pub fn locator(&self) -> &Arc<KetamaLocator> {
        &self.locator
    }

    /// Get the client metrics.
    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.metrics
    }
}
