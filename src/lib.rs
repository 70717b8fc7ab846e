//! Client core for a memcached-compatible cache cluster with collection types
//! and live resharding.
//!
//! This crate provides the routing and batching half of a cache client:
//! - **Ketama consistent hashing** to map keys onto nodes, shard groups or
//!   replica groups
//! - **Piped collection commands** for lists, sets, maps and B-trees, up to 500
//!   per batch
//! - **Redirect recovery** when a node answers `NOT_MY_KEY` because key
//!   ownership moved while the request was in flight
//!
//! The transport is not part of this crate. Operations are handed to an
//! [`OperationSink`], which queues them on a node for a connection to write
//! and feed responses back.
//!
//! # Example
//!
//! ```rust,no_run
//! use collcache::{ClientConfig, CollectionClient, MemcachedNode, NodeQueueSink, StringTranscoder};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CollectionClient::new(ClientConfig::default(), Arc::new(NodeQueueSink))?;
//!     client.add_node(Arc::new(MemcachedNode::new("10.0.0.1:11211")));
//!     client.add_node(Arc::new(MemcachedNode::new("10.0.0.2:11211")));
//!
//!     let mut pipe = client.pipeline::<String>(Arc::new(StringTranscoder::new()));
//!     pipe.sop_insert("tags:1", &"rust".to_string(), None)?
//!         .lop_insert("events:1", -1, &"login".to_string(), None)?;
//!
//!     // resolves once every node has answered, including redirected keys
//!     let future = client.execute(pipe.build())?;
//!     let result = future.get()?;
//!     for (index, status) in result.failures() {
//!         println!("command {} failed: {}", index, status.message);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            CollectionClient                  │
//! │  • pipeline::<T>() -> PipelineBuilder        │
//! │  • execute(batch) -> OperationFuture         │
//! └─────────────────────────────────────────────┘
//!                     │
//!     ┌───────────────┼───────────────┐
//!     ▼               ▼               ▼
//! ┌──────────┐  ┌───────────┐  ┌───────────┐
//! │  Ketama  │  │ Pipeline  │  │  Client   │
//! │ Locator  │  │ Executor  │  │  Metrics  │
//! └──────────┘  └───────────┘  └───────────┘
//!                     │
//!                     ▼
//!          OperationSink ─► MemcachedNode queues
//! ```

pub mod client;
pub mod collection;
pub mod config;
pub mod error;
pub mod metrics;
pub mod node;
pub mod operation;
pub mod partitioning;
pub mod pipeline;
pub mod testing;
pub mod types;

pub use client::CollectionClient;
pub use config::{ClientConfig, LocatorConfig, MetricsConfig, PipelineConfig};
pub use error::{Error, Result};
pub use types::{CollectionAttributes, CollectionType, ElementFlag, OverflowAction};

// Re-export collection types
pub use collection::{
    BKey, BKeyRange, BytesTranscoder, CachedData, CollectionCommand, PipelineBatch,
    PipelineBuilder, SerdeTranscoder, StringTranscoder, Transcoder, MAX_PIPED_ITEM_COUNT,
};

// Re-export node and routing types
pub use node::{MemcachedNode, NodeRole, NodeSelector};
pub use partitioning::{HashAlgorithm, KetamaLocator, RingEntry, RoutingMode};

// Re-export operation types
pub use operation::{
    CancelOnTimeout, CompletionPolicy, Operation, OperationFuture, OperationState,
    OperationStatus, StatusCode, StrictDeadline,
};

// Re-export pipeline types
pub use pipeline::{
    BatchResult, NodeQueueSink, OperationSink, PipedCommand, PipelineExecutor, RedirectHandler,
};

// Re-export metrics types
pub use metrics::{ClientMetrics, MetricsSnapshot};
