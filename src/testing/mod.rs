//! Testing utilities for the collection client.
//!
//! There is no network here. [`RecordingSink`] stands in for the transport:
//! it keeps every submitted operation so a test can play the server side by
//! feeding response text into it with [`respond`].
//!
//! ```text
//! CollectionClient ──execute──► RecordingSink ──take_for(node)──► test
//!        ▲                                                         │
//!        └────────────── respond(op, "RESPONSE 2\r\n...") ◄────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let sink = RecordingSink::new();
//! let client = CollectionClient::new(ClientConfig::default(), sink.clone())?;
//! client.add_node(Arc::new(MemcachedNode::new("10.0.0.1:11211")));
//!
//! let future = client.execute(batch)?;
//! let (_, op) = sink.take().remove(0);
//! respond(&op, "RESPONSE 1\r\nSTORED\r\nEND\r\n")?;
//! assert!(future.get()?.is_all_success());
//! ```

mod pipeline_lifecycle_tests;

use crate::error::{Error, Result};
use crate::node::MemcachedNode;
use crate::operation::{Operation, OperationState};
use crate::pipeline::OperationSink;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Submitted operation together with the node it was addressed to.
pub type Submission = (Arc<MemcachedNode>, Arc<dyn Operation>);

/// In-memory [`OperationSink`] that records submissions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    submitted: Mutex<Vec<Submission>>,
    reject: AtomicBool,
}

impl RecordingSink {
    /// Create an empty sink that accepts every submission.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make later submissions fail with a transport error.
    pub fn reject_submissions(&self, reject: bool) {
        self.reject.store(reject, Ordering::Release);
    }

    /// Number of operations waiting to be answered.
    pub fn pending(&self) -> usize {
        self.submitted.lock().len()
    }

    /// Take every recorded submission, oldest first.
    pub fn take(&self) -> Vec<Submission> {
        std::mem::take(&mut *self.submitted.lock())
    }

    /// Take the submissions addressed to `node`, leaving the rest.
    pub fn take_for(&self, node: &MemcachedNode) -> Vec<Arc<dyn Operation>> {
        let mut submitted = self.submitted.lock();
        let (matching, rest): (Vec<Submission>, Vec<Submission>) = submitted
            .drain(..)
            .partition(|(target, _)| target.as_ref() == node);
        *submitted = rest;
        matching.into_iter().map(|(_, op)| op).collect()
    }
}

impl OperationSink for RecordingSink {
    fn submit(&self, node: &Arc<MemcachedNode>, op: Arc<dyn Operation>) -> Result<()> {
        if self.reject.load(Ordering::Acquire) {
            return Err(Error::Transport(format!("{} is unreachable", node.name())));
        }
        debug!(node = %node.name(), "Recorded submission");
        op.core().set_handling_node(node);
        self.submitted.lock().push((Arc::clone(node), op));
        Ok(())
    }
}

/// Drive `op` through a write and feed it `response` as the server reply.
///
/// Returns whether the operation consumed a complete response.
pub fn respond(op: &Arc<dyn Operation>, response: &str) -> Result<bool> {
    op.initialize();
    op.transition_state(OperationState::Writing);
    op.write_complete();
    let mut buf = BytesMut::from(response.as_bytes());
    op.read_from_buffer(&mut buf)
}

/// Request text an operation would put on the wire.
pub fn request_text(op: &Arc<dyn Operation>) -> String {
    op.initialize();
    String::from_utf8_lossy(&op.write_buffer()).into_owned()
}

#[cfg(test)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
