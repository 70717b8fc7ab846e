//! Splitting batches across nodes and recovering from redirects.
//!
//! ```text
//! PipelineBatch ──route──► node A: PipelineOperation ──┐
//!                          node B: PipelineOperation ──┼──► BatchTracker ──► OperationFuture
//!                                                      │        ▲
//!                 REDIRECT ──group_redirect_keys──► resubmit ───┘
//! ```
//!
//! A [`BatchTracker`] collects per-command statuses from every operation of a
//! batch. A redirected operation is replaced by fresh operations addressed to
//! the nodes that now own its keys, and the batch future resolves only after
//! those complete too.

use super::operation::{PipedCommand, PipelineCallback, PipelineOperation};
use crate::collection::{KeyedCommand, PipelineBatch};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::metrics::ClientMetrics;
use crate::node::MemcachedNode;
use crate::operation::{
    Completer, CompletionPolicy, Operation, OperationFuture, OperationState, OperationStatus,
    StatusCode, StrictDeadline,
};
use crate::partitioning::KetamaLocator;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where operations are handed to the transport.
pub trait OperationSink: Send + Sync {
    /// Queue `op` for `node`.
    fn submit(&self, node: &Arc<MemcachedNode>, op: Arc<dyn Operation>) -> Result<()>;
}

/// Enqueues on the node's input queue for its connection to drain.
#[derive(Debug, Default)]
pub struct NodeQueueSink;

impl OperationSink for NodeQueueSink {
    fn submit(&self, node: &Arc<MemcachedNode>, op: Arc<dyn Operation>) -> Result<()> {
        node.add_operation(op);
        Ok(())
    }
}

/// Per-command outcome of a batch, indexed like the submitted batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    statuses: Vec<OperationStatus>,
}

impl BatchResult {
    /// Per-command statuses in batch order.
    pub fn statuses(&self) -> &[OperationStatus] {
        &self.statuses
    }

    /// Get the status of the command at `index`.
    pub fn status(&self, index: usize) -> Option<&OperationStatus> {
        self.statuses.get(index)
    }

    /// Failed commands by batch index.
    pub fn failures(&self) -> BTreeMap<usize, OperationStatus> {
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, status)| !status.is_success())
            .map(|(index, status)| (index, status.clone()))
            .collect()
    }

    /// Check if every command succeeded.
    pub fn is_all_success(&self) -> bool {
        self.statuses.iter().all(OperationStatus::is_success)
    }

    /// Number of commands in the batch.
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    /// Check if the batch had no commands.
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

struct ExecutorInner {
    locator: Arc<KetamaLocator>,
    sink: Arc<dyn OperationSink>,
    metrics: Arc<ClientMetrics>,
    op_timeout: Duration,
    max_redirects: u32,
    in_flight: DashMap<u64, Arc<BatchTracker>>,
    next_batch_id: AtomicU64,
}

impl ExecutorInner {
    /// Group commands by owning node, keeping their relative order.
    fn route(
        &self,
        commands: Vec<PipedCommand>,
    ) -> Result<Vec<(Arc<MemcachedNode>, Vec<PipedCommand>)>> {
        let mut groups: Vec<(Arc<MemcachedNode>, Vec<PipedCommand>)> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();

        for command in commands {
            let node = self.locator.find_node(&command.key)?;
            let slot = *slots.entry(node.name().to_string()).or_insert_with(|| {
                groups.push((Arc::clone(&node), Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(command);
        }
        Ok(groups)
    }

    fn dispatch(
        &self,
        tracker: &Arc<BatchTracker>,
        node: &Arc<MemcachedNode>,
        commands: Vec<PipedCommand>,
    ) {
        let callback: Arc<dyn PipelineCallback> = Arc::clone(tracker) as Arc<dyn PipelineCallback>;
        let op = Arc::new(PipelineOperation::new(commands, callback));
        if let Some(completer) = tracker.completer() {
            completer.attach(op.clone());
        }

        if let Err(e) = self.sink.submit(node, op.clone()) {
            warn!(batch = tracker.id, node = %node.name(), error = %e, "Failed to submit pipeline operation");
            op.cancel(&e.to_string());
        }
    }
}

/// Collects the outcome of one batch across its operations.
struct BatchTracker {
    id: u64,
    executor: Weak<ExecutorInner>,
    statuses: Mutex<Vec<Option<OperationStatus>>>,
    /// Operations not yet terminal, including redirect resubmissions.
    pending: AtomicUsize,
    /// Taken when the batch finishes; operations point back at the tracker.
    completer: Mutex<Option<Completer<BatchResult>>>,
    started: Instant,
}

impl BatchTracker {
    fn completer(&self) -> Option<Completer<BatchResult>> {
        self.completer.lock().clone()
    }

    fn recover(self: &Arc<Self>, op: &PipelineOperation) {
        let Some(handler) = op.get_and_clear_redirect_handler() else {
            return;
        };
        let Some(inner) = self.executor.upgrade() else {
            self.mark_unresolved(op, "executor dropped");
            return;
        };
        inner.metrics.redirects.inc();

        let Some(completer) = self.completer() else {
            return;
        };
        if completer.is_done() {
            debug!(batch = self.id, "Batch already resolved, dropping redirected commands");
            return;
        }

        let redirects = handler
            .positions()
            .iter()
            .filter_map(|&pos| op.command_at(pos))
            .map(|c| c.redirects)
            .max()
            .unwrap_or(0);
        if redirects >= inner.max_redirects {
            let keys: Vec<String> = handler.keys().iter().map(|k| k.to_string()).collect();
            warn!(batch = self.id, attempts = redirects, keys = ?keys, "Redirect limit exceeded");
            inner.metrics.batches_failed.inc();
            completer.fail(Error::RedirectLimitExceeded {
                attempts: redirects,
                keys,
            });
            return;
        }

        let groups = match handler.group_redirect_keys(&inner.locator, op) {
            Ok(groups) => groups,
            Err(e) => {
                warn!(batch = self.id, error = %e, "Cannot re-route redirected keys");
                inner.metrics.batches_failed.inc();
                completer.fail(e);
                return;
            }
        };

        // registered before this operation is counted done
        self.pending.fetch_add(groups.len(), Ordering::AcqRel);
        for (node, keys) in groups {
            let commands: Vec<PipedCommand> = handler
                .commands_for(op, &keys)
                .into_iter()
                .map(PipedCommand::redirected)
                .collect();
            inner.metrics.record_redirect(node.name(), keys.len());
            debug!(
                batch = self.id,
                node = %node.name(),
                keys = keys.len(),
                commands = commands.len(),
                attempt = redirects + 1,
                "Resubmitting redirected commands"
            );
            inner.dispatch(self, &node, commands);
        }
    }

    /// Give commands of `op` that never got a status a cancelled status.
    fn mark_unresolved(&self, op: &PipelineOperation, reason: &str) {
        let mut statuses = self.statuses.lock();
        for command in op.commands() {
            if let Some(slot) = statuses.get_mut(command.index) {
                if slot.is_none() {
                    *slot = Some(OperationStatus::cancelled(reason));
                }
            }
        }
    }

    fn finish(&self) {
        let Some(completer) = self.completer.lock().take() else {
            return;
        };
        let inner = self.executor.upgrade();
        if let Some(inner) = &inner {
            inner.in_flight.remove(&self.id);
        }

        let statuses: Vec<OperationStatus> = self
            .statuses
            .lock()
            .iter()
            .map(|status| {
                status
                    .clone()
                    .unwrap_or_else(|| OperationStatus::new(StatusCode::Undefined, "no status"))
            })
            .collect();
        let result = BatchResult { statuses };
        let status = if result.is_all_success() {
            OperationStatus::new(StatusCode::End, "")
        } else {
            OperationStatus::new(
                StatusCode::FailedEnd,
                format!("{} of {} commands failed", result.failures().len(), result.len()),
            )
        };

        let latency = self.started.elapsed();
        let completion = completer.complete(result, status);
        if let Some(inner) = &inner {
            inner.metrics.record_completion(completion, latency);
        }
        debug!(batch = self.id, completion = ?completion, latency_us = latency.as_micros() as u64, "Batch finished");
    }
}

impl PipelineCallback for BatchTracker {
    fn received_status(&self, index: usize, status: OperationStatus) {
        if let Some(slot) = self.statuses.lock().get_mut(index) {
            if slot.is_none() {
                *slot = Some(status);
            }
        }
    }

    fn complete(self: Arc<Self>, op: &PipelineOperation) {
        match op.state() {
            OperationState::Redirect => self.recover(op),
            OperationState::Cancelled => {
                if let Some(inner) = self.executor.upgrade() {
                    inner.metrics.operations_cancelled.inc();
                }
                let reason = op
                    .core()
                    .cancel_reason()
                    .unwrap_or_else(|| "cancelled".to_string());
                self.mark_unresolved(op, &reason);
            }
            _ => {}
        }

        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish();
        }
    }
}

/// Executes pipeline batches against the cluster.
pub struct PipelineExecutor {
    inner: Arc<ExecutorInner>,
}

impl PipelineExecutor {
    /// Create an executor routing with `locator` and submitting through `sink`.
    pub fn new(
        locator: Arc<KetamaLocator>,
        sink: Arc<dyn OperationSink>,
        config: &ClientConfig,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        info!(
            op_timeout_ms = config.op_timeout.as_millis() as u64,
            max_redirects = config.pipeline.max_redirects,
            "Pipeline executor created"
        );
        Self {
            inner: Arc::new(ExecutorInner {
                locator,
                sink,
                metrics,
                op_timeout: config.op_timeout,
                max_redirects: config.pipeline.max_redirects,
                in_flight: DashMap::new(),
                next_batch_id: AtomicU64::new(1),
            }),
        }
    }

    /// Submit a batch with the [`StrictDeadline`] policy.
    pub fn execute(&self, batch: PipelineBatch) -> Result<OperationFuture<BatchResult>> {
        self.execute_with_policy(batch, Arc::new(StrictDeadline))
    }

    /// Submit a batch.
    ///
    /// Fails synchronously only when a key has no node to route to; every
    /// other outcome is reported through the returned future.
    pub fn execute_with_policy(
        &self,
        batch: PipelineBatch,
        policy: Arc<dyn CompletionPolicy>,
    ) -> Result<OperationFuture<BatchResult>> {
        let commands: Vec<PipedCommand> = batch
            .into_commands()
            .into_iter()
            .enumerate()
            .map(|(index, KeyedCommand { key, command })| PipedCommand::new(index, key, command))
            .collect();
        let count = commands.len();
        let groups = self.inner.route(commands)?;

        let (future, completer) = OperationFuture::new(self.inner.op_timeout, policy);
        self.inner.metrics.record_submit(count);
        if groups.is_empty() {
            completer.complete(BatchResult::default(), OperationStatus::new(StatusCode::End, ""));
            return Ok(future);
        }

        let id = self.inner.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let tracker = Arc::new(BatchTracker {
            id,
            executor: Arc::downgrade(&self.inner),
            statuses: Mutex::new(vec![None; count]),
            pending: AtomicUsize::new(groups.len()),
            completer: Mutex::new(Some(completer)),
            started: Instant::now(),
        });
        self.inner.in_flight.insert(id, Arc::clone(&tracker));

        debug!(batch = id, commands = count, nodes = groups.len(), "Submitting batch");
        for (node, commands) in groups {
            self.inner.dispatch(&tracker, &node, commands);
        }
        Ok(future)
    }

    /// Batches with operations still outstanding.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Get the locator used for routing.
    pub fn locator(&self) -> &Arc<KetamaLocator> {
        &self.inner.locator
    }

    /// Get the metrics this executor records into.
    pub fn metrics(&self) -> &Arc<ClientMetrics> {
        &self.inner.metrics
    }
}

impl fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("op_timeout", &self.inner.op_timeout)
            .field("max_redirects", &self.inner.max_redirects)
            .field("in_flight", &self.inner.in_flight.len())
            .finish()
    }
}
