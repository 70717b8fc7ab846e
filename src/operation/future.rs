//! Caller-facing result handle for one or more operations.
//!
//! There is a single future type. What differs between call sites is the
//! [`CompletionPolicy`]: how a delivery is classified against the deadline and
//! what happens to outstanding operations when a caller gives up waiting.

use super::{Operation, OperationStatus};
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

const CALLER_CANCEL_REASON: &str = "cancelled by caller";

/// How a delivery is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Deliver the value as-is.
    Accept,
    /// The deadline already passed; resolve as a timeout.
    Expired,
}

/// Decides how terminal outcomes are classified.
pub trait CompletionPolicy: Send + Sync + fmt::Debug {
    /// Classify a delivery that arrives `elapsed` after submission.
    fn classify(&self, elapsed: Duration, timeout: Duration) -> Delivery;

    /// Whether a caller timeout also cancels outstanding operations.
    fn cancel_on_timeout(&self) -> bool {
        false
    }
}

/// Late deliveries resolve as timeouts. The default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictDeadline;

impl CompletionPolicy for StrictDeadline {
    fn classify(&self, elapsed: Duration, timeout: Duration) -> Delivery {
        if elapsed > timeout {
            Delivery::Expired
        } else {
            Delivery::Accept
        }
    }
}

/// Like [`StrictDeadline`], and a caller timeout cancels outstanding operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancelOnTimeout;

impl CompletionPolicy for CancelOnTimeout {
    fn classify(&self, elapsed: Duration, timeout: Duration) -> Delivery {
        StrictDeadline.classify(elapsed, timeout)
    }

    fn cancel_on_timeout(&self) -> bool {
        true
    }
}

/// What happened to a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The outcome was stored.
    Delivered,
    /// The deadline had passed; a timeout was stored instead.
    Expired,
    /// Another delivery path already finished the future.
    AlreadyDone,
}

/// Operations behind a future. Once `closed` is set by a caller cancel, new
/// operations are cancelled on attach.
#[derive(Default)]
struct Attached {
    ops: Vec<Arc<dyn Operation>>,
    closed: bool,
}

struct Shared<T> {
    done: AtomicBool,
    outcome: Mutex<Option<(Result<T>, OperationStatus)>>,
    ready: Condvar,
    notify: Notify,
    operations: Mutex<Attached>,
    // set once node timeout counters have seen this future time out
    timeout_counted: AtomicBool,
    submitted_at: Instant,
    timeout: Duration,
    policy: Arc<dyn CompletionPolicy>,
}

impl<T> Shared<T> {
    /// Store the outcome if no other path got there first.
    fn finish(&self, result: Result<T>, status: OperationStatus) -> bool {
        if self
            .done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.outcome.lock() = Some((result, status));
        self.ready.notify_all();
        self.notify.notify_waiters();
        true
    }

    fn is_cancelled(&self) -> bool {
        matches!(
            self.outcome.lock().as_ref(),
            Some((Err(Error::Cancelled(_)), _))
        )
    }

    fn operations(&self) -> Vec<Arc<dyn Operation>> {
        self.operations.lock().ops.clone()
    }

    /// Stop accepting operations and return the ones already attached.
    fn close(&self) -> Vec<Arc<dyn Operation>> {
        let mut attached = self.operations.lock();
        attached.closed = true;
        attached.ops.clone()
    }

    fn count_timeout(&self, ops: &[Arc<dyn Operation>], waited: Duration) {
        self.timeout_counted.store(true, Ordering::Release);
        for node in ops.iter().filter_map(|op| op.handling_node()) {
            let count = node.increment_continuous_timeout();
            warn!(
                node = %node.name(),
                continuous_timeouts = count,
                waited_ms = waited.as_millis() as u64,
                "Operation timed out"
            );
        }
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationFuture")
            .field("done", &self.done.load(Ordering::Acquire))
            .field("operations", &self.operations.lock().ops.len())
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Blocking or awaitable handle to the outcome of an operation.
///
/// Clones share the same outcome; any number of threads may wait, poll or
/// cancel concurrently.
#[derive(Debug)]
pub struct OperationFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for OperationFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> OperationFuture<T> {
    /// Create a future and the completer that resolves it.
    pub fn new(timeout: Duration, policy: Arc<dyn CompletionPolicy>) -> (Self, Completer<T>) {
        let shared = Arc::new(Shared {
            done: AtomicBool::new(false),
            outcome: Mutex::new(None),
            ready: Condvar::new(),
            notify: Notify::new(),
            operations: Mutex::new(Attached::default()),
            timeout_counted: AtomicBool::new(false),
            submitted_at: Instant::now(),
            timeout,
            policy,
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            Completer { shared },
        )
    }

    /// Create a future using [`StrictDeadline`].
    pub fn with_timeout(timeout: Duration) -> (Self, Completer<T>) {
        Self::new(timeout, Arc::new(StrictDeadline))
    }

    /// Block for at most the configured operation timeout.
    pub fn get(&self) -> Result<T> {
        self.get_timeout(self.shared.timeout)
    }

    /// Block until the outcome is known or `timeout` elapses.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.shared.outcome.lock();
        loop {
            if let Some((result, _)) = outcome.as_ref() {
                let result = result.clone();
                drop(outcome);
                self.record(&result);
                return result;
            }
            if self.shared.ready.wait_until(&mut outcome, deadline).timed_out()
                && outcome.is_none()
            {
                drop(outcome);
                self.on_timeout(timeout);
                return Err(Error::Timeout);
            }
        }
    }

    /// Await the outcome for at most the configured operation timeout.
    pub async fn wait(&self) -> Result<T> {
        let deadline = tokio::time::Instant::now() + self.shared.timeout;
        loop {
            // registered before checking so a concurrent finish cannot slip between
            let notified = self.shared.notify.notified();
            if let Some(result) = self.peek() {
                self.record(&result);
                return result;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                if let Some(result) = self.peek() {
                    self.record(&result);
                    return result;
                }
                self.on_timeout(self.shared.timeout);
                return Err(Error::Timeout);
            }
        }
    }

    fn peek(&self) -> Option<Result<T>> {
        self.shared
            .outcome
            .lock()
            .as_ref()
            .map(|(result, _)| result.clone())
    }
}

impl<T> OperationFuture<T> {
    /// Cancel the future and every operation behind it.
    ///
    /// Returns `true` if none of the operations had begun writing. Returns
    /// `false` if the future was already done.
    pub fn cancel(&self) -> bool {
        if !self.shared.finish(
            Err(Error::Cancelled(CALLER_CANCEL_REASON.to_string())),
            OperationStatus::cancelled(CALLER_CANCEL_REASON),
        ) {
            return false;
        }

        let mut not_started = true;
        for op in self.shared.close() {
            if !op.cancel(CALLER_CANCEL_REASON) {
                not_started = false;
            }
        }
        debug!(not_started, "Future cancelled by caller");
        not_started
    }

    /// Check if an outcome is available.
    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::Acquire)
    }

    /// Check if the future was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Status of the outcome, once known.
    pub fn status(&self) -> Option<OperationStatus> {
        self.shared
            .outcome
            .lock()
            .as_ref()
            .map(|(_, status)| status.clone())
    }

    /// Operations currently backing this future.
    pub fn operations(&self) -> Vec<Arc<dyn Operation>> {
        self.shared.operations()
    }

    /// Reset continuous-timeout counters once a non-timeout outcome is read.
    ///
    /// A stored timeout was counted when it happened, so reading it again
    /// leaves the counters alone.
    fn record<V>(&self, result: &Result<V>) {
        if matches!(result, Err(Error::Timeout)) {
            return;
        }
        for node in self
            .shared
            .operations()
            .iter()
            .filter_map(|op| op.handling_node())
        {
            node.reset_continuous_timeout();
        }
    }

    fn on_timeout(&self, waited: Duration) {
        let pending: Vec<_> = self
            .shared
            .operations()
            .into_iter()
            .filter(|op| !op.state().is_terminal())
            .collect();

        self.shared.count_timeout(&pending, waited);

        if self.shared.policy.cancel_on_timeout() {
            for op in &pending {
                op.cancel("timed out");
            }
        }
    }
}

/// Delivery side of an [`OperationFuture`].
#[derive(Debug)]
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Completer<T> {
    /// Attach an operation so that cancellation and node accounting reach it.
    pub fn attach(&self, op: Arc<dyn Operation>) {
        let closed = {
            let mut attached = self.shared.operations.lock();
            attached.ops.push(Arc::clone(&op));
            attached.closed
        };
        if closed {
            op.cancel(CALLER_CANCEL_REASON);
        }
    }

    /// Deliver a value, re-checking the deadline first.
    pub fn complete(&self, value: T, status: OperationStatus) -> Completion {
        self.deliver(Ok(value), status)
    }

    /// Deliver an error, re-checking the deadline first.
    pub fn fail(&self, error: Error) -> Completion {
        let status = OperationStatus::new(super::StatusCode::Undefined, error.to_string());
        self.deliver(Err(error), status)
    }

    /// Resolve as cancelled regardless of the deadline.
    ///
    /// Operations attached afterwards are cancelled on arrival.
    pub fn cancel(&self, reason: &str) -> bool {
        if !self.shared.finish(
            Err(Error::Cancelled(reason.to_string())),
            OperationStatus::cancelled(reason),
        ) {
            return false;
        }
        self.shared.operations.lock().closed = true;
        true
    }

    /// Check if the future already has an outcome.
    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::Acquire)
    }

    /// Time since the future was created.
    pub fn elapsed(&self) -> Duration {
        self.shared.submitted_at.elapsed()
    }

    fn deliver(&self, result: Result<T>, status: OperationStatus) -> Completion {
        let elapsed = self.shared.submitted_at.elapsed();
        match self.shared.policy.classify(elapsed, self.shared.timeout) {
            Delivery::Accept => {
                if self.shared.finish(result, status) {
                    Completion::Delivered
                } else {
                    Completion::AlreadyDone
                }
            }
            Delivery::Expired => {
                if self.shared.finish(Err(Error::Timeout), OperationStatus::timed_out()) {
                    warn!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        timeout_ms = self.shared.timeout.as_millis() as u64,
                        "Late delivery resolved as timeout"
                    );
                    // a caller whose wait already ran out has counted this timeout
                    if !self.shared.timeout_counted.load(Ordering::Acquire) {
                        self.shared.count_timeout(&self.shared.operations(), elapsed);
                    }
                    Completion::Expired
                } else {
                    Completion::AlreadyDone
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MemcachedNode;
    use crate::operation::{OperationCore, OperationState, StatusCode};
    use bytes::{Bytes, BytesMut};
    use std::thread;

    #[derive(Debug, Default)]
    struct NoopOp {
        core: OperationCore,
    }

    impl Operation for NoopOp {
        fn core(&self) -> &OperationCore {
            &self.core
        }

        fn initialize(&self) {}

        fn write_buffer(&self) -> Bytes {
            Bytes::new()
        }

        fn read_from_buffer(&self, _buf: &mut BytesMut) -> Result<bool> {
            Ok(true)
        }

        fn cancel(&self, reason: &str) -> bool {
            self.core.mark_cancelled(reason).unwrap_or(false)
        }
    }

    fn stored() -> OperationStatus {
        OperationStatus::new(StatusCode::Stored, "STORED")
    }

    fn op_on(node: &Arc<MemcachedNode>) -> Arc<NoopOp> {
        let op = Arc::new(NoopOp::default());
        op.core.set_handling_node(node);
        op
    }

    #[test]
    fn test_complete_then_get() {
        let node = Arc::new(MemcachedNode::new("n1:11211"));
        node.increment_continuous_timeout();

        let (future, completer) = OperationFuture::<u32>::with_timeout(Duration::from_secs(1));
        completer.attach(op_on(&node));

        assert_eq!(completer.complete(7, stored()), Completion::Delivered);
        assert!(future.is_done());
        assert_eq!(future.get().unwrap(), 7);
        assert_eq!(future.status().unwrap().code, StatusCode::Stored);

        // success resets the counter
        assert_eq!(node.continuous_timeouts(), 0);
    }

    #[test]
    fn test_get_times_out_and_counts() {
        let node = Arc::new(MemcachedNode::new("n1:11211"));
        let (future, completer) = OperationFuture::<u32>::with_timeout(Duration::from_millis(20));
        completer.attach(op_on(&node));

        assert_eq!(future.get(), Err(Error::Timeout));
        assert_eq!(node.continuous_timeouts(), 1);
        assert_eq!(future.get(), Err(Error::Timeout));
        assert_eq!(node.continuous_timeouts(), 2);
    }

    #[test]
    fn test_late_delivery_resolves_as_timeout() {
        let (future, completer) = OperationFuture::<u32>::with_timeout(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(30));

        assert_eq!(completer.complete(1, stored()), Completion::Expired);
        assert_eq!(future.get_timeout(Duration::from_secs(1)), Err(Error::Timeout));
        assert_eq!(future.status().unwrap().code, StatusCode::TimedOut);
    }

    #[test]
    fn test_late_delivery_after_caller_timeout() {
        let node = Arc::new(MemcachedNode::new("n1:11211"));
        let (future, completer) = OperationFuture::<u32>::with_timeout(Duration::from_millis(10));
        completer.attach(op_on(&node));

        assert_eq!(future.get(), Err(Error::Timeout));
        // a slow server cannot mask the timeout the caller already saw
        assert_eq!(completer.complete(1, stored()), Completion::Expired);
        assert_eq!(future.get(), Err(Error::Timeout));
        assert_eq!(node.continuous_timeouts(), 1);
    }

    #[test]
    fn test_polling_expired_future_counts_once() {
        let node = Arc::new(MemcachedNode::new("n1:11211"));
        let (future, completer) = OperationFuture::<u32>::with_timeout(Duration::from_millis(5));
        completer.attach(op_on(&node));
        thread::sleep(Duration::from_millis(20));

        assert_eq!(completer.complete(1, stored()), Completion::Expired);
        assert_eq!(node.continuous_timeouts(), 1);
        for _ in 0..5 {
            assert_eq!(future.get(), Err(Error::Timeout));
        }
        assert_eq!(node.continuous_timeouts(), 1);
    }

    #[test]
    fn test_cancel_before_write() {
        let (future, completer) = OperationFuture::<u32>::with_timeout(Duration::from_secs(1));
        let op = Arc::new(NoopOp::default());
        completer.attach(op.clone());

        assert!(future.cancel());
        assert!(future.is_cancelled());
        assert_eq!(op.state(), OperationState::Cancelled);
        assert!(matches!(future.get(), Err(Error::Cancelled(_))));

        // the completion path lost
        assert_eq!(completer.complete(1, stored()), Completion::AlreadyDone);
        assert!(!future.cancel());
    }

    #[test]
    fn test_cancel_in_flight() {
        let (future, completer) = OperationFuture::<u32>::with_timeout(Duration::from_secs(1));
        let op = Arc::new(NoopOp::default());
        op.transition_state(OperationState::Writing);
        completer.attach(op.clone());

        assert!(!future.cancel());
        assert!(future.is_cancelled());
        assert!(matches!(future.get(), Err(Error::Cancelled(_))));
    }

    #[test]
    fn test_attach_after_cancel_cancels_op() {
        let (future, completer) = OperationFuture::<u32>::with_timeout(Duration::from_secs(1));
        future.cancel();

        let op = Arc::new(NoopOp::default());
        completer.attach(op.clone());
        assert!(op.is_cancelled());
        assert_eq!(future.operations().len(), 1);
    }

    #[test]
    fn test_attach_racing_cancel_reaches_operation() {
        use std::sync::Barrier;

        for _ in 0..200 {
            let (future, completer) =
                OperationFuture::<u32>::with_timeout(Duration::from_secs(5));
            let barrier = Arc::new(Barrier::new(2));
            let op = Arc::new(NoopOp::default());

            let attacher = {
                let barrier = Arc::clone(&barrier);
                let op: Arc<dyn Operation> = op.clone();
                thread::spawn(move || {
                    barrier.wait();
                    completer.attach(op);
                })
            };
            barrier.wait();
            assert!(future.cancel());
            attacher.join().unwrap();

            // whichever side ran first, the cancel reached the operation
            assert!(op.is_cancelled());
            assert_eq!(future.operations().len(), 1);
        }
    }

    #[test]
    fn test_single_writer_wins() {
        for _ in 0..50 {
            let (future, completer) =
                OperationFuture::<u32>::with_timeout(Duration::from_secs(5));

            let c1 = completer.clone();
            let c2 = completer.clone();
            let f1 = future.clone();

            let t1 = thread::spawn(move || c1.complete(1, stored()) == Completion::Delivered);
            let t2 = thread::spawn(move || c2.fail(Error::Protocol("boom".into())) == Completion::Delivered);
            let t3 = thread::spawn(move || f1.cancel());

            let winners = [t1.join().unwrap(), t2.join().unwrap()]
                .iter()
                .filter(|w| **w)
                .count();
            let cancelled = t3.join().unwrap();

            let outcome = future.get();
            match outcome {
                Ok(1) | Err(Error::Protocol(_)) => {
                    assert_eq!(winners, 1);
                    assert!(!cancelled);
                }
                Err(Error::Cancelled(_)) => {
                    assert_eq!(winners, 0);
                    assert!(cancelled);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[test]
    fn test_waiter_woken_by_completion() {
        let (future, completer) = OperationFuture::<u32>::with_timeout(Duration::from_secs(5));
        let waiter = {
            let future = future.clone();
            thread::spawn(move || future.get())
        };
        thread::sleep(Duration::from_millis(20));
        completer.complete(9, stored());
        assert_eq!(waiter.join().unwrap(), Ok(9));
    }

    #[test]
    fn test_cancel_on_timeout_policy() {
        let (future, completer) =
            OperationFuture::<u32>::new(Duration::from_millis(10), Arc::new(CancelOnTimeout));
        let op = Arc::new(NoopOp::default());
        completer.attach(op.clone());

        assert_eq!(future.get(), Err(Error::Timeout));
        assert!(op.is_cancelled());
    }

    #[tokio::test]
    async fn test_async_wait() {
        let (future, completer) = OperationFuture::<u32>::with_timeout(Duration::from_secs(5));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            completer.complete(3, stored());
        });
        assert_eq!(future.wait().await, Ok(3));
    }

    #[tokio::test]
    async fn test_async_wait_times_out() {
        let (future, _completer) = OperationFuture::<u32>::with_timeout(Duration::from_millis(10));
        assert_eq!(future.wait().await, Err(Error::Timeout));
    }
}
