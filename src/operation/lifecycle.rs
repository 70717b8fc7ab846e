//! Lifecycle bookkeeping shared by all operation kinds.

use super::OperationState;
use crate::node::MemcachedNode;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::trace;

/// State, cancellation and node ownership for one operation.
///
/// All transitions go through compare-and-set so that exactly one terminal
/// state wins when the transport, the caller and a timeout race.
#[derive(Debug)]
pub struct OperationCore {
    state: AtomicU8,
    cancel_reason: Mutex<Option<String>>,
    handling_node: RwLock<Weak<MemcachedNode>>,
    created_at: Instant,
}

impl OperationCore {
    /// Create a core in `WRITE_QUEUED`.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(OperationState::WriteQueued as u8),
            cancel_reason: Mutex::new(None),
            handling_node: RwLock::new(Weak::new()),
            created_at: Instant::now(),
        }
    }

    /// Current state.
    pub fn state(&self) -> OperationState {
        OperationState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` unless the current state is terminal.
    pub fn transition(&self, next: OperationState) -> bool {
        self.swap_state(next).is_some()
    }

    /// Move to `next`, returning the previous state on success.
    fn swap_state(&self, next: OperationState) -> Option<OperationState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = OperationState::from_u8(current);
            if from.is_terminal() {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    trace!(from = %from, to = %next, "Operation state transition");
                    return Some(from);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Mark the operation cancelled.
    ///
    /// Returns `None` if it already reached a terminal state, otherwise
    /// whether it was still waiting to be written.
    pub fn mark_cancelled(&self, reason: &str) -> Option<bool> {
        let previous = self.swap_state(OperationState::Cancelled)?;
        *self.cancel_reason.lock() = Some(reason.to_string());
        Some(previous == OperationState::WriteQueued)
    }

    /// Check if the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state() == OperationState::Cancelled
    }

    /// Why the operation was cancelled, if it was.
    pub fn cancel_reason(&self) -> Option<String> {
        self.cancel_reason.lock().clone()
    }

    /// Put an in-flight operation back to `WRITE_QUEUED` so it is written again.
    pub fn reset_for_resend(&self) {
        let current = self.state();
        if !current.is_terminal() && current != OperationState::WriteQueued {
            self.transition(OperationState::WriteQueued);
        }
    }

    /// Node currently responsible for the operation.
    pub fn handling_node(&self) -> Option<Arc<MemcachedNode>> {
        self.handling_node.read().upgrade()
    }

    /// Record a new owning node.
    pub fn set_handling_node(&self, node: &Arc<MemcachedNode>) {
        *self.handling_node.write() = Arc::downgrade(node);
    }

    /// Time since the operation was created.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl Default for OperationCore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        let core = OperationCore::new();
        assert_eq!(core.state(), OperationState::WriteQueued);

        assert!(core.transition(OperationState::Writing));
        assert!(core.transition(OperationState::Reading));
        assert!(core.transition(OperationState::Complete));

        // terminal states stick
        assert!(!core.transition(OperationState::Reading));
        assert_eq!(core.state(), OperationState::Complete);
    }

    #[test]
    fn test_cancel_before_write() {
        let core = OperationCore::new();
        assert_eq!(core.mark_cancelled("caller"), Some(true));
        assert!(core.is_cancelled());
        assert_eq!(core.cancel_reason().as_deref(), Some("caller"));

        // second cancel loses
        assert_eq!(core.mark_cancelled("again"), None);
    }

    #[test]
    fn test_cancel_in_flight() {
        let core = OperationCore::new();
        core.transition(OperationState::Writing);
        assert_eq!(core.mark_cancelled("teardown"), Some(false));
    }

    #[test]
    fn test_cancel_after_complete() {
        let core = OperationCore::new();
        core.transition(OperationState::Complete);
        assert_eq!(core.mark_cancelled("late"), None);
        assert_eq!(core.state(), OperationState::Complete);
    }

    #[test]
    fn test_reset_for_resend() {
        let core = OperationCore::new();
        core.transition(OperationState::Reading);
        core.reset_for_resend();
        assert_eq!(core.state(), OperationState::WriteQueued);

        core.transition(OperationState::Redirect);
        core.reset_for_resend();
        assert_eq!(core.state(), OperationState::Redirect);
    }

    #[test]
    fn test_handling_node_is_weak() {
        let core = OperationCore::new();
        assert!(core.handling_node().is_none());

        let node = Arc::new(MemcachedNode::new("10.0.0.1:11211"));
        core.set_handling_node(&node);
        assert_eq!(core.handling_node().unwrap().name(), "10.0.0.1:11211");

        drop(node);
        assert!(core.handling_node().is_none());
    }
}
