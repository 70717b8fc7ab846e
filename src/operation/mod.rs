//! Operation lifecycle and caller-facing futures.
//!
//! Every request sent to a cache node is an [`Operation`]. The transport layer
//! drives it through its states and feeds response bytes back into it; the
//! caller observes the outcome through an [`OperationFuture`].
//!
//! ```text
//! WRITE_QUEUED ──► WRITING ──► READING ──┬──► COMPLETE
//!      │              │           │      └──► REDIRECT (pipelines only)
//!      └──────────────┴───────────┴─────────► CANCELLED
//! ```

mod lifecycle;
mod future;
mod status;

pub use lifecycle::OperationCore;
pub use future::{CancelOnTimeout, Completer, Completion, CompletionPolicy, Delivery, OperationFuture, StrictDeadline};
pub use status::{OperationStatus, StatusCode};

use crate::error::Result;
use crate::node::MemcachedNode;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationState {
    /// Enqueued, not yet flushed to a connection.
    WriteQueued = 0,
    /// Request bytes are being flushed.
    Writing = 1,
    /// Awaiting or consuming response bytes.
    Reading = 2,
    /// Response fully parsed and delivered.
    Complete = 3,
    /// Cancelled by the caller or by connection teardown.
    Cancelled = 4,
    /// The response said the key moved to another node.
    Redirect = 5,
}

impl OperationState {
    /// Convert from u8 representation.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::WriteQueued,
            1 => Self::Writing,
            2 => Self::Reading,
            3 => Self::Complete,
            4 => Self::Cancelled,
            _ => Self::Redirect,
        }
    }

    /// Check if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Redirect)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteQueued => write!(f, "WRITE_QUEUED"),
            Self::Writing => write!(f, "WRITING"),
            Self::Reading => write!(f, "READING"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Redirect => write!(f, "REDIRECT"),
        }
    }
}

/// An outstanding request, as seen by the transport layer.
///
/// The transport calls [`initialize`](Operation::initialize) once, flushes
/// [`write_buffer`](Operation::write_buffer), reports
/// [`write_complete`](Operation::write_complete) and then hands every chunk of
/// response bytes to [`read_from_buffer`](Operation::read_from_buffer) until it
/// returns `true`.
pub trait Operation: Send + Sync + fmt::Debug {
    /// Shared lifecycle bookkeeping.
    fn core(&self) -> &OperationCore;

    /// Build the request bytes.
    fn initialize(&self);

    /// Request bytes produced by [`initialize`](Operation::initialize).
    fn write_buffer(&self) -> Bytes;

    /// Consume response bytes from `buf`.
    ///
    /// Consumes at most up to this operation's terminator and leaves any
    /// following bytes in `buf`. Returns `true` once the response is complete.
    fn read_from_buffer(&self, buf: &mut BytesMut) -> Result<bool>;

    /// Cancel the operation.
    ///
    /// Returns `true` if the operation had not begun writing.
    fn cancel(&self, reason: &str) -> bool;

    /// Current state.
    fn state(&self) -> OperationState {
        self.core().state()
    }

    /// Move to `next`; terminal states are never left.
    fn transition_state(&self, next: OperationState) -> bool {
        self.core().transition(next)
    }

    /// The request bytes were fully flushed.
    fn write_complete(&self) {
        self.core().transition(OperationState::Reading);
    }

    /// Check if the operation was cancelled.
    fn is_cancelled(&self) -> bool {
        self.core().is_cancelled()
    }

    /// Node currently responsible for the operation.
    fn handling_node(&self) -> Option<Arc<MemcachedNode>> {
        self.core().handling_node()
    }

    /// The operation was moved to another node's queue.
    fn handling_node_changed(&self, node: &Arc<MemcachedNode>) {
        self.core().set_handling_node(node);
        self.core().reset_for_resend();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip_and_terminal() {
        for state in [
            OperationState::WriteQueued,
            OperationState::Writing,
            OperationState::Reading,
            OperationState::Complete,
            OperationState::Cancelled,
            OperationState::Redirect,
        ] {
            assert_eq!(OperationState::from_u8(state as u8), state);
        }
        assert!(!OperationState::Reading.is_terminal());
        assert!(OperationState::Redirect.is_terminal());
        assert_eq!(OperationState::WriteQueued.to_string(), "WRITE_QUEUED");
    }
}
