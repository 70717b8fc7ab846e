//! Cache server identities and their operation queues.
//!
//! A [`MemcachedNode`] is a logical server: an address plus, optionally, the
//! shard name or replica group it routes under. Each node owns three queues
//! that the transport drains:
//!
//! ```text
//!  add_operation ──► input ──fill_write_queue──► write ──take_write_op──► read
//!                                                                          │
//!                                                   complete_read_op ◄─────┘
//! ```
//!
//! Every queue has its own lock, and no method holds two queue locks (or two
//! nodes' locks) at once.

mod group;

pub use group::{FirstMember, MasterPreferred, NodeRole, NodeSelector, RoundRobin};

use crate::operation::{Operation, OperationState};
use crate::partitioning::RoutingMode;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type OpQueue = Mutex<VecDeque<Arc<dyn Operation>>>;

/// A logical cache server.
pub struct MemcachedNode {
    /// Address, `host:port`.
    name: String,
    /// Shard name shared by pooled connections.
    shard_key: Option<String>,
    /// Replica group name.
    group: Option<String>,
    /// Role inside the replica group.
    role: NodeRole,

    input_queue: OpQueue,
    write_queue: OpQueue,
    read_queue: OpQueue,

    /// Operations ever added to this node, including moved ones.
    added_ops: AtomicU64,
    /// Consecutive timeouts since the last success.
    continuous_timeouts: AtomicU32,
}

impl MemcachedNode {
    /// Create a node identified by its address.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shard_key: None,
            group: None,
            role: NodeRole::Master,
            input_queue: Mutex::new(VecDeque::new()),
            write_queue: Mutex::new(VecDeque::new()),
            read_queue: Mutex::new(VecDeque::new()),
            added_ops: AtomicU64::new(0),
            continuous_timeouts: AtomicU32::new(0),
        }
    }

    /// Set the shard name.
    pub fn with_shard_key(mut self, shard_key: impl Into<String>) -> Self {
        self.shard_key = Some(shard_key.into());
        self
    }

    /// Set the replica group and role.
    pub fn with_group(mut self, group: impl Into<String>, role: NodeRole) -> Self {
        self.group = Some(group.into());
        self.role = role;
        self
    }

    /// Node address.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shard name, if any.
    pub fn shard_key(&self) -> Option<&str> {
        self.shard_key.as_deref()
    }

    /// Replica group name, if any.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Role inside the replica group.
    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Identity this node occupies on the hash ring under `mode`.
    ///
    /// Falls back to the address when the node lacks the shard name or group
    /// the mode asks for.
    pub fn routing_key(&self, mode: RoutingMode) -> &str {
        let derived = match mode {
            RoutingMode::Address => None,
            RoutingMode::ShardKey => self.shard_key.as_deref(),
            RoutingMode::ReplicaGroup => self.group.as_deref(),
        };
        match derived {
            Some(key) => key,
            None => {
                if mode != RoutingMode::Address {
                    warn!(node = %self.name, mode = ?mode, "Node has no routing identity for mode, using address");
                }
                &self.name
            }
        }
    }

    // ---- queues --------------------------------------------------------

    /// Enqueue a new operation on this node.
    pub fn add_operation(self: &Arc<Self>, op: Arc<dyn Operation>) {
        op.core().set_handling_node(self);
        self.input_queue.lock().push_back(op);
        self.added_ops.fetch_add(1, Ordering::Relaxed);
    }

    /// Move queued input into the write queue, dropping cancelled operations.
    pub fn fill_write_queue(&self) -> usize {
        let drained: Vec<_> = self.input_queue.lock().drain(..).collect();
        let mut write_queue = self.write_queue.lock();
        let mut moved = 0;
        for op in drained {
            if op.is_cancelled() {
                continue;
            }
            write_queue.push_back(op);
            moved += 1;
        }
        moved
    }

    /// Take the next operation to write.
    ///
    /// Cancelled operations are dropped without being written. The returned
    /// operation is initialized, marked `WRITING` and placed on the read queue.
    pub fn take_write_op(&self) -> Option<Arc<dyn Operation>> {
        let op = loop {
            let op = self.write_queue.lock().pop_front()?;
            if op.is_cancelled() {
                debug!(node = %self.name, "Dropping cancelled operation before write");
                continue;
            }
            break op;
        };
        op.initialize();
        op.transition_state(OperationState::Writing);
        self.read_queue.lock().push_back(Arc::clone(&op));
        Some(op)
    }

    /// Operation whose response is currently being read.
    pub fn current_read_op(&self) -> Option<Arc<dyn Operation>> {
        self.read_queue.lock().front().cloned()
    }

    /// Remove the operation at the head of the read queue.
    pub fn complete_read_op(&self) -> Option<Arc<dyn Operation>> {
        self.read_queue.lock().pop_front()
    }

    /// Move every unfinished operation to `target`'s write queue.
    ///
    /// Read-queue operations come first, then write-queue, then input, so
    /// that per-node submission order is kept. Returns the number moved.
    pub fn move_operations_to(&self, target: &Arc<MemcachedNode>) -> usize {
        if std::ptr::eq(self, Arc::as_ptr(target)) {
            return 0;
        }

        let mut drained: Vec<Arc<dyn Operation>> = Vec::new();
        drained.extend(self.read_queue.lock().drain(..));
        drained.extend(self.write_queue.lock().drain(..));
        drained.extend(self.input_queue.lock().drain(..));

        let movable: Vec<_> = drained
            .into_iter()
            .filter(|op| !op.state().is_terminal())
            .collect();
        for op in &movable {
            op.handling_node_changed(target);
        }

        let moved = movable.len();
        target.write_queue.lock().extend(movable);
        target.added_ops.fetch_add(moved as u64, Ordering::Relaxed);

        info!(from = %self.name, to = %target.name, moved, "Moved operations between nodes");
        moved
    }

    /// Cancel every queued operation, e.g. on connection teardown.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let mut drained: Vec<Arc<dyn Operation>> = Vec::new();
        drained.extend(self.read_queue.lock().drain(..));
        drained.extend(self.write_queue.lock().drain(..));
        drained.extend(self.input_queue.lock().drain(..));
        let count = drained.len();
        for op in drained {
            op.cancel(reason);
        }
        count
    }

    /// Operations waiting in the input queue.
    pub fn input_queue_len(&self) -> usize {
        self.input_queue.lock().len()
    }

    /// Operations waiting to be written.
    pub fn write_queue_len(&self) -> usize {
        self.write_queue.lock().len()
    }

    /// Operations awaiting a response.
    pub fn read_queue_len(&self) -> usize {
        self.read_queue.lock().len()
    }

    /// Operations ever added to this node.
    pub fn added_op_count(&self) -> u64 {
        self.added_ops.load(Ordering::Relaxed)
    }

    // ---- health accounting ----------------------------------------------

    /// Consecutive timeouts since the last success.
    pub fn continuous_timeouts(&self) -> u32 {
        self.continuous_timeouts.load(Ordering::Relaxed)
    }

    /// Record a timeout, returning the new count.
    pub fn increment_continuous_timeout(&self) -> u32 {
        self.continuous_timeouts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a non-timeout completion.
    pub fn reset_continuous_timeout(&self) {
        self.continuous_timeouts.store(0, Ordering::Relaxed);
    }
}

impl PartialEq for MemcachedNode {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for MemcachedNode {}

impl Hash for MemcachedNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for MemcachedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcachedNode")
            .field("name", &self.name)
            .field("shard_key", &self.shard_key)
            .field("group", &self.group)
            .field("role", &self.role)
            .field("continuous_timeouts", &self.continuous_timeouts())
            .finish()
    }
}

impl fmt::Display for MemcachedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::operation::OperationCore;
    use bytes::{Bytes, BytesMut};
    use std::thread;

    #[derive(Debug, Default)]
    struct QueuedOp {
        core: OperationCore,
    }

    impl Operation for QueuedOp {
        fn core(&self) -> &OperationCore {
            &self.core
        }

        fn initialize(&self) {}

        fn write_buffer(&self) -> Bytes {
            Bytes::from_static(b"noop\r\n")
        }

        fn read_from_buffer(&self, _buf: &mut BytesMut) -> Result<bool> {
            self.core.transition(OperationState::Complete);
            Ok(true)
        }

        fn cancel(&self, reason: &str) -> bool {
            self.core.mark_cancelled(reason).unwrap_or(false)
        }
    }

    fn op() -> Arc<QueuedOp> {
        Arc::new(QueuedOp::default())
    }

    #[test]
    fn test_routing_key_modes() {
        let plain = MemcachedNode::new("10.0.0.1:11211");
        assert_eq!(plain.routing_key(RoutingMode::Address), "10.0.0.1:11211");
        assert_eq!(plain.routing_key(RoutingMode::ShardKey), "10.0.0.1:11211");

        let shard = MemcachedNode::new("10.0.0.1:11211").with_shard_key("shard-a");
        assert_eq!(shard.routing_key(RoutingMode::ShardKey), "shard-a");
        assert_eq!(shard.routing_key(RoutingMode::Address), "10.0.0.1:11211");

        let replica = MemcachedNode::new("10.0.0.2:11211").with_group("g1", NodeRole::Replica);
        assert_eq!(replica.routing_key(RoutingMode::ReplicaGroup), "g1");
        assert_eq!(replica.role(), NodeRole::Replica);
    }

    #[test]
    fn test_queue_flow() {
        let node = Arc::new(MemcachedNode::new("n1:11211"));
        let first = op();
        let second = op();
        node.add_operation(first.clone());
        node.add_operation(second.clone());
        assert_eq!(node.input_queue_len(), 2);
        assert_eq!(node.added_op_count(), 2);
        assert_eq!(first.handling_node().unwrap().name(), "n1:11211");

        second.cancel("caller");
        assert_eq!(node.fill_write_queue(), 1);
        assert_eq!(node.write_queue_len(), 1);

        let writing = node.take_write_op().unwrap();
        assert_eq!(writing.state(), OperationState::Writing);
        assert_eq!(node.read_queue_len(), 1);
        assert!(node.take_write_op().is_none());

        writing.write_complete();
        let reading = node.current_read_op().unwrap();
        assert_eq!(reading.state(), OperationState::Reading);
        assert!(reading.read_from_buffer(&mut BytesMut::new()).unwrap());
        node.complete_read_op();
        assert_eq!(node.read_queue_len(), 0);
    }

    #[test]
    fn test_move_operations() {
        let from = Arc::new(MemcachedNode::new("old:11211"));
        let to = Arc::new(MemcachedNode::new("new:11211"));

        let in_flight = op();
        let queued = op();
        let pending = op();
        let done = op();

        from.add_operation(in_flight.clone());
        from.add_operation(queued.clone());
        from.fill_write_queue();
        from.take_write_op();
        from.add_operation(pending.clone());
        from.add_operation(done.clone());
        done.core.transition(OperationState::Complete);

        let moved = from.move_operations_to(&to);

        assert_eq!(moved, 3);
        assert_eq!(from.read_queue_len() + from.write_queue_len() + from.input_queue_len(), 0);
        assert_eq!(to.write_queue_len(), 3);
        assert_eq!(to.added_op_count(), 3);

        // moved operations will be written again by the new node
        assert_eq!(in_flight.state(), OperationState::WriteQueued);
        assert_eq!(in_flight.handling_node().unwrap().name(), "new:11211");

        // read-queue operations keep their place ahead of later ones
        let first = to.take_write_op().unwrap();
        assert!(std::ptr::eq(
            Arc::as_ptr(&first) as *const (),
            Arc::as_ptr(&in_flight) as *const ()
        ));
    }

    #[test]
    fn test_move_to_self_is_noop() {
        let node = Arc::new(MemcachedNode::new("n1:11211"));
        node.add_operation(op());
        assert_eq!(node.move_operations_to(&node), 0);
        assert_eq!(node.input_queue_len(), 1);
    }

    #[test]
    fn test_cancel_all() {
        let node = Arc::new(MemcachedNode::new("n1:11211"));
        let a = op();
        node.add_operation(a.clone());
        assert_eq!(node.cancel_all("connection lost"), 1);
        assert!(a.is_cancelled());
    }

    #[test]
    fn test_continuous_timeout_counter() {
        let node = Arc::new(MemcachedNode::new("n1:11211"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let node = node.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        node.increment_continuous_timeout();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(node.continuous_timeouts(), 800);

        node.reset_continuous_timeout();
        assert_eq!(node.continuous_timeouts(), 0);
    }
}
