//! Consistent hash ring locator.
//!
//! Each routing key (node address, shard name or replica-group name) owns
//! `repetitions` points on a 32-bit ring. A cache key is served by the first
//! point at or after its hash, wrapping to the lowest point.
//!
//! The ring is immutable once built. Topology changes build a new ring and
//! swap it in, so a lookup only holds the read lock long enough to clone an
//! `Arc`.

use super::HashAlgorithm;
use crate::config::LocatorConfig;
use crate::error::{Error, Result};
use crate::node::{FirstMember, MasterPreferred, MemcachedNode, NodeSelector};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// How a node's ring identity is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingMode {
    /// One ring identity per node address.
    Address,
    /// Nodes sharing a shard name share one ring identity.
    ShardKey,
    /// The ring maps keys to replica groups.
    ReplicaGroup,
}

/// Everything registered under one routing key.
#[derive(Debug, Clone)]
pub struct RingEntry {
    routing_key: Arc<str>,
    members: Vec<Arc<MemcachedNode>>,
}

impl RingEntry {
    /// Ring identity.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Physical nodes registered under this identity, in insertion order.
    pub fn members(&self) -> &[Arc<MemcachedNode>] {
        &self.members
    }

    fn contains(&self, node: &MemcachedNode) -> bool {
        self.members.iter().any(|m| m.name() == node.name())
    }
}

#[derive(Debug, Clone, Default)]
struct Ring {
    /// Ring position to routing key.
    points: BTreeMap<u32, Arc<str>>,
    entries: HashMap<Arc<str>, Arc<RingEntry>>,
}

impl Ring {
    fn entry_at(&self, hash: u32) -> Option<&Arc<RingEntry>> {
        let (_, routing_key) = self
            .points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())?;
        self.entries.get(routing_key)
    }
}

/// Consistent-hash locator over cache nodes.
#[derive(Debug)]
pub struct KetamaLocator {
    repetitions: usize,
    hash: HashAlgorithm,
    replication: bool,
    shard_key_enabled: AtomicBool,
    selector: Arc<dyn NodeSelector>,

    /// Current ring; replaced wholesale on every topology change.
    ring: RwLock<Arc<Ring>>,
    /// Serializes writers so concurrent updates do not lose each other.
    update_lock: Mutex<()>,
}

impl KetamaLocator {
    /// Create an empty locator, rejecting a config that cannot place points.
    pub fn new(config: &LocatorConfig) -> Result<Self> {
        config.validate()?;
        let selector: Arc<dyn NodeSelector> = if config.replication_enabled {
            Arc::new(MasterPreferred)
        } else {
            Arc::new(FirstMember)
        };
        Ok(Self {
            repetitions: config.repetitions,
            hash: config.hash,
            replication: config.replication_enabled,
            shard_key_enabled: AtomicBool::new(config.shard_key_enabled),
            selector,
            ring: RwLock::new(Arc::new(Ring::default())),
            update_lock: Mutex::new(()),
        })
    }

    /// Replace the policy that picks a member of a shard or replica group.
    pub fn with_selector(mut self, selector: Arc<dyn NodeSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Ring points per routing key.
    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    /// Check if shard-key routing is on.
    pub fn is_shard_key_enabled(&self) -> bool {
        self.shard_key_enabled.load(Ordering::Acquire)
    }

    /// Toggle shard-key routing.
    ///
    /// Only nodes inserted afterwards are affected; call
    /// [`update_nodes`](Self::update_nodes) to rebuild the whole ring.
    pub fn enable_shard_key(&self, enabled: bool) {
        self.shard_key_enabled.store(enabled, Ordering::Release);
        info!(enabled, "Shard-key routing toggled");
    }

    /// How routing keys are derived for nodes inserted now.
    pub fn routing_mode(&self) -> RoutingMode {
        if self.replication {
            RoutingMode::ReplicaGroup
        } else if self.is_shard_key_enabled() {
            RoutingMode::ShardKey
        } else {
            RoutingMode::Address
        }
    }

    fn snapshot(&self) -> Arc<Ring> {
        Arc::clone(&self.ring.read())
    }

    fn install(&self, ring: Ring) {
        *self.ring.write() = Arc::new(ring);
    }

    /// Add a node.
    ///
    /// A node whose routing key is already on the ring only joins that entry;
    /// no new points are created.
    pub fn insert(&self, node: Arc<MemcachedNode>) {
        let _guard = self.update_lock.lock();
        let mut ring = (*self.snapshot()).clone();
        self.insert_into(&mut ring, node);
        self.install(ring);
    }

    fn insert_into(&self, ring: &mut Ring, node: Arc<MemcachedNode>) {
        let routing_key: Arc<str> = Arc::from(node.routing_key(self.routing_mode()));

        if let Some(entry) = ring.entries.get(&routing_key) {
            if entry.contains(&node) {
                return;
            }
            let mut entry = (**entry).clone();
            debug!(node = %node.name(), routing_key = %routing_key, "Node joined existing ring entry");
            entry.members.push(node);
            ring.entries.insert(routing_key, Arc::new(entry));
            return;
        }

        for point in self.hash.ring_points(&routing_key, self.repetitions) {
            ring.points.insert(point, Arc::clone(&routing_key));
        }
        info!(node = %node.name(), routing_key = %routing_key, points = self.repetitions, "Node added to ring");
        ring.entries.insert(
            Arc::clone(&routing_key),
            Arc::new(RingEntry {
                routing_key,
                members: vec![node],
            }),
        );
    }

    /// Remove a node. Returns `false` if it was not on the ring.
    ///
    /// Ring points are dropped only when the last member of an entry leaves,
    /// and only points still owned by that entry are touched.
    pub fn remove(&self, node: &MemcachedNode) -> bool {
        let _guard = self.update_lock.lock();
        let mut ring = (*self.snapshot()).clone();

        let Some(entry) = ring.entries.values().find(|e| e.contains(node)).cloned() else {
            return false;
        };

        let mut remaining = (*entry).clone();
        remaining.members.retain(|m| m.name() != node.name());

        if remaining.members.is_empty() {
            let routing_key = Arc::clone(&entry.routing_key);
            ring.points.retain(|_, owner| *owner != routing_key);
            ring.entries.remove(&routing_key);
            info!(node = %node.name(), routing_key = %routing_key, "Node removed from ring");
        } else {
            debug!(node = %node.name(), routing_key = %entry.routing_key, "Node left ring entry");
            ring.entries
                .insert(Arc::clone(&entry.routing_key), Arc::new(remaining));
        }

        self.install(ring);
        true
    }

    /// Rebuild the ring from a complete node list.
    pub fn update_nodes(&self, nodes: Vec<Arc<MemcachedNode>>) {
        let _guard = self.update_lock.lock();
        let mut ring = Ring::default();
        let count = nodes.len();
        for node in nodes {
            self.insert_into(&mut ring, node);
        }
        self.install(ring);
        info!(nodes = count, mode = ?self.routing_mode(), "Ring rebuilt");
    }

    /// Ring entry serving `key`.
    pub fn find_entry(&self, key: &str) -> Result<Arc<RingEntry>> {
        let ring = self.snapshot();
        ring.entry_at(self.hash.hash_key(key.as_bytes()))
            .cloned()
            .ok_or(Error::NoNodeAvailable)
    }

    /// Node serving `key`.
    pub fn find_node(&self, key: &str) -> Result<Arc<MemcachedNode>> {
        let entry = self.find_entry(key)?;
        self.selector
            .select(entry.members())
            .ok_or(Error::NoNodeAvailable)
    }

    /// Number of physical nodes.
    pub fn node_count(&self) -> usize {
        self.snapshot().entries.values().map(|e| e.members.len()).sum()
    }

    /// Number of points on the ring.
    pub fn point_count(&self) -> usize {
        self.snapshot().points.len()
    }

    /// Routing keys currently on the ring, sorted.
    pub fn routing_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .snapshot()
            .entries
            .keys()
            .map(|k| k.to_string())
            .collect();
        keys.sort();
        keys
    }

    /// All physical nodes, sorted by address.
    pub fn all_nodes(&self) -> Vec<Arc<MemcachedNode>> {
        let mut nodes: Vec<_> = self
            .snapshot()
            .entries
            .values()
            .flat_map(|e| e.members.iter().cloned())
            .collect();
        nodes.sort_by(|a, b| a.name().cmp(b.name()));
        nodes
    }

    /// Check if a node is on the ring.
    pub fn contains(&self, node: &MemcachedNode) -> bool {
        self.snapshot().entries.values().any(|e| e.contains(node))
    }

    /// Count how many of `sample_size` synthetic keys land on each routing key.
    pub fn distribution(&self, sample_size: usize) -> HashMap<String, usize> {
        let ring = self.snapshot();
        let mut distribution = HashMap::new();
        for i in 0..sample_size {
            let key = format!("sample_key_{}", i);
            if let Some(entry) = ring.entry_at(self.hash.hash_key(key.as_bytes())) {
                *distribution.entry(entry.routing_key().to_string()).or_insert(0) += 1;
            }
        }
        distribution
    }
}
