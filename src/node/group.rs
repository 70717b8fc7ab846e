//! Picking a physical node among members that share one ring identity.

use super::MemcachedNode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Role of a node inside its replica group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Accepts writes.
    Master,
    /// Holds a copy of the master's data.
    Replica,
}

/// Chooses which member of a ring entry serves a request.
pub trait NodeSelector: Send + Sync + fmt::Debug {
    /// Pick one member; `None` only when `members` is empty.
    fn select(&self, members: &[Arc<MemcachedNode>]) -> Option<Arc<MemcachedNode>>;
}

/// Always the first registered member.
#[derive(Debug, Default)]
pub struct FirstMember;

impl NodeSelector for FirstMember {
    fn select(&self, members: &[Arc<MemcachedNode>]) -> Option<Arc<MemcachedNode>> {
        members.first().cloned()
    }
}

/// Rotates across members, for pooled connections under one shard name.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl NodeSelector for RoundRobin {
    fn select(&self, members: &[Arc<MemcachedNode>]) -> Option<Arc<MemcachedNode>> {
        if members.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % members.len();
        members.get(idx).cloned()
    }
}

/// The group master if one is registered, otherwise the first member.
#[derive(Debug, Default)]
pub struct MasterPreferred;

impl NodeSelector for MasterPreferred {
    fn select(&self, members: &[Arc<MemcachedNode>]) -> Option<Arc<MemcachedNode>> {
        members
            .iter()
            .find(|m| m.role() == NodeRole::Master)
            .or_else(|| members.first())
            .cloned()
    }
}
