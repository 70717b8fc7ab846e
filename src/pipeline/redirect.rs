//! Regrouping commands a node refused with `NOT_MY_KEY`.

use super::operation::{PipedCommand, PipelineOperation};
use crate::error::Result;
use crate::node::MemcachedNode;
use crate::operation::Operation;
use crate::partitioning::KetamaLocator;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Misrouted positions of one pipeline operation.
///
/// Created while parsing a response, handed out once by
/// [`PipelineOperation::get_and_clear_redirect_handler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectHandler {
    /// Every relocated position belongs to one key.
    SingleKey { key: String, positions: Vec<usize> },
    /// Relocated positions span several keys, which may now live on
    /// different nodes.
    MultiKey {
        keys: Vec<String>,
        positions: Vec<usize>,
    },
}

impl RedirectHandler {
    /// Build a handler from relocated positions, recovering keys from the
    /// commands' recorded order.
    pub(crate) fn from_positions(commands: &[PipedCommand], positions: Vec<usize>) -> Self {
        let mut seen = HashSet::new();
        let keys: Vec<String> = positions
            .iter()
            .filter_map(|&pos| commands.get(pos))
            .filter(|command| seen.insert(command.key.as_str()))
            .map(|command| command.key.clone())
            .collect();

        match keys.as_slice() {
            [key] => RedirectHandler::SingleKey {
                key: key.clone(),
                positions,
            },
            _ => RedirectHandler::MultiKey { keys, positions },
        }
    }

    /// Distinct misrouted keys, in first-seen order.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            RedirectHandler::SingleKey { key, .. } => vec![key.as_str()],
            RedirectHandler::MultiKey { keys, .. } => keys.iter().map(String::as_str).collect(),
        }
    }

    /// Relocated positions within the operation, ascending.
    pub fn positions(&self) -> &[usize] {
        match self {
            RedirectHandler::SingleKey { positions, .. }
            | RedirectHandler::MultiKey { positions, .. } => positions,
        }
    }

    /// Check if every relocated command targets the same key.
    pub fn is_single_key(&self) -> bool {
        matches!(self, RedirectHandler::SingleKey { .. })
    }

    /// Resolve every misrouted key against the current ring.
    ///
    /// Returns the keys grouped by the node that now owns them.
    pub fn group_redirect_keys(
        &self,
        locator: &KetamaLocator,
        op: &PipelineOperation,
    ) -> Result<HashMap<Arc<MemcachedNode>, Vec<String>>> {
        let rejected_by = op.handling_node();
        let mut groups: HashMap<Arc<MemcachedNode>, Vec<String>> = HashMap::new();

        for key in self.keys() {
            let node = locator.find_node(key)?;
            if rejected_by.as_deref() == Some(node.as_ref()) {
                // the ring has not caught up with the server yet
                warn!(key = %key, node = %node.name(), "Redirected key still routes to the rejecting node");
            }
            groups.entry(node).or_default().push(key.to_string());
        }

        debug!(
            keys = self.keys().len(),
            targets = groups.len(),
            from = rejected_by.as_ref().map(|n| n.name()).unwrap_or("-"),
            "Grouped redirected keys"
        );
        Ok(groups)
    }

    /// Relocated commands of `op` whose key is in `keys`, in request order.
    pub fn commands_for<'a>(&self, op: &'a PipelineOperation, keys: &[String]) -> Vec<&'a PipedCommand> {
        self.positions()
            .iter()
            .filter_map(|&pos| op.command_at(pos))
            .filter(|command| keys.contains(&command.key))
            .collect()
    }
}
