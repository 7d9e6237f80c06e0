//! Occupancy view of the configured datanodes.
//!
//! The whole collection sits behind one lock and every public operation takes
//! it exactly once, so selection and the occupancy update it implies are atomic
//! with respect to each other.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub type NodeId = usize;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeState {
    pub addrs: String,
    pub occupied_bytes: u64,
}

#[derive(Debug)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<NodeState>>,
}

impl NodeRegistry {
    pub fn new(nodes: Vec<NodeState>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }
    fn read(&self) -> RwLockReadGuard<'_, Vec<NodeState>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }
    fn write(&self) -> RwLockWriteGuard<'_, Vec<NodeState>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // earlier nodes win ties
    pub fn select_least_loaded(&self) -> Option<(NodeId, String)> {
        let nodes = self.read();
        least_loaded(&nodes).map(|id| (id, nodes[id].addrs.clone()))
    }

    pub fn assign(&self, bytes: u64) -> Option<(NodeId, String)> {
        let mut nodes = self.write();
        let id = least_loaded(&nodes)?;
        let node = &mut nodes[id];
        node.occupied_bytes = node.occupied_bytes.saturating_add(bytes);
        Some((id, node.addrs.clone()))
    }

    pub fn record_usage(&self, node: NodeId, delta: i64) -> Option<u64> {
        let mut nodes = self.write();
        let state = nodes.get_mut(node)?;
        state.occupied_bytes = if delta >= 0 {
            state.occupied_bytes.saturating_add(delta.unsigned_abs())
        } else {
            state.occupied_bytes.saturating_sub(delta.unsigned_abs())
        };
        Some(state.occupied_bytes)
    }

    pub fn occupancy(&self, node: NodeId) -> Option<u64> {
        self.read().get(node).map(|n| n.occupied_bytes)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.read().iter().map(|n| n.addrs.clone()).collect()
    }

    pub fn snapshot(&self) -> Vec<NodeState> {
        self.read().clone()
    }
}

fn least_loaded(nodes: &[NodeState]) -> Option<NodeId> {
    nodes
        .iter()
        .enumerate()
        .min_by_key(|(id, node)| (node.occupied_bytes, *id))
        .map(|(id, _)| id)
}
