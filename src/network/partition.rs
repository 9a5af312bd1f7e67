use std::collections::BTreeSet;

use crate::raft::NodeId;

/// Unordered node pairs that cannot exchange messages.
#[derive(Debug, Clone, Default)]
pub struct PartitionSet {
    pairs: BTreeSet<(NodeId, NodeId)>,
}

fn normalize(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl PartitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks every pair across the two groups. A node listed in both groups
    /// is never blocked from itself.
    pub fn split(&mut self, group_a: &[NodeId], group_b: &[NodeId]) {
        for &a in group_a {
            for &b in group_b {
                if a != b {
                    self.pairs.insert(normalize(a, b));
                }
            }
        }
    }

    pub fn is_blocked(&self, a: NodeId, b: NodeId) -> bool {
        self.pairs.contains(&normalize(a, b))
    }

    /// Nodes that appear in at least one blocked pair.
    pub fn members(&self) -> BTreeSet<NodeId> {
        self.pairs.iter().flat_map(|&(a, b)| [a, b]).collect()
    }

    pub fn remove_node(&mut self, id: NodeId) {
        self.pairs.retain(|&(a, b)| a != id && b != id);
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}
