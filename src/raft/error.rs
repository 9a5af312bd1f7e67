use thiserror::Error;

use super::NodeId;

/// Rejected operations. None of these are fatal: the cluster is left
/// untouched and the caller decides whether to report the rejection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaftError {
    #[error("No leader available to handle request")]
    NoLeader,

    #[error("Node {0} is not the leader")]
    NotLeader(NodeId),

    #[error("Cannot remove or kill the last alive node")]
    LastAliveNode,

    #[error("Need at least {required} alive nodes, have {alive}")]
    NotEnoughNodes { alive: usize, required: usize },

    #[error("Cluster is full (maximum of {max} nodes)")]
    ClusterFull { max: usize },

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Node {0} already exists")]
    DuplicateNode(NodeId),

    #[error("Node {0} is dead")]
    NodeDead(NodeId),

    #[error("Partition groups must both be non-empty")]
    EmptyPartitionGroup,
}
