// Consensus core
pub mod raft;
pub mod network;
pub mod cluster;

// Driver
pub mod config;
pub mod repl;

// Public exports
pub use cluster::{Cluster, ClusterConfig, Statistics};
pub use config::{ConfigError, SimConfig};
pub use network::{Network, NetworkConfig};
pub use raft::{NodeId, NodeRole, RaftConfig, RaftError, RaftMessage, RaftNode, Transport};
