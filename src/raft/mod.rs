mod config;
mod error;
mod log;
mod node;
mod state;

pub use self::config::RaftConfig;
pub use self::error::RaftError;
pub use self::log::{Log, LogEntry, LogEntryInfo};
pub use self::node::{Inbound, RaftNode};
pub use self::state::{NodeInfo, NodeRole, Position};

use serde::{Deserialize, Serialize};

/// Stable node identifier, unique within a cluster.
pub type NodeId = u64;

// Message types for Raft communication. Absent log positions are `None`,
// which orders below every `Some` index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    // Leader election messages
    RequestVote {
        term: u64,
        candidate_id: NodeId,
        last_log_index: Option<u64>,
        last_log_term: u64,
    },
    RequestVoteResponse {
        term: u64,
        vote_granted: bool,
    },

    // Log replication messages
    AppendEntries {
        term: u64,
        leader_id: NodeId,
        prev_log_index: Option<u64>,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: Option<u64>,
    },
    AppendEntriesResponse {
        term: u64,
        success: bool,
    },
}

impl RaftMessage {
    pub fn term(&self) -> u64 {
        match self {
            RaftMessage::RequestVote { term, .. }
            | RaftMessage::RequestVoteResponse { term, .. }
            | RaftMessage::AppendEntries { term, .. }
            | RaftMessage::AppendEntriesResponse { term, .. } => *term,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            RaftMessage::RequestVote { .. } => MessageKind::RequestVote,
            RaftMessage::RequestVoteResponse { .. } => MessageKind::RequestVoteResponse,
            RaftMessage::AppendEntries { entries, .. } if entries.is_empty() => MessageKind::Heartbeat,
            RaftMessage::AppendEntries { .. } => MessageKind::AppendEntries,
            RaftMessage::AppendEntriesResponse { .. } => MessageKind::AppendEntriesResponse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    RequestVote,
    RequestVoteResponse,
    Heartbeat,
    AppendEntries,
    AppendEntriesResponse,
}

/// The only way a node reaches its peers. The cluster implements this over
/// its simulated network for the duration of one node's tick.
pub trait Transport {
    /// Queues `message` for delivery. Returns false if the message was
    /// refused or lost; the sender is never told why.
    fn send(&mut self, from: NodeId, to: NodeId, message: RaftMessage) -> bool;

    /// Ids of alive nodes other than `of`, in ascending order.
    fn alive_peers(&self, of: NodeId) -> Vec<NodeId>;

    /// Number of alive nodes, including the caller.
    fn alive_count(&self) -> usize;

    /// Sends `message` to every other alive node and returns how many sends
    /// were accepted.
    fn broadcast(&mut self, from: NodeId, message: RaftMessage) -> usize {
        let mut sent = 0;
        for peer in self.alive_peers(from) {
            if self.send(from, peer, message.clone()) {
                sent += 1;
            }
        }
        sent
    }
}
