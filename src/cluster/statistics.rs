use std::fmt;

use serde::Serialize;

use crate::raft::NodeId;

/// Aggregate, read-only view of a cluster at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_nodes: usize,
    pub alive_nodes: usize,
    pub current_term: u64,
    pub leader: Option<NodeId>,
    pub total_messages: u64,
    pub dropped_messages: u64,
    pub blocked_messages: u64,
    pub undeliverable_messages: u64,
    pub delivered_messages: u64,
    pub active_messages: usize,
    pub latency_ms: u64,
    pub drop_rate: f64,
    pub speed_multiplier: f64,
    pub partitions_active: bool,
    pub elapsed_ms: u64,
}

impl Statistics {
    pub fn leader_label(&self) -> String {
        match self.leader {
            Some(id) => id.to_string(),
            None => "None".to_string(),
        }
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={}ms term={} leader={} nodes={}/{} messages={} (sent {}, dropped {}, blocked {}) speed={}x",
            self.elapsed_ms,
            self.current_term,
            self.leader_label(),
            self.alive_nodes,
            self.total_nodes,
            self.active_messages,
            self.total_messages,
            self.dropped_messages,
            self.blocked_messages,
            self.speed_multiplier,
        )?;
        if self.partitions_active {
            write!(f, " PARTITIONED")?;
        }
        Ok(())
    }
}
