use std::collections::BTreeSet;
use std::time::Duration;

use crate::network::Network;
use crate::raft::{NodeId, RaftMessage, Transport};

/// The view of the network handed to one node while it ticks. Liveness is
/// frozen for the whole node phase of an `advance`.
pub(crate) struct TickTransport<'a> {
    pub(crate) network: &'a mut Network,
    pub(crate) alive: &'a BTreeSet<NodeId>,
    pub(crate) now: Duration,
}

impl Transport for TickTransport<'_> {
    fn send(&mut self, from: NodeId, to: NodeId, message: RaftMessage) -> bool {
        if from == to || !self.alive.contains(&from) || !self.alive.contains(&to) {
            return false;
        }
        self.network.send(from, to, message, self.now).is_sent()
    }

    fn alive_peers(&self, of: NodeId) -> Vec<NodeId> {
        self.alive.iter().copied().filter(|id| *id != of).collect()
    }

    fn alive_count(&self) -> usize {
        self.alive.len()
    }
}
