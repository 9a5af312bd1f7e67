//! The cluster owns every node and the simulated network, advances simulated
//! time, and exposes the queries and fault-injection operations a driver
//! needs. Nodes never see each other; each one reaches its peers through a
//! [`Transport`](crate::raft::Transport) borrowed from the cluster while it
//! ticks.

mod statistics;
mod transport;

pub use self::statistics::Statistics;

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::{FRAC_PI_2, TAU};
use std::time::Duration;

use ::log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::network::{MessageInfo, Network};
use crate::raft::{
    LogEntry, NodeId, NodeInfo, Position, RaftConfig, RaftError, RaftMessage, RaftNode,
};

use self::transport::TickTransport;

/// Fewest alive nodes for which a partition is allowed.
pub const MIN_NODES_FOR_PARTITION: usize = 3;

/// Longest span of simulated time one `advance` call covers.
pub const MAX_ADVANCE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub initial_nodes: usize,
    pub max_nodes: usize,
    /// Canvas used to lay out nodes.
    pub width: f64,
    pub height: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            initial_nodes: 5,
            max_nodes: 9,
            width: 800.0,
            height: 600.0,
        }
    }
}

impl ClusterConfig {
    /// Position of node `index` of `count` on a circle around the canvas
    /// centre, starting at twelve o'clock.
    pub fn circle_position(&self, index: usize, count: usize) -> Position {
        let radius = self.width.min(self.height) * 0.3;
        let angle = (index as f64 / count.max(1) as f64) * TAU - FRAC_PI_2;
        Position::new(
            self.width / 2.0 + angle.cos() * radius,
            self.height / 2.0 + angle.sin() * radius,
        )
    }
}

pub struct Cluster {
    nodes: BTreeMap<NodeId, RaftNode>,
    network: Network,
    raft_config: RaftConfig,
    config: ClusterConfig,
    seed: u64,
    rng: StdRng,
    now: Duration,
    request_counter: u64,
}

impl Cluster {
    pub fn new(config: SimConfig) -> Self {
        let seed = config.resolve_seed();
        info!(
            "Creating cluster with {} nodes (seed {})",
            config.cluster.initial_nodes, seed
        );

        let mut cluster = Self {
            nodes: BTreeMap::new(),
            network: Network::new(&config.network, seed),
            raft_config: config.raft,
            config: config.cluster,
            seed,
            rng: StdRng::seed_from_u64(seed.wrapping_add(1)),
            now: Duration::ZERO,
            request_counter: 0,
        };
        cluster.create_initial_nodes();
        cluster
    }

    fn create_initial_nodes(&mut self) {
        let count = self.config.initial_nodes.min(self.config.max_nodes);
        for index in 0..count {
            let position = self.config.circle_position(index, count);
            let node = self.make_node(index as NodeId, position);
            self.nodes.insert(node.id(), node);
        }
    }

    fn make_node(&self, id: NodeId, position: Position) -> RaftNode {
        RaftNode::new(id, position, self.raft_config.clone(), self.seed, self.now)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Simulated time since creation or the last reset.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn node(&self, id: NodeId) -> Option<&RaftNode> {
        self.nodes.get(&id)
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &RaftNode> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn alive_ids(&self) -> BTreeSet<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.is_alive())
            .map(|n| n.id())
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_alive()).count()
    }

    // ------------------------------------------------------------------
    // Simulation
    // ------------------------------------------------------------------

    /// Advances simulated time by `delta` scaled by the speed multiplier:
    /// delivers every message that arrived, then ticks each alive node once
    /// in id order. A single call covers at most [`MAX_ADVANCE`] before
    /// scaling.
    pub fn advance(&mut self, delta: Duration) {
        let scaled = delta
            .min(MAX_ADVANCE)
            .mul_f64(self.network.speed_multiplier());
        self.now = self.now.saturating_add(scaled);

        for mut message in self.network.take_arrived(scaled) {
            let accepted = match self.nodes.get_mut(&message.receiver) {
                Some(node) => node.receive(message.sender, message.content.clone()),
                None => false,
            };
            if accepted {
                self.network.record_delivered(&mut message);
            } else {
                self.network.record_undeliverable(&mut message);
            }
        }

        let alive = self.alive_ids();
        let now = self.now;
        for node in self.nodes.values_mut() {
            if !node.is_alive() {
                continue;
            }
            let mut transport = TickTransport {
                network: &mut self.network,
                alive: &alive,
                now,
            };
            node.tick(now, &mut transport);
        }
    }

    /// Sends a message on behalf of `from`, subject to the same liveness,
    /// partition and drop rules as protocol traffic.
    pub fn send(&mut self, from: NodeId, to: NodeId, message: RaftMessage) -> bool {
        let alive = self.alive_ids();
        let mut transport = TickTransport {
            network: &mut self.network,
            alive: &alive,
            now: self.now,
        };
        crate::raft::Transport::send(&mut transport, from, to, message)
    }

    pub fn broadcast(&mut self, from: NodeId, message: RaftMessage) -> usize {
        let alive = self.alive_ids();
        let mut transport = TickTransport {
            network: &mut self.network,
            alive: &alive,
            now: self.now,
        };
        crate::raft::Transport::broadcast(&mut transport, from, message)
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    pub fn add_node(&mut self, id: NodeId, position: Position) -> Result<(), RaftError> {
        if self.nodes.len() >= self.config.max_nodes {
            return Err(RaftError::ClusterFull {
                max: self.config.max_nodes,
            });
        }
        if self.nodes.contains_key(&id) {
            return Err(RaftError::DuplicateNode(id));
        }

        let node = self.make_node(id, position);
        self.nodes.insert(id, node);
        info!("Added node {id}");
        Ok(())
    }

    /// Adds a node with the next free id at a random spot on the canvas.
    pub fn add_node_auto(&mut self) -> Result<NodeId, RaftError> {
        let id = self.nodes.keys().next_back().map_or(0, |last| last + 1);
        let margin = 100.0_f64;
        let position = Position::new(
            self.random_coordinate(margin, self.config.width - margin),
            self.random_coordinate(margin, self.config.height - margin),
        );
        self.add_node(id, position)?;
        Ok(id)
    }

    fn random_coordinate(&mut self, lo: f64, hi: f64) -> f64 {
        if hi > lo {
            self.rng.random_range(lo..hi)
        } else {
            lo
        }
    }

    pub fn remove_node(&mut self, id: NodeId) -> Result<(), RaftError> {
        let node = self.nodes.get(&id).ok_or(RaftError::UnknownNode(id))?;
        if node.is_alive() && self.alive_count() <= 1 {
            return Err(RaftError::LastAliveNode);
        }

        self.nodes.remove(&id);
        self.network.forget_node(id);
        for peer in self.nodes.values_mut() {
            peer.forget_peer(id);
        }
        self.sync_partition_flags();
        info!("Removed node {id}");
        Ok(())
    }

    /// Removes the node with the highest id.
    pub fn remove_highest_node(&mut self) -> Result<NodeId, RaftError> {
        if self.alive_count() <= 1 {
            return Err(RaftError::LastAliveNode);
        }
        let id = *self.nodes.keys().next_back().ok_or(RaftError::LastAliveNode)?;
        self.remove_node(id)?;
        Ok(id)
    }

    pub fn move_node(&mut self, id: NodeId, position: Position) -> Result<(), RaftError> {
        let node = self.nodes.get_mut(&id).ok_or(RaftError::UnknownNode(id))?;
        node.set_position(position);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    pub fn kill_node(&mut self, id: NodeId) -> Result<(), RaftError> {
        let node = self.nodes.get(&id).ok_or(RaftError::UnknownNode(id))?;
        if !node.is_alive() {
            return Err(RaftError::NodeDead(id));
        }
        if self.alive_count() <= 1 {
            return Err(RaftError::LastAliveNode);
        }

        if let Some(node) = self.nodes.get_mut(&id) {
            node.kill();
        }
        for peer in self.nodes.values_mut() {
            peer.forget_peer(id);
        }
        Ok(())
    }

    /// Kills a uniformly chosen alive node. Refused while at most one node
    /// is alive.
    pub fn kill_random_node(&mut self) -> Result<NodeId, RaftError> {
        let alive: Vec<NodeId> = self.alive_ids().into_iter().collect();
        if alive.len() <= 1 {
            return Err(RaftError::LastAliveNode);
        }
        let id = *alive.choose(&mut self.rng).ok_or(RaftError::LastAliveNode)?;
        self.kill_node(id)?;
        Ok(id)
    }

    pub fn revive_node(&mut self, id: NodeId) -> Result<(), RaftError> {
        let now = self.now;
        let node = self.nodes.get_mut(&id).ok_or(RaftError::UnknownNode(id))?;
        node.revive(now);
        Ok(())
    }

    /// Revives every dead node and returns how many came back.
    pub fn revive_all(&mut self) -> usize {
        let now = self.now;
        let mut revived = 0;
        for node in self.nodes.values_mut().filter(|n| !n.is_alive()) {
            node.revive(now);
            revived += 1;
        }
        if revived > 0 {
            info!("Revived {revived} nodes");
        }
        revived
    }

    /// Blocks all traffic between the two groups in both directions.
    pub fn partition(&mut self, group_a: &[NodeId], group_b: &[NodeId]) -> Result<(), RaftError> {
        let alive = self.alive_count();
        if alive < MIN_NODES_FOR_PARTITION {
            return Err(RaftError::NotEnoughNodes {
                alive,
                required: MIN_NODES_FOR_PARTITION,
            });
        }
        if group_a.is_empty() || group_b.is_empty() {
            return Err(RaftError::EmptyPartitionGroup);
        }
        if let Some(&unknown) = group_a
            .iter()
            .chain(group_b)
            .find(|id| !self.nodes.contains_key(id))
        {
            return Err(RaftError::UnknownNode(unknown));
        }

        self.network.partition(group_a, group_b);
        self.sync_partition_flags();
        info!("Created partition: {group_a:?} | {group_b:?}");
        Ok(())
    }

    /// Splits the alive nodes into two random halves.
    pub fn partition_random(&mut self) -> Result<(Vec<NodeId>, Vec<NodeId>), RaftError> {
        let mut alive: Vec<NodeId> = self.alive_ids().into_iter().collect();
        if alive.len() < MIN_NODES_FOR_PARTITION {
            return Err(RaftError::NotEnoughNodes {
                alive: alive.len(),
                required: MIN_NODES_FOR_PARTITION,
            });
        }
        alive.shuffle(&mut self.rng);
        let group_b = alive.split_off(alive.len() / 2);
        let mut group_a = alive;
        group_a.sort_unstable();
        let mut group_b = group_b;
        group_b.sort_unstable();

        self.partition(&group_a, &group_b)?;
        Ok((group_a, group_b))
    }

    /// Clears every partition at once.
    pub fn heal_partition(&mut self) {
        self.network.heal();
        self.sync_partition_flags();
        info!("Network partition healed");
    }

    fn sync_partition_flags(&mut self) {
        let members = self.network.partitions().members();
        let now = self.now;
        for node in self.nodes.values_mut() {
            node.set_partitioned(members.contains(&node.id()), now);
        }
    }

    pub fn set_latency(&mut self, ms: u64) {
        self.network.set_latency(ms);
    }

    pub fn add_latency(&mut self, ms: u64) -> u64 {
        let total = self.network.add_latency(ms);
        info!("Added {ms}ms latency (total: {total}ms)");
        total
    }

    pub fn set_drop_rate(&mut self, rate: f64) {
        self.network.set_drop_rate(rate);
    }

    pub fn set_speed_multiplier(&mut self, multiplier: f64) {
        self.network.set_speed_multiplier(multiplier);
    }

    // ------------------------------------------------------------------
    // Client requests
    // ------------------------------------------------------------------

    pub fn submit_client_command(&mut self, command: &str) -> Result<LogEntry, RaftError> {
        let leader = self.current_leader().map(|n| n.id()).ok_or(RaftError::NoLeader)?;
        let now = self.now;
        let node = self.nodes.get_mut(&leader).ok_or(RaftError::NoLeader)?;
        let entry = node.submit_command(command, now)?;
        info!("Added client request: {command}");
        Ok(entry)
    }

    /// Submits the next numbered `REQUEST_n` command.
    pub fn submit_request(&mut self) -> Result<LogEntry, RaftError> {
        self.request_counter += 1;
        let command = format!("REQUEST_{}", self.request_counter);
        self.submit_client_command(&command)
    }

    /// Submits `count` numbered `BURST_n` commands; returns how many a leader
    /// accepted.
    pub fn submit_burst(&mut self, count: usize) -> usize {
        let mut accepted = 0;
        for _ in 0..count {
            self.request_counter += 1;
            let command = format!("BURST_{}", self.request_counter);
            if self.submit_client_command(&command).is_ok() {
                accepted += 1;
            }
        }
        info!("Sent burst of {accepted} requests");
        accepted
    }

    /// Commits and applies the current leader's log through `index`. This is
    /// an explicit operation; acknowledgements never commit on their own.
    pub fn commit_leader_log(&mut self, index: u64) -> Result<Option<u64>, RaftError> {
        let leader = self.current_leader().map(|n| n.id()).ok_or(RaftError::NoLeader)?;
        let node = self.nodes.get_mut(&leader).ok_or(RaftError::NoLeader)?;
        let committed = node.commit_to(index);
        node.apply_committed();
        debug!("Leader {leader} committed through {committed:?}");
        Ok(committed)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The first alive leader in id order. More than one node can claim
    /// leadership of different terms at once, since a deposed leader only
    /// steps down after it observes the higher term.
    pub fn current_leader(&self) -> Option<&RaftNode> {
        self.nodes.values().find(|n| n.is_alive() && n.is_leader())
    }

    pub fn leaders(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.is_alive() && n.is_leader())
            .map(|n| n.id())
            .collect()
    }

    /// Highest term among alive nodes.
    pub fn current_term(&self) -> u64 {
        self.nodes
            .values()
            .filter(|n| n.is_alive())
            .map(|n| n.current_term())
            .max()
            .unwrap_or(0)
    }

    pub fn statistics(&self) -> Statistics {
        let metrics = self.network.metrics();
        Statistics {
            total_nodes: self.nodes.len(),
            alive_nodes: self.alive_count(),
            current_term: self.current_term(),
            leader: self.current_leader().map(|n| n.id()),
            total_messages: metrics.sent,
            dropped_messages: metrics.dropped,
            blocked_messages: metrics.blocked,
            undeliverable_messages: metrics.undeliverable,
            delivered_messages: metrics.delivered,
            active_messages: self.network.in_flight().len(),
            latency_ms: self.network.latency_ms(),
            drop_rate: self.network.drop_rate(),
            speed_multiplier: self.network.speed_multiplier(),
            partitions_active: !self.network.partitions().is_empty(),
            elapsed_ms: self.now.as_millis() as u64,
        }
    }

    pub fn node_infos(&self) -> Vec<NodeInfo> {
        self.nodes.values().map(|n| n.info()).collect()
    }

    pub fn messages(&self) -> Vec<MessageInfo> {
        self.network
            .in_flight()
            .iter()
            .map(|m| m.info(self.now))
            .collect()
    }

    /// Pairs of alive nodes that can currently exchange messages.
    pub fn connections(&self) -> Vec<(NodeId, NodeId)> {
        let alive: Vec<NodeId> = self.alive_ids().into_iter().collect();
        let mut pairs = Vec::new();
        for (i, &a) in alive.iter().enumerate() {
            for &b in &alive[i + 1..] {
                if !self.network.is_partitioned(a, b) {
                    pairs.push((a, b));
                }
            }
        }
        pairs
    }

    /// Hit-test for a UI pointer. Pure geometry.
    pub fn node_at(&self, point: Position) -> Option<&RaftNode> {
        self.nodes.values().find(|n| n.contains(&point))
    }

    /// Returns every node to a fresh follower and clears the network,
    /// keeping membership and the speed multiplier.
    pub fn reset(&mut self) {
        self.now = Duration::ZERO;
        self.network.reset();
        self.request_counter = 0;
        for node in self.nodes.values_mut() {
            node.reset(Duration::ZERO);
        }
        warn!("Simulation reset");
    }
}
