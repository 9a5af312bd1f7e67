use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;
// Use external log crate, not our own log module
use ::log::{debug, info, trace};

use super::{
    Log, LogEntry, NodeId, NodeInfo, NodeRole, Position, RaftConfig, RaftError, RaftMessage,
    Transport,
};

/// A delivered message waiting in a node's inbox.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub from: NodeId,
    pub message: RaftMessage,
}

pub struct RaftNode {
    // Node identity
    id: NodeId,
    position: Position,

    // Raft state
    role: NodeRole,
    current_term: u64,
    voted_for: Option<NodeId>,
    leader_id: Option<NodeId>,
    log: Log,
    commit_index: Option<u64>,
    last_applied: Option<u64>,

    // Configuration
    config: RaftConfig,
    rng: StdRng,

    // Timers, in simulated time
    election_deadline: Duration,
    heartbeat_deadline: Duration,

    // Election state
    votes_received: BTreeSet<NodeId>,

    // Leader state
    next_index: BTreeMap<NodeId, u64>,
    match_index: BTreeMap<NodeId, Option<u64>>,

    // Fault state
    alive: bool,
    partitioned: bool,

    inbox: VecDeque<Inbound>,

    // Statistics
    messages_received: u64,
    messages_sent: u64,
}

impl RaftNode {
    /// Creates a follower whose first election deadline is drawn relative to
    /// `now`. The timer RNG is derived from `seed` and the node id.
    pub fn new(id: NodeId, position: Position, config: RaftConfig, seed: u64, now: Duration) -> Self {
        let rng = StdRng::seed_from_u64(seed ^ id.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut node = Self {
            id,
            position,
            role: NodeRole::Follower,
            current_term: 0,
            voted_for: None,
            leader_id: None,
            log: Log::new(),
            commit_index: None,
            last_applied: None,
            config,
            rng,
            election_deadline: Duration::ZERO,
            heartbeat_deadline: Duration::ZERO,
            votes_received: BTreeSet::new(),
            next_index: BTreeMap::new(),
            match_index: BTreeMap::new(),
            alive: true,
            partitioned: false,
            inbox: VecDeque::new(),
            messages_received: 0,
            messages_sent: 0,
        };
        node.reset_election_deadline(now);
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.leader_id
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn commit_index(&self) -> Option<u64> {
        self.commit_index
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn next_index(&self) -> &BTreeMap<NodeId, u64> {
        &self.next_index
    }

    pub fn match_index(&self) -> &BTreeMap<NodeId, Option<u64>> {
        &self.match_index
    }

    pub fn election_deadline(&self) -> Duration {
        self.election_deadline
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role, NodeRole::Leader)
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitioned
    }

    /// A node leaving a partition gets a fresh election deadline, so it hears
    /// from the current leader before its suppressed timer can fire.
    pub fn set_partitioned(&mut self, partitioned: bool, now: Duration) {
        if self.partitioned && !partitioned && self.alive {
            self.reset_election_deadline(now);
        }
        self.partitioned = partitioned;
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    /// Hit-test against the node's disc.
    pub fn contains(&self, point: &Position) -> bool {
        self.position.distance_to(point) <= Position::NODE_RADIUS
    }

    pub fn votes_received(&self) -> usize {
        self.votes_received.len()
    }

    pub fn pending_messages(&self) -> usize {
        self.inbox.len()
    }

    pub fn get_election_timeout(&mut self) -> Duration {
        let lo = self.config.election_timeout_min.min(self.config.election_timeout_max);
        let hi = self.config.election_timeout_min.max(self.config.election_timeout_max);
        Duration::from_millis(self.rng.random_range(lo..=hi))
    }

    fn reset_election_deadline(&mut self, now: Duration) {
        self.election_deadline = now.saturating_add(self.get_election_timeout());
    }

    fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.config.heartbeat_interval)
    }

    /// Queues a delivered message. Dead nodes discard it.
    pub fn receive(&mut self, from: NodeId, message: RaftMessage) -> bool {
        if !self.alive {
            return false;
        }
        self.inbox.push_back(Inbound { from, message });
        true
    }

    /// Runs timers, then drains the whole inbox in arrival order.
    pub fn tick(&mut self, now: Duration, transport: &mut dyn Transport) {
        if !self.alive {
            return;
        }

        match self.role {
            NodeRole::Follower | NodeRole::Candidate => {
                if now >= self.election_deadline {
                    self.start_election(now, transport);
                }
            }
            NodeRole::Leader => {
                if now >= self.heartbeat_deadline {
                    self.send_heartbeats(transport);
                    self.heartbeat_deadline = now.saturating_add(self.heartbeat_interval());
                }
            }
            NodeRole::Dead => {}
        }

        while let Some(Inbound { from, message }) = self.inbox.pop_front() {
            self.handle_message(now, from, message, transport);
            self.messages_received += 1;
        }
    }

    /// Partitioned nodes never stand for election; their timer is re-armed
    /// instead.
    pub fn start_election(&mut self, now: Duration, transport: &mut dyn Transport) {
        if !self.alive {
            return;
        }
        if self.partitioned {
            trace!("Node {} is partitioned, skipping election", self.id);
            self.reset_election_deadline(now);
            return;
        }

        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.role = NodeRole::Candidate;
        self.leader_id = None;
        self.clear_leader_state();
        self.reset_election_deadline(now);

        self.votes_received.clear();
        self.votes_received.insert(self.id);

        info!("Node {} started election for term {}", self.id, self.current_term);

        let request = RaftMessage::RequestVote {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        let sent = transport.broadcast(self.id, request);
        self.messages_sent += sent as u64;

        // A lone alive node wins on its own vote.
        if self.has_quorum(transport.alive_count()) {
            self.become_leader(now, transport);
        }
    }

    pub fn send_heartbeats(&mut self, transport: &mut dyn Transport) -> usize {
        if !self.alive || !self.is_leader() {
            return 0;
        }

        let heartbeat = RaftMessage::AppendEntries {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index: self.log.last_index(),
            prev_log_term: self.log.last_term(),
            entries: Vec::new(),
            leader_commit: self.commit_index,
        };
        let sent = transport.broadcast(self.id, heartbeat);
        self.messages_sent += sent as u64;
        debug!("Leader {} sent {} heartbeats (term {})", self.id, sent, self.current_term);
        sent
    }

    fn has_quorum(&self, alive_count: usize) -> bool {
        self.votes_received.len() * 2 > alive_count
    }

    pub fn handle_message(
        &mut self,
        now: Duration,
        from: NodeId,
        message: RaftMessage,
        transport: &mut dyn Transport,
    ) {
        self.observe_term(message.term());

        match message {
            RaftMessage::RequestVote {
                term,
                candidate_id,
                last_log_index,
                last_log_term,
            } => self.handle_request_vote(now, term, candidate_id, last_log_index, last_log_term, transport),
            RaftMessage::RequestVoteResponse { term, vote_granted } => {
                self.handle_request_vote_response(now, from, term, vote_granted, transport)
            }
            RaftMessage::AppendEntries {
                term,
                leader_id,
                entries,
                ..
            } => self.handle_append_entries(now, term, leader_id, entries, transport),
            RaftMessage::AppendEntriesResponse { term, success } => {
                self.handle_append_entries_response(from, term, success)
            }
        }
    }

    /// Adopts a strictly greater term. The vote is reset only here.
    fn observe_term(&mut self, term: u64) {
        if term > self.current_term {
            debug!(
                "Node {} adopting term {} (was {})",
                self.id, term, self.current_term
            );
            self.current_term = term;
            self.voted_for = None;
            if self.role != NodeRole::Follower {
                self.become_follower();
            }
        }
    }

    fn become_follower(&mut self) {
        if self.role == NodeRole::Leader {
            info!("Node {} stepping down in term {}", self.id, self.current_term);
        }
        self.role = NodeRole::Follower;
        self.votes_received.clear();
        self.clear_leader_state();
    }

    fn clear_leader_state(&mut self) {
        self.next_index.clear();
        self.match_index.clear();
    }

    fn handle_request_vote(
        &mut self,
        now: Duration,
        term: u64,
        candidate_id: NodeId,
        last_log_index: Option<u64>,
        last_log_term: u64,
        transport: &mut dyn Transport,
    ) {
        let mut vote_granted = false;

        if term >= self.current_term
            && (self.voted_for.is_none() || self.voted_for == Some(candidate_id))
        {
            // Check if candidate's log is at least as up-to-date as ours
            let our_last_log_index = self.log.last_index();
            let our_last_log_term = self.log.last_term();

            if last_log_term > our_last_log_term
                || (last_log_term == our_last_log_term && last_log_index >= our_last_log_index)
            {
                vote_granted = true;
                self.voted_for = Some(candidate_id);
                self.reset_election_deadline(now);
                debug!(
                    "Node {} granted vote to {} for term {}",
                    self.id, candidate_id, self.current_term
                );
            }
        }

        let response = RaftMessage::RequestVoteResponse {
            term: self.current_term,
            vote_granted,
        };
        if transport.send(self.id, candidate_id, response) {
            self.messages_sent += 1;
        }
    }

    fn handle_request_vote_response(
        &mut self,
        now: Duration,
        from: NodeId,
        term: u64,
        vote_granted: bool,
        transport: &mut dyn Transport,
    ) {
        // Only process if we're still a candidate and in the same term
        if self.role != NodeRole::Candidate || term != self.current_term {
            trace!(
                "Node {} discarding stale vote response from {} (term {}, ours {})",
                self.id, from, term, self.current_term
            );
            return;
        }

        if vote_granted {
            self.votes_received.insert(from);
            if self.has_quorum(transport.alive_count()) {
                self.become_leader(now, transport);
            }
        }
    }

    fn handle_append_entries(
        &mut self,
        now: Duration,
        term: u64,
        leader_id: NodeId,
        entries: Vec<LogEntry>,
        transport: &mut dyn Transport,
    ) {
        let success = term >= self.current_term;

        if success {
            // Reset election timeout since we heard from the leader
            self.reset_election_deadline(now);
            self.leader_id = Some(leader_id);

            if self.role != NodeRole::Follower {
                self.become_follower();
            }

            // Entries are appended as carried; the log tail is not checked
            // against prev_log_index/prev_log_term.
            for entry in entries {
                self.log.append(entry);
            }
        }

        let response = RaftMessage::AppendEntriesResponse {
            term: self.current_term,
            success,
        };
        if transport.send(self.id, leader_id, response) {
            self.messages_sent += 1;
        }
    }

    // Acknowledgements do not move match_index or commit_index.
    fn handle_append_entries_response(&mut self, from: NodeId, term: u64, success: bool) {
        if self.role != NodeRole::Leader {
            return;
        }
        trace!(
            "Leader {} got append response from {} (term {}, success {})",
            self.id, from, term, success
        );
    }

    fn become_leader(&mut self, now: Duration, transport: &mut dyn Transport) {
        if self.role != NodeRole::Candidate {
            return;
        }

        info!("Node {} became leader for term {}", self.id, self.current_term);

        self.role = NodeRole::Leader;
        self.leader_id = Some(self.id);

        self.clear_leader_state();
        let next = self.log.next_index();
        for peer_id in transport.alive_peers(self.id) {
            self.next_index.insert(peer_id, next);
            self.match_index.insert(peer_id, None);
        }

        self.heartbeat_deadline = now.saturating_add(self.heartbeat_interval());
        self.send_heartbeats(transport);
    }

    /// Appends a client command to the leader's own log. The entry is not
    /// replicated or committed by this call.
    pub fn submit_command(&mut self, command: &str, now: Duration) -> Result<LogEntry, RaftError> {
        if !self.alive || !self.is_leader() {
            return Err(RaftError::NotLeader(self.id));
        }

        let entry = LogEntry::new(self.current_term, self.log.next_index(), command, now);
        self.log.append(entry.clone());
        debug!(
            "Leader {} appended '{}' at index {} (term {})",
            self.id, entry.command, entry.index, entry.term
        );
        Ok(entry)
    }

    /// Commits entries up to `index`. The commit index never moves back.
    pub fn commit_to(&mut self, index: u64) -> Option<u64> {
        let committed = self.log.commit_through(index)?;
        if self.commit_index.map_or(true, |current| committed > current) {
            self.commit_index = Some(committed);
        }
        self.commit_index
    }

    pub fn apply_committed(&mut self) -> Option<u64> {
        if let Some(applied) = self.log.apply_committed() {
            debug!("Node {} applied entries through index {}", self.id, applied);
            self.last_applied = Some(applied);
        }
        self.last_applied
    }

    /// Drops bookkeeping for a peer that was killed or removed.
    pub fn forget_peer(&mut self, peer: NodeId) {
        self.next_index.remove(&peer);
        self.match_index.remove(&peer);
    }

    pub fn kill(&mut self) {
        info!("Node {} killed in term {}", self.id, self.current_term);
        self.alive = false;
        self.role = NodeRole::Dead;
        self.leader_id = None;
        self.votes_received.clear();
        self.clear_leader_state();
        self.inbox.clear();
    }

    /// Brings a dead node back as a follower. Term, vote and log survive.
    pub fn revive(&mut self, now: Duration) {
        if self.alive {
            return;
        }
        info!("Node {} revived in term {}", self.id, self.current_term);
        self.alive = true;
        self.role = NodeRole::Follower;
        self.reset_election_deadline(now);
    }

    /// Wipes all protocol state back to a fresh follower.
    pub fn reset(&mut self, now: Duration) {
        self.role = NodeRole::Follower;
        self.current_term = 0;
        self.voted_for = None;
        self.leader_id = None;
        self.log.clear();
        self.commit_index = None;
        self.last_applied = None;
        self.votes_received.clear();
        self.clear_leader_state();
        self.alive = true;
        self.partitioned = false;
        self.inbox.clear();
        self.messages_received = 0;
        self.messages_sent = 0;
        self.reset_election_deadline(now);
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            id: self.id,
            role: self.role,
            term: self.current_term,
            voted_for: self.voted_for,
            leader_id: self.leader_id,
            log_length: self.log.len(),
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            alive: self.alive,
            partitioned: self.partitioned,
            votes_received: self.votes_received.len(),
            messages_received: self.messages_received,
            messages_sent: self.messages_sent,
            position: self.position,
        }
    }
}
