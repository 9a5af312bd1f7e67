//! Simulated, fault-injecting message transport.
//!
//! The network owns every message from the moment a send is accepted until
//! it is delivered or discarded. It applies latency with jitter, a random
//! drop rate and partitions; liveness of the endpoints is checked by the
//! cluster before a send reaches this layer.

pub mod message;
pub mod metrics;
pub mod partition;

pub use message::{Message, MessageInfo, MessageStatus};
pub use metrics::{NetworkMetrics, Outcome};
pub use partition::PartitionSet;

use std::time::Duration;

use ::log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::raft::{NodeId, RaftMessage};

pub const MIN_SPEED_MULTIPLIER: f64 = 0.1;
pub const MAX_SPEED_MULTIPLIER: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Extra one-way delay added to every message.
    pub latency_ms: u64,
    /// Probability in `[0, 1]` that a send is lost.
    pub drop_rate: f64,
    pub speed_multiplier: f64,
    /// Travel time of a message on an idle network.
    pub base_travel_ms: u64,
    /// Uniform jitter applied on top of the latency, in both directions.
    pub jitter_ms: u64,
    /// Increment used by `add_latency` when the driver gives no amount.
    pub latency_step_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            drop_rate: 0.0,
            speed_multiplier: 1.0,
            base_travel_ms: 500,
            jitter_ms: 10,
            latency_step_ms: 50,
        }
    }
}

/// Why a send did not produce a message. The sender never sees this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(u64),
    Blocked,
    Dropped,
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent(_))
    }
}

pub struct Network {
    latency_ms: u64,
    drop_rate: f64,
    speed_multiplier: f64,
    base_travel_ms: u64,
    jitter_ms: u64,
    in_flight: Vec<Message>,
    partitions: PartitionSet,
    metrics: NetworkMetrics,
    next_message_id: u64,
    rng: StdRng,
}

impl Network {
    pub fn new(config: &NetworkConfig, seed: u64) -> Self {
        let mut network = Self {
            latency_ms: 0,
            drop_rate: 0.0,
            speed_multiplier: 1.0,
            base_travel_ms: config.base_travel_ms,
            jitter_ms: config.jitter_ms,
            in_flight: Vec::new(),
            partitions: PartitionSet::new(),
            metrics: NetworkMetrics::default(),
            next_message_id: 0,
            rng: StdRng::seed_from_u64(seed),
        };
        network.set_latency(config.latency_ms);
        network.set_drop_rate(config.drop_rate);
        network.set_speed_multiplier(config.speed_multiplier);
        network
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    pub fn set_latency(&mut self, ms: u64) {
        self.latency_ms = ms;
    }

    pub fn add_latency(&mut self, ms: u64) -> u64 {
        self.latency_ms = self.latency_ms.saturating_add(ms);
        self.latency_ms
    }

    pub fn drop_rate(&self) -> f64 {
        self.drop_rate
    }

    /// Clamped to `[0, 1]`; NaN disables drops.
    pub fn set_drop_rate(&mut self, rate: f64) {
        self.drop_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
    }

    pub fn speed_multiplier(&self) -> f64 {
        self.speed_multiplier
    }

    /// Clamped to `[MIN_SPEED_MULTIPLIER, MAX_SPEED_MULTIPLIER]`.
    pub fn set_speed_multiplier(&mut self, multiplier: f64) {
        self.speed_multiplier = if multiplier.is_nan() {
            1.0
        } else {
            multiplier.clamp(MIN_SPEED_MULTIPLIER, MAX_SPEED_MULTIPLIER)
        };
    }

    pub fn metrics(&self) -> &NetworkMetrics {
        &self.metrics
    }

    pub fn partitions(&self) -> &PartitionSet {
        &self.partitions
    }

    pub fn is_partitioned(&self, a: NodeId, b: NodeId) -> bool {
        self.partitions.is_blocked(a, b)
    }

    pub fn partition(&mut self, group_a: &[NodeId], group_b: &[NodeId]) {
        self.partitions.split(group_a, group_b);
    }

    pub fn heal(&mut self) {
        self.partitions.clear();
    }

    /// Purges a removed node from the partition set.
    pub fn forget_node(&mut self, id: NodeId) {
        self.partitions.remove_node(id);
    }

    pub fn in_flight(&self) -> &[Message] {
        &self.in_flight
    }

    /// `base + latency ± jitter`, clamped to `[0, u64::MAX]` milliseconds.
    fn transit_time(&mut self) -> Duration {
        let base = self.base_travel_ms.saturating_add(self.latency_ms);
        let total = if self.jitter_ms > 0 {
            let draw = self.rng.random_range(0..=self.jitter_ms.saturating_mul(2));
            base.saturating_add(draw).saturating_sub(self.jitter_ms)
        } else {
            base
        };
        Duration::from_millis(total)
    }

    /// Accepts a message into flight unless the pair is partitioned or the
    /// drop roll loses it.
    pub fn send(&mut self, from: NodeId, to: NodeId, content: RaftMessage, now: Duration) -> SendOutcome {
        if self.partitions.is_blocked(from, to) {
            self.metrics.record(Outcome::Blocked);
            return SendOutcome::Blocked;
        }

        if self.drop_rate > 0.0 && self.rng.random_bool(self.drop_rate) {
            self.metrics.record(Outcome::Dropped);
            debug!("Dropped {:?} from {} to {}", content.kind(), from, to);
            return SendOutcome::Dropped;
        }

        let id = self.next_message_id;
        self.next_message_id += 1;
        let transit = self.transit_time();
        self.in_flight
            .push(Message::new(id, from, to, content, now, transit));
        self.metrics.record(Outcome::Sent);
        SendOutcome::Sent(id)
    }

    /// Ages every in-flight message by `delta` (already speed-scaled) and
    /// removes the ones that arrived. Arrivals across a partition are
    /// discarded here; the rest are returned in send order.
    pub fn take_arrived(&mut self, delta: Duration) -> Vec<Message> {
        let mut arrived = Vec::new();
        let mut still_flying = Vec::with_capacity(self.in_flight.len());

        for mut message in self.in_flight.drain(..) {
            if !message.age_by(delta) {
                still_flying.push(message);
                continue;
            }
            if self.partitions.is_blocked(message.sender, message.receiver) {
                message.drop_message();
                self.metrics.record(Outcome::Blocked);
                continue;
            }
            arrived.push(message);
        }

        self.in_flight = still_flying;
        arrived
    }

    pub fn record_delivered(&mut self, message: &mut Message) {
        message.mark_delivered();
        self.metrics.record(Outcome::Delivered);
    }

    pub fn record_undeliverable(&mut self, message: &mut Message) {
        message.drop_message();
        self.metrics.record(Outcome::Undeliverable);
        debug!(
            "Discarded {:?} from {} to unavailable node {}",
            message.kind(),
            message.sender,
            message.receiver
        );
    }

    /// Clears traffic, partitions, faults and counters. The speed multiplier
    /// and the RNG stream are kept.
    pub fn reset(&mut self) {
        self.in_flight.clear();
        self.partitions.clear();
        self.latency_ms = 0;
        self.drop_rate = 0.0;
        self.metrics.reset();
        self.next_message_id = 0;
    }
}
