use std::time::Duration;

use serde::Serialize;

use crate::raft::{MessageKind, NodeId, RaftMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    InFlight,
    Delivered,
    Dropped,
}

/// An envelope in transit. Owned by the network until it is delivered into
/// an inbox or dropped.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: u64,
    pub sender: NodeId,
    pub receiver: NodeId,
    pub content: RaftMessage,
    pub created_at: Duration,
    transit: Duration,
    elapsed: Duration,
    status: MessageStatus,
}

impl Message {
    pub fn new(
        id: u64,
        sender: NodeId,
        receiver: NodeId,
        content: RaftMessage,
        created_at: Duration,
        transit: Duration,
    ) -> Self {
        Self {
            id,
            sender,
            receiver,
            content,
            created_at,
            transit,
            elapsed: Duration::ZERO,
            status: MessageStatus::InFlight,
        }
    }

    pub fn term(&self) -> u64 {
        self.content.term()
    }

    pub fn kind(&self) -> MessageKind {
        self.content.kind()
    }

    pub fn transit(&self) -> Duration {
        self.transit
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    /// Fraction of the trip already covered, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.transit.is_zero() {
            return 1.0;
        }
        (self.elapsed.as_secs_f64() / self.transit.as_secs_f64()).min(1.0)
    }

    /// Ages an in-flight message. Returns true once it has arrived.
    pub fn age_by(&mut self, delta: Duration) -> bool {
        if self.status != MessageStatus::InFlight {
            return false;
        }
        self.elapsed = self.elapsed.saturating_add(delta);
        self.elapsed >= self.transit
    }

    pub fn mark_delivered(&mut self) {
        self.status = MessageStatus::Delivered;
    }

    pub fn drop_message(&mut self) {
        self.status = MessageStatus::Dropped;
    }

    pub fn info(&self, now: Duration) -> MessageInfo {
        MessageInfo {
            id: self.id,
            kind: self.kind(),
            from: self.sender,
            to: self.receiver,
            term: self.term(),
            age_ms: now.saturating_sub(self.created_at).as_millis() as u64,
            progress: self.progress(),
            delivered: self.status == MessageStatus::Delivered,
            dropped: self.status == MessageStatus::Dropped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageInfo {
    pub id: u64,
    pub kind: MessageKind,
    pub from: NodeId,
    pub to: NodeId,
    pub term: u64,
    pub age_ms: u64,
    pub progress: f64,
    pub delivered: bool,
    pub dropped: bool,
}
