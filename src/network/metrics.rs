use serde::Serialize;

/// Message counters for one simulated network. Every send attempt that
/// reaches the network ends up in exactly one of these buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkMetrics {
    /// Messages accepted into flight.
    pub sent: u64,
    /// Messages lost to the random drop rate at send time.
    pub dropped: u64,
    /// Sends refused or arrivals discarded because of a partition.
    pub blocked: u64,
    /// Arrivals whose receiver was dead or removed.
    pub undeliverable: u64,
    pub delivered: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Dropped,
    Blocked,
    Undeliverable,
    Delivered,
}

impl NetworkMetrics {
    pub fn record(&mut self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Sent => &mut self.sent,
            Outcome::Dropped => &mut self.dropped,
            Outcome::Blocked => &mut self.blocked,
            Outcome::Undeliverable => &mut self.undeliverable,
            Outcome::Delivered => &mut self.delivered,
        };
        *counter += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
