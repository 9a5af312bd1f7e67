use serde::{Deserialize, Serialize};

/// Protocol timing, in milliseconds of simulated time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub election_timeout_min: u64,
    pub election_timeout_max: u64,
    pub heartbeat_interval: u64,
}

impl RaftConfig {
    pub fn new(election_timeout_min: u64, election_timeout_max: u64, heartbeat_interval: u64) -> Self {
        Self {
            election_timeout_min,
            election_timeout_max,
            heartbeat_interval,
        }
    }
}

impl Default for RaftConfig {
    // Slow enough to follow a visualization by eye.
    fn default() -> Self {
        Self::new(3000, 6000, 1000)
    }
}
