use std::path::Path;

use ::log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cluster::ClusterConfig;
use crate::network::NetworkConfig;
use crate::raft::RaftConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level simulator configuration. Every section and field is optional in
/// the JSON form and falls back to its default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for every random stream. Drawn from the OS when absent.
    pub seed: Option<u64>,
    pub raft: RaftConfig,
    pub network: NetworkConfig,
    pub cluster: ClusterConfig,
}

impl SimConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: SimConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let raft = &self.raft;
        if raft.election_timeout_min == 0 {
            return Err(ConfigError::Invalid(
                "election_timeout_min must be positive".into(),
            ));
        }
        if raft.election_timeout_min > raft.election_timeout_max {
            return Err(ConfigError::Invalid(format!(
                "election_timeout_min ({}) exceeds election_timeout_max ({})",
                raft.election_timeout_min, raft.election_timeout_max
            )));
        }
        if raft.heartbeat_interval == 0 || raft.heartbeat_interval >= raft.election_timeout_min {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_interval ({}) must be positive and below election_timeout_min ({})",
                raft.heartbeat_interval, raft.election_timeout_min
            )));
        }
        if !(0.0..=1.0).contains(&self.network.drop_rate) {
            return Err(ConfigError::Invalid(format!(
                "drop_rate ({}) must be within [0, 1]",
                self.network.drop_rate
            )));
        }
        let cluster = &self.cluster;
        if cluster.initial_nodes == 0 {
            return Err(ConfigError::Invalid("initial_nodes must be positive".into()));
        }
        if cluster.initial_nodes > cluster.max_nodes {
            return Err(ConfigError::Invalid(format!(
                "initial_nodes ({}) exceeds max_nodes ({})",
                cluster.initial_nodes, cluster.max_nodes
            )));
        }
        Ok(())
    }

    /// The configured seed, or a fresh one when none is set.
    pub fn resolve_seed(&self) -> u64 {
        match self.seed {
            Some(seed) => seed,
            None => {
                let seed = rand::rng().random::<u64>();
                info!("No seed configured, using {seed}");
                seed
            }
        }
    }
}
