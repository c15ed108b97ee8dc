// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Aggregate node configuration, loaded from TOML with per-field defaults
//! the way the teacher's `consensus_config::Parameters` is: most operators
//! shouldn't need to set anything beyond the network/component bind
//! addresses and the data directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator_network::PeeringMode;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub genesis: GenesisConfig,
}

impl NodeConfig {
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            network: NetworkConfig::default(),
            execution: ExecutionConfig::default(),
            consensus: ConsensusConfig::default(),
            genesis: GenesisConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn default_data_dir() -> PathBuf {
        PathBuf::from("./data")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: Self::default_data_dir() }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NetworkConfig {
    #[serde(default = "NetworkConfig::default_bind_network")]
    pub bind_network: String,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub seeds: Vec<String>,
    #[serde(default)]
    pub dynamic_target_degree: Option<usize>,
    #[serde(default = "NetworkConfig::default_challenge_auth")]
    pub challenge_authorization: bool,
}

impl NetworkConfig {
    fn default_bind_network() -> String {
        "0.0.0.0:8800".to_string()
    }

    fn default_challenge_auth() -> bool {
        true
    }

    pub fn peering_mode(&self) -> PeeringMode {
        match self.dynamic_target_degree {
            Some(target_degree) => PeeringMode::Dynamic { target_degree },
            None => PeeringMode::Static,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_network: Self::default_bind_network(),
            peers: Vec::new(),
            seeds: Vec::new(),
            dynamic_target_degree: None,
            challenge_authorization: Self::default_challenge_auth(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExecutionConfig {
    #[serde(default = "ExecutionConfig::default_bind_component")]
    pub bind_component: String,
}

impl ExecutionConfig {
    fn default_bind_component() -> String {
        "0.0.0.0:8801".to_string()
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { bind_component: Self::default_bind_component() }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConsensusConfig {
    #[serde(default = "ConsensusConfig::default_bind_consensus")]
    pub bind_consensus: String,
}

impl ConsensusConfig {
    fn default_bind_consensus() -> String {
        "0.0.0.0:8802".to_string()
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self { bind_consensus: Self::default_bind_consensus() }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GenesisConfig {
    pub genesis_batch: Option<PathBuf>,
    /// How long to wait for every transaction family a genesis batch needs
    /// to have a processor registered before giving up (spec §6: genesis
    /// has no consensus engine to retry the block through, so this is the
    /// bootstrap's own patience budget).
    #[serde(default = "GenesisConfig::default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
}

impl GenesisConfig {
    fn default_wait_timeout_secs() -> u64 {
        300
    }

    pub fn wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.wait_timeout_secs)
    }
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self { genesis_batch: None, wait_timeout_secs: Self::default_wait_timeout_secs() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_fills_in_every_default() {
        let config = NodeConfig::from_toml("").unwrap();
        assert_eq!(config.network.bind_network, "0.0.0.0:8800");
        assert_eq!(config.execution.bind_component, "0.0.0.0:8801");
        assert!(config.genesis.genesis_batch.is_none());
        assert_eq!(config.genesis.wait_timeout_secs, 300);
        assert_eq!(config.network.peering_mode(), PeeringMode::Static);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = NodeConfig::from_toml(
            r#"
            [network]
            bind_network = "127.0.0.1:9000"
            seeds = ["127.0.0.1:9100"]
            "#,
        )
        .unwrap();
        assert_eq!(config.network.bind_network, "127.0.0.1:9000");
        assert_eq!(config.network.seeds, vec!["127.0.0.1:9100".to_string()]);
        assert_eq!(config.execution.bind_component, "0.0.0.0:8801");
    }
}
