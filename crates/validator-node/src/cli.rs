// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::Parser;

/// CLI surface for the validator process itself — ambient process
/// bootstrapping (data directory, bind addresses, peers, genesis path),
/// not the out-of-scope REST API/CLI family that talks to a running node.
#[derive(Parser, Debug)]
#[command(name = "validator", author, version, about = "Validator core node")]
pub struct Args {
    /// Path to a TOML config file. CLI flags below override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long)]
    pub bind_network: Option<String>,

    #[arg(long)]
    pub bind_component: Option<String>,

    #[arg(long)]
    pub bind_consensus: Option<String>,

    /// Static peer addresses. Mutually exclusive in effect with `--seeds`:
    /// supplying `--peers` selects the static peering mode.
    #[arg(long, value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Seed addresses for dynamic peer discovery.
    #[arg(long, value_delimiter = ',')]
    pub seeds: Vec<String>,

    #[arg(long)]
    pub genesis_batch: Option<PathBuf>,
}

impl Args {
    /// Applies CLI overrides onto a config loaded from file/defaults.
    pub fn apply(&self, config: &mut crate::config::NodeConfig) {
        if let Some(data_dir) = &self.data_dir {
            config.storage.data_dir = data_dir.clone();
        }
        if let Some(bind_network) = &self.bind_network {
            config.network.bind_network = bind_network.clone();
        }
        if let Some(bind_component) = &self.bind_component {
            config.execution.bind_component = bind_component.clone();
        }
        if let Some(bind_consensus) = &self.bind_consensus {
            config.consensus.bind_consensus = bind_consensus.clone();
        }
        if !self.peers.is_empty() {
            config.network.peers = self.peers.clone();
        }
        if !self.seeds.is_empty() {
            config.network.seeds = self.seeds.clone();
            config.network.dynamic_target_degree.get_or_insert(8);
        }
        if let Some(genesis_batch) = &self.genesis_batch {
            config.genesis.genesis_batch = Some(genesis_batch.clone());
        }
    }
}
