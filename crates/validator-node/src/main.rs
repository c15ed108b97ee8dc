// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use clap::Parser;
use prometheus::Registry;

use validator_node::cli::Args;
use validator_node::config::NodeConfig;
use validator_node::context::NodeContext;
use validator_node::supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NodeConfig::from_toml(&std::fs::read_to_string(path)?)?,
        None => NodeConfig::default(),
    };
    args.apply(&mut config);

    let registry = Registry::new();
    let (context, component_listener) = NodeContext::build(config, &registry).await?;
    let context = Arc::new(context);

    tracing::info!("validator node ready, starting listeners");
    supervisor::run(context, component_listener).await?;
    Ok(())
}
