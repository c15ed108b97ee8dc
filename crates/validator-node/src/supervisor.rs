// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Spawns the long-lived network/component/consensus listeners (spec §5).
//! Each runs in its own task so a panic in one connection handler can't take
//! down the others; if a listener's task itself exits (bind failure, panic
//! propagating past tonic's per-connection isolation), that is treated as
//! fatal for the whole process rather than silently leaving the validator
//! half-running with one surface down.

use std::sync::Arc;

use tonic::transport::Server;
use tracing::info;

use validator_consensus::ConsensusEndpoint;

use crate::context::{parse_addr, ComponentListenerHandle, NodeContext};
use crate::error::{NodeError, Result};

/// Starts the remaining listeners and serves until one of them exits. The
/// component endpoint is started earlier, in [`NodeContext::build`], so a
/// transaction processor has something to connect to before genesis
/// application waits on it; `component_listener` is that task, folded into
/// this function's own listener set rather than bound a second time here.
pub async fn run(context: Arc<NodeContext>, component_listener: ComponentListenerHandle) -> Result<()> {
    let network_addr = parse_addr("bind_network", &context.config.network.bind_network)?;
    let consensus_addr = parse_addr("bind_consensus", &context.config.consensus.bind_consensus)?;

    let peer_endpoint = (*context.peer_endpoint).clone();
    let network = tokio::spawn(async move {
        Server::builder()
            .add_service(validator_network::proto::peer_service_server::PeerServiceServer::new(peer_endpoint))
            .serve(network_addr)
            .await
    });

    let consensus_endpoint = ConsensusEndpoint::new(context.consensus.clone(), context.router.clone());
    let consensus = tokio::spawn(async move {
        Server::builder()
            .add_service(validator_consensus::proto::consensus_service_server::ConsensusServiceServer::new(consensus_endpoint))
            .serve(consensus_addr)
            .await
    });

    spawn_peering(&context);

    info!(%network_addr, %consensus_addr, "validator listeners started");

    tokio::select! {
        result = network => finish("peer-network", result),
        result = component_listener => finish("component-bus", result),
        result = consensus => finish("consensus-endpoint", result),
    }
}

/// Dials every statically configured peer/seed and, for dynamic peering,
/// starts the discovery loop that grows the table toward its target
/// degree (spec §4.8). Runs in the background; dial failures are retried
/// by `validator_network::dialer`, never fatal to the node.
fn spawn_peering(context: &Arc<NodeContext>) {
    let addrs: Vec<String> = context
        .config
        .network
        .peers
        .iter()
        .chain(context.config.network.seeds.iter())
        .cloned()
        .collect();
    if !addrs.is_empty() {
        let peer_endpoint = context.peer_endpoint.clone();
        let local_endpoint = context.config.network.bind_network.clone();
        let identity = context.network_identity.clone();
        tokio::spawn(validator_network::run_static(peer_endpoint, local_endpoint, identity, addrs));
    }

    if context.config.network.dynamic_target_degree.is_some() {
        let peer_endpoint = context.peer_endpoint.clone();
        let local_endpoint = context.config.network.bind_network.clone();
        let identity = context.network_identity.clone();
        tokio::spawn(validator_network::dialer::run_discovery(peer_endpoint, local_endpoint, identity));
    }
}

fn finish(name: &str, result: std::result::Result<std::result::Result<(), tonic::transport::Error>, tokio::task::JoinError>) -> Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(NodeError::Transport(err)),
        Err(join_err) => Err(NodeError::GenesisInvalid(format!("{name} listener task ended unexpectedly: {join_err}"))),
    }
}
