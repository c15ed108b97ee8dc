// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Outbound peer connections for static peer lists and dynamic seed
//! discovery (spec §4.8): dials a configured address and runs the
//! initiator side of the handshake `peer_service.rs` answers as
//! responder, then joins the same registration / dispatch-loop
//! machinery an inbound connection uses.
//!
//! The protocol only has the responder challenge the initiator, not the
//! reverse, so a dialed peer's table entry is keyed by the address it was
//! configured under rather than a verified public key. That is adequate
//! for statically- or seed-configured peers, which are already trusted by
//! the operator who listed them.

use std::collections::HashSet;
use std::sync::Arc;

use prost::Message as _;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use validator_types::crypto::Signer;

use crate::authorization::AuthorizationScheme;
use crate::error::{NetworkError, Result};
use crate::peer_service::PeerEndpoint;
use crate::peer_table::{PeerTable, Priority, ROLE_NETWORK, ROLE_NETWORK_CONSENSUS};
use crate::proto::peer_service_client::PeerServiceClient;
use crate::proto::{self, PeerMessage, PeerMessageType};

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Dials `remote_addr`, authenticates as `local_endpoint`/`identity`, and
/// runs the connection's send/receive loops until it ends. Returns once
/// the connection drops; callers that want persistent peering retry with
/// their own backoff.
pub async fn dial(endpoint: Arc<PeerEndpoint>, local_endpoint: String, identity: Arc<Signer>, remote_addr: String) -> Result<()> {
    let mut client = PeerServiceClient::connect(remote_addr.clone())
        .await
        .map_err(|err| NetworkError::HandshakeFailed(format!("connecting to {remote_addr}: {err}")))?;

    let (outbound_tx, outbound_rx) = mpsc::channel::<PeerMessage>(OUTBOUND_CHANNEL_CAPACITY);
    send(&outbound_tx, PeerMessageType::ConnectionRequest, proto::ConnectionRequest { endpoint: local_endpoint }).await?;

    let response = client
        .connect(ReceiverStream::new(outbound_rx))
        .await
        .map_err(|status| NetworkError::HandshakeFailed(status.to_string()))?;
    let mut inbound = response.into_inner();

    let connection_response = next_message(&mut inbound).await?;
    let connection_response = proto::ConnectionResponse::decode(connection_response.content.as_slice())?;
    if !connection_response.accepted {
        return Err(NetworkError::HandshakeFailed(format!("{remote_addr} refused connection: {}", connection_response.reason)));
    }

    let challenge = next_message(&mut inbound).await?;
    let challenge = proto::AuthorizationChallenge::decode(challenge.content.as_slice())?;
    let signature_hex = match endpoint.scheme() {
        AuthorizationScheme::Challenge => identity.sign(&challenge.nonce),
        AuthorizationScheme::Trust => String::new(),
    };
    let auth_response = proto::AuthorizationResponse {
        public_key: hex::decode(&identity.public_key_hex).map_err(|err| NetworkError::HandshakeFailed(err.to_string()))?,
        signature: hex::decode(&signature_hex).unwrap_or_default(),
    };
    send(&outbound_tx, PeerMessageType::AuthorizationResponse, auth_response).await?;

    let mut roles = HashSet::new();
    roles.insert(ROLE_NETWORK.to_string());
    roles.insert(ROLE_NETWORK_CONSENSUS.to_string());

    let peer_table = endpoint.peer_table();
    let peer_id = remote_addr.clone();
    let (_handle, mut high_rx, mut low_rx) = peer_table.register(peer_id.clone(), remote_addr.clone(), roles);

    let writer_tx = outbound_tx.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                Some(message) = high_rx.recv() => {
                    if writer_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Some(message) = low_rx.recv() => {
                    if writer_tx.send(message).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    dispatch_inbound(endpoint, peer_table, inbound, peer_id, remote_addr).await;
    Ok(())
}

async fn dispatch_inbound(
    endpoint: Arc<PeerEndpoint>,
    peer_table: Arc<PeerTable>,
    mut inbound: tonic::Streaming<PeerMessage>,
    peer_id: String,
    remote_addr: String,
) {
    loop {
        match futures::StreamExt::next(&mut inbound).await {
            Some(Ok(message)) => {
                let dropped_for_role = endpoint.handle_inbound(message, &peer_id, &remote_addr).await;
                if let Some(peer) = peer_table.get(&peer_id) {
                    if dropped_for_role && peer.record_violation() > MAX_VIOLATIONS {
                        warn!("closing connection to {peer_id}: repeated authorization violations");
                        break;
                    }
                    peer.touch_heartbeat(std::time::Instant::now(), peer_table.epoch());
                }
            }
            Some(Err(err)) => {
                warn!("peer stream error from {peer_id}: {err}");
                break;
            }
            None => break,
        }
    }
    peer_table.unregister(&peer_id);
}

const MAX_VIOLATIONS: i64 = 3;

async fn next_message(inbound: &mut tonic::Streaming<PeerMessage>) -> Result<PeerMessage> {
    match futures::StreamExt::next(inbound).await {
        Some(Ok(message)) => Ok(message),
        Some(Err(err)) => Err(NetworkError::HandshakeFailed(err.to_string())),
        None => Err(NetworkError::HandshakeFailed("stream closed during handshake".to_string())),
    }
}

async fn send(outbound: &mpsc::Sender<PeerMessage>, message_type: PeerMessageType, content: impl prost::Message) -> Result<()> {
    outbound
        .send(PeerMessage { message_type: message_type as i32, correlation_id: String::new(), content: content.encode_to_vec() })
        .await
        .map_err(|_| NetworkError::HandshakeFailed("dialer outbound channel closed".to_string()))
}

/// Dials every address in `addrs` (a node's configured `peers` or `seeds`
/// list) and keeps redialing with a fixed backoff if the connection drops,
/// rather than giving up on a transient failure.
pub async fn run_static(endpoint: Arc<PeerEndpoint>, local_endpoint: String, identity: Arc<Signer>, addrs: Vec<String>) {
    let mut handles = Vec::new();
    for addr in addrs {
        let endpoint = endpoint.clone();
        let local_endpoint = local_endpoint.clone();
        let identity = identity.clone();
        handles.push(tokio::spawn(redial_loop(endpoint, local_endpoint, identity, addr)));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

async fn redial_loop(endpoint: Arc<PeerEndpoint>, local_endpoint: String, identity: Arc<Signer>, addr: String) {
    loop {
        if let Err(err) = dial(endpoint.clone(), local_endpoint.clone(), identity.clone(), addr.clone()).await {
            warn!("dial to {addr} failed: {err}");
        }
        tokio::time::sleep(REDIAL_BACKOFF).await;
    }
}

const REDIAL_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5);

/// Dynamic peering's discovery half (spec §4.8): while the table wants
/// more peers, asks a currently-connected one for its peer list and dials
/// whatever it doesn't already know about.
pub async fn run_discovery(endpoint: Arc<PeerEndpoint>, local_endpoint: String, identity: Arc<Signer>) {
    let peer_table = endpoint.peer_table();
    loop {
        tokio::time::sleep(DISCOVERY_INTERVAL).await;
        if !peer_table.wants_more_peers() {
            continue;
        }
        let known: HashSet<String> = peer_table.peer_ids().into_iter().collect();
        let Some((_, peer)) = peer_table.peers_with_role(ROLE_NETWORK).into_iter().next() else { continue };
        let response = match peer.request(PeerMessageType::GetPeersRequest, proto::GetPeersRequest {}.encode_to_vec(), Priority::Low).await {
            Ok(message) => message,
            Err(err) => {
                warn!("peer discovery request failed: {err}");
                continue;
            }
        };
        let Ok(peers) = proto::GetPeersResponse::decode(response.content.as_slice()) else { continue };
        for candidate in peers.peers {
            if known.contains(&candidate.peer_id) || candidate.endpoint.is_empty() || !peer_table.wants_more_peers() {
                continue;
            }
            let endpoint = endpoint.clone();
            let local_endpoint = local_endpoint.clone();
            let identity = identity.clone();
            let addr = candidate.endpoint;
            tokio::spawn(async move {
                if let Err(err) = dial(endpoint, local_endpoint, identity, addr.clone()).await {
                    warn!("discovered peer dial to {addr} failed: {err}");
                }
            });
        }
    }
}

const DISCOVERY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);
