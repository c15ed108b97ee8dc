// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! C6/C7: the peer endpoint other validators connect to. Runs the
//! responder side of the handshake (spec §4.8), then loops forwarding
//! authorized traffic to the gossip/peer-registry handlers and draining
//! the peer's priority-bounded outgoing queues onto the wire. Modeled on
//! `component_service.rs`'s connection-task shape: one spawned task per
//! stream, a shared `Arc` endpoint for dispatch.

use std::sync::Arc;
use std::time::Duration;

use prost::Message as _;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use validator_consensus::ConsensusEngineLink;
use validator_permissions::PermissionVerifier;

use crate::authorization::{self, AuthorizationScheme};
use crate::error::Result;
use crate::gossip::{self, GossipSink, GossipStore, SeenSet};
use crate::peer_table::{PeerTable, Priority, ROLE_NETWORK};
use crate::proto::peer_service_server::PeerService;
use crate::proto::{self, PeerMessage, PeerMessageType};

/// Repeated authorization violations on one connection before it is closed.
const MAX_VIOLATIONS: i64 = 3;
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct PeerEndpoint {
    peer_table: Arc<PeerTable>,
    verifier: Arc<PermissionVerifier>,
    scheme: AuthorizationScheme,
    state_root: Arc<dyn Fn() -> validator_permissions::StateRoot + Send + Sync>,
    seen: Arc<SeenSet>,
    gossip_store: Arc<dyn GossipStore>,
    gossip_sink: Arc<dyn GossipSink>,
    /// Forwards inbound `ConsensusMessage` traffic to whatever engine is
    /// currently connected (spec 4.7's `PeerMessage{id, payload}`). `None`
    /// in tests that don't exercise the consensus-relay path.
    engine: Option<Arc<dyn ConsensusEngineLink>>,
}

impl PeerEndpoint {
    pub fn new(
        peer_table: Arc<PeerTable>,
        verifier: Arc<PermissionVerifier>,
        scheme: AuthorizationScheme,
        state_root: Arc<dyn Fn() -> validator_permissions::StateRoot + Send + Sync>,
        gossip_store: Arc<dyn GossipStore>,
        gossip_sink: Arc<dyn GossipSink>,
        engine: Option<Arc<dyn ConsensusEngineLink>>,
    ) -> Self {
        Self { peer_table, verifier, scheme, state_root, seen: Arc::new(SeenSet::new()), gossip_store, gossip_sink, engine }
    }

    /// Runs the responder handshake: reads `ConnectionRequest`, replies,
    /// issues a nonce, verifies the `AuthorizationResponse`, and assigns a
    /// role set. Returns the authorized peer's id (its hex public key).
    async fn handshake(
        &self,
        inbound: &mut Streaming<PeerMessage>,
        reply: &mpsc::Sender<std::result::Result<PeerMessage, Status>>,
    ) -> Result<(String, String)> {
        let request = next_message(inbound).await?;
        let connection_request = proto::ConnectionRequest::decode(request.content.as_slice())?;
        debug!("connection request from {}", connection_request.endpoint);
        send(reply, PeerMessageType::ConnectionResponse, proto::ConnectionResponse { accepted: true, reason: String::new() }).await;

        let nonce = authorization::generate_nonce();
        send(reply, PeerMessageType::AuthorizationChallenge, proto::AuthorizationChallenge { nonce: nonce.clone() }).await;

        let response = next_message(inbound).await?;
        let auth_response = proto::AuthorizationResponse::decode(response.content.as_slice())?;
        let public_key_hex = hex::encode(&auth_response.public_key);
        let state_root = (self.state_root)();

        match self.scheme {
            AuthorizationScheme::Trust => {
                authorization::authorize_role(&self.verifier, ROLE_NETWORK, &public_key_hex, state_root)?;
            }
            AuthorizationScheme::Challenge => {
                let signature_hex = hex::encode(&auth_response.signature);
                authorization::verify_challenge_response(&self.verifier, &nonce, &public_key_hex, &signature_hex, state_root)?;
            }
        }
        Ok((public_key_hex, connection_request.endpoint))
    }

    /// The configured authorization scheme, for callers that run their own
    /// handshake variant (the outbound dialer authenticates as an initiator
    /// rather than a responder, but signs under the same scheme).
    pub(crate) fn scheme(&self) -> AuthorizationScheme {
        self.scheme
    }

    pub(crate) fn peer_table(&self) -> Arc<PeerTable> {
        self.peer_table.clone()
    }

    fn cloned(&self) -> Self {
        Self {
            peer_table: self.peer_table.clone(),
            verifier: self.verifier.clone(),
            scheme: self.scheme,
            state_root: self.state_root.clone(),
            seen: self.seen.clone(),
            gossip_store: self.gossip_store.clone(),
            gossip_sink: self.gossip_sink.clone(),
            engine: self.engine.clone(),
        }
    }

    /// Dispatches one inbound message, returning `true` if it was dropped
    /// for lacking the required role (spec: "a peer missing the required
    /// role for a message type causes the message to be dropped").
    pub(crate) async fn handle_inbound(&self, message: PeerMessage, peer_id: &str, endpoint: &str) -> bool {
        let Some(peer) = self.peer_table.get(peer_id) else { return false };
        if peer.deliver_reply(message.clone()) {
            return false;
        }
        let message_type = PeerMessageType::try_from(message.message_type).unwrap_or(PeerMessageType::Unknown);
        if requires_network_role(message_type) && !peer.has_role(ROLE_NETWORK) {
            return true;
        }
        match message_type {
            PeerMessageType::Ping => {
                if let Ok(ping) = proto::Ping::decode(message.content.as_slice()) {
                    let _ = peer.try_send(
                        PeerMessage {
                            message_type: PeerMessageType::Pong as i32,
                            correlation_id: message.correlation_id,
                            content: proto::Pong { nonce: ping.nonce }.encode_to_vec(),
                        },
                        Priority::Low,
                    );
                }
                peer.touch_heartbeat(std::time::Instant::now(), self.peer_table.epoch());
            }
            PeerMessageType::GetPeersRequest => {
                let peers = self
                    .peer_table
                    .peer_ids()
                    .into_iter()
                    .filter(|id| id != peer_id)
                    .filter_map(|id| self.peer_table.get(&id).map(|h| proto::PeerRegister { peer_id: id, endpoint: h.endpoint.clone() }))
                    .collect();
                let _ = peer.try_send(
                    PeerMessage {
                        message_type: PeerMessageType::GetPeersResponse as i32,
                        correlation_id: message.correlation_id,
                        content: proto::GetPeersResponse { peers }.encode_to_vec(),
                    },
                    Priority::Low,
                );
            }
            PeerMessageType::GossipBlock => {
                if let Ok(block) = proto::GossipBlock::decode(message.content.as_slice()) {
                    gossip::route_inbound_block(&self.seen, &self.peer_table, ROLE_NETWORK, self.gossip_sink.as_ref(), peer_id, block.block);
                }
            }
            PeerMessageType::GossipBatch => {
                if let Ok(batch) = proto::GossipBatch::decode(message.content.as_slice()) {
                    gossip::route_inbound_batch(&self.seen, &self.peer_table, ROLE_NETWORK, self.gossip_sink.as_ref(), peer_id, batch.batch);
                }
            }
            PeerMessageType::GossipBlockRequest => {
                if let Ok(req) = proto::GossipBlockRequest::decode(message.content.as_slice()) {
                    let response = gossip::handle_block_request(self.gossip_store.as_ref(), &req);
                    let _ = peer.try_send(
                        PeerMessage {
                            message_type: PeerMessageType::GossipBlockResponse as i32,
                            correlation_id: message.correlation_id,
                            content: response.encode_to_vec(),
                        },
                        Priority::High,
                    );
                }
            }
            PeerMessageType::GossipBatchByBatchIdRequest => {
                if let Ok(req) = proto::GossipBatchByBatchIdRequest::decode(message.content.as_slice()) {
                    let response = gossip::handle_batch_by_batch_id_request(self.gossip_store.as_ref(), &req);
                    let _ = peer.try_send(
                        PeerMessage {
                            message_type: PeerMessageType::GossipBatchByBatchIdResponse as i32,
                            correlation_id: message.correlation_id,
                            content: response.encode_to_vec(),
                        },
                        Priority::High,
                    );
                }
            }
            PeerMessageType::GossipBatchByTransactionIdRequest => {
                if let Ok(req) = proto::GossipBatchByTransactionIdRequest::decode(message.content.as_slice()) {
                    let response = gossip::handle_batch_by_transaction_id_request(self.gossip_store.as_ref(), &req);
                    let _ = peer.try_send(
                        PeerMessage {
                            message_type: PeerMessageType::GossipBatchByTransactionIdResponse as i32,
                            correlation_id: message.correlation_id,
                            content: response.encode_to_vec(),
                        },
                        Priority::High,
                    );
                }
            }
            PeerMessageType::ConsensusMessage => {
                if !peer.has_role(crate::peer_table::ROLE_NETWORK_CONSENSUS) {
                    return true;
                }
                if let Ok(consensus_message) = proto::ConsensusMessage::decode(message.content.as_slice()) {
                    if let Some(engine) = &self.engine {
                        if let Err(err) = engine.peer_message(peer_id, consensus_message.payload).await {
                            warn!("consensus engine rejected message from {peer_id}: {err}");
                        }
                    }
                }
            }
            other => {
                debug!("{endpoint} sent unhandled message type {other:?}");
            }
        }
        false
    }
}

/// Message types that require the sender to hold the `network` role;
/// handshake-phase messages are exempt since the role isn't assigned yet.
fn requires_network_role(message_type: PeerMessageType) -> bool {
    !matches!(
        message_type,
        PeerMessageType::ConnectionRequest
            | PeerMessageType::ConnectionResponse
            | PeerMessageType::AuthorizationChallenge
            | PeerMessageType::AuthorizationResponse
    )
}

async fn next_message(inbound: &mut Streaming<PeerMessage>) -> Result<PeerMessage> {
    match futures::StreamExt::next(inbound).await {
        Some(Ok(message)) => Ok(message),
        Some(Err(err)) => Err(crate::error::NetworkError::HandshakeFailed(err.to_string())),
        None => Err(crate::error::NetworkError::HandshakeFailed("stream closed during handshake".to_string())),
    }
}

async fn send(reply: &mpsc::Sender<std::result::Result<PeerMessage, Status>>, message_type: PeerMessageType, content: impl prost::Message) {
    let _ = reply
        .send(Ok(PeerMessage { message_type: message_type as i32, correlation_id: String::new(), content: content.encode_to_vec() }))
        .await;
}

#[tonic::async_trait]
impl PeerService for PeerEndpoint {
    type ConnectStream = ReceiverStream<std::result::Result<PeerMessage, Status>>;

    async fn connect(&self, request: Request<Streaming<PeerMessage>>) -> std::result::Result<Response<Self::ConnectStream>, Status> {
        let mut inbound = request.into_inner();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        let (peer_id, endpoint_addr) = self
            .handshake(&mut inbound, &outbound_tx)
            .await
            .map_err(|err| Status::permission_denied(err.to_string()))?;

        let mut roles = std::collections::HashSet::new();
        roles.extend(authorization::assign_roles(&self.verifier, &peer_id, (self.state_root)()).map_err(|err| Status::permission_denied(err.to_string()))?);

        let (_handle, mut high_rx, mut low_rx) = self.peer_table.register(peer_id.clone(), endpoint_addr.clone(), roles);

        let writer_tx = outbound_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    Some(message) = high_rx.recv() => {
                        if writer_tx.send(Ok(message)).await.is_err() {
                            break;
                        }
                    }
                    Some(message) = low_rx.recv() => {
                        if writer_tx.send(Ok(message)).await.is_err() {
                            break;
                        }
                    }
                    else => break,
                }
            }
        });

        let peer_table = self.peer_table.clone();
        let endpoint = self.cloned();
        let connection_peer_id = peer_id.clone();
        tokio::spawn(async move {
            loop {
                let dropped_for_role = match futures::StreamExt::next(&mut inbound).await {
                    Some(Ok(message)) => endpoint.handle_inbound(message, &connection_peer_id, &endpoint_addr).await,
                    Some(Err(err)) => {
                        warn!("peer stream error from {connection_peer_id}: {err}");
                        break;
                    }
                    None => break,
                };
                if let Some(peer) = peer_table.get(&connection_peer_id) {
                    if dropped_for_role && peer.record_violation() > MAX_VIOLATIONS {
                        warn!("closing connection to {connection_peer_id}: repeated authorization violations");
                        break;
                    }
                    peer.touch_heartbeat(std::time::Instant::now(), peer_table.epoch());
                }
            }
            peer_table.unregister(&connection_peer_id);
        });

        Ok(Response::new(ReceiverStream::new(outbound_rx)))
    }
}

/// Closes connections to peers that have missed their heartbeat deadline;
/// intended to be driven by a periodic task alongside the connection pool.
pub fn heartbeat_timeout() -> Duration {
    Duration::from_secs(30)
}
