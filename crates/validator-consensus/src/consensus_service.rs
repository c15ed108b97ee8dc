// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! C13 wire adapter: the tonic `ConsensusService::connect` endpoint the
//! consensus engine dials into. On connect, registers a `ProtoEngineLink`
//! (encodes `ConsensusEngineLink` calls as `ConsensusMessage` envelopes) as
//! the active engine with the `ConsensusInterface` actor; on disconnect,
//! clears it, putting the validator back into the degraded state. Inbound
//! engine->validator commands are decoded and handed to the registered
//! `EngineCallback`. Modeled on `component_service.rs`'s connection-task
//! shape.

use std::sync::Arc;

use async_trait::async_trait;
use prost::Message as _;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::warn;

use crate::dispatcher::ConsensusInterface;
use crate::engine_link::{ConsensusEngineLink, EngineCallback, EngineCommand};
use crate::error::{ConsensusError, Result};
use crate::proto::consensus_service_server::ConsensusService;
use crate::proto::{self, ConsensusMessage, ConsensusMessageType};

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

struct ProtoEngineLink {
    outbound: mpsc::Sender<std::result::Result<ConsensusMessage, Status>>,
}

impl ProtoEngineLink {
    fn send(&self, message_type: ConsensusMessageType, content: impl prost::Message) -> Result<()> {
        let envelope = ConsensusMessage { message_type: message_type as i32, correlation_id: String::new(), content: content.encode_to_vec() };
        self.outbound.try_send(Ok(envelope)).map_err(|_| ConsensusError::EngineDisconnected)
    }
}

#[async_trait]
impl ConsensusEngineLink for ProtoEngineLink {
    async fn startup_info(&self, chain_head: String, peers: Vec<String>, local_peer_info: Vec<u8>) -> Result<()> {
        self.send(ConsensusMessageType::StartupInfo, proto::StartupInfo { chain_head, peers, local_peer_info })
    }

    async fn block_new(&self, block_header: Vec<u8>, batches_summary: Vec<u8>) -> Result<()> {
        self.send(ConsensusMessageType::BlockNew, proto::BlockNew { block_header, batches_summary })
    }

    async fn block_valid(&self, block_id: &str) -> Result<()> {
        self.send(ConsensusMessageType::BlockValid, proto::BlockValid { block_id: block_id.to_string() })
    }

    async fn block_invalid(&self, block_id: &str, reason: &str) -> Result<()> {
        self.send(ConsensusMessageType::BlockInvalid, proto::BlockInvalid { block_id: block_id.to_string(), reason: reason.to_string() })
    }

    async fn block_commit(&self, block_id: &str) -> Result<()> {
        self.send(ConsensusMessageType::BlockCommit, proto::BlockCommit { block_id: block_id.to_string() })
    }

    async fn peer_connected(&self, peer_id: &str) -> Result<()> {
        self.send(ConsensusMessageType::PeerConnected, proto::PeerConnected { peer_id: peer_id.to_string() })
    }

    async fn peer_disconnected(&self, peer_id: &str) -> Result<()> {
        self.send(ConsensusMessageType::PeerDisconnected, proto::PeerDisconnected { peer_id: peer_id.to_string() })
    }

    async fn peer_message(&self, peer_id: &str, payload: Vec<u8>) -> Result<()> {
        self.send(ConsensusMessageType::PeerMessage, proto::PeerMessage { peer_id: peer_id.to_string(), payload })
    }
}

pub struct ConsensusEndpoint {
    interface: ConsensusInterface,
    callback: Arc<dyn EngineCallback>,
}

impl ConsensusEndpoint {
    pub fn new(interface: ConsensusInterface, callback: Arc<dyn EngineCallback>) -> Self {
        Self { interface, callback }
    }

    async fn handle_inbound(&self, message: ConsensusMessage, outbound: &mpsc::Sender<std::result::Result<ConsensusMessage, Status>>) {
        let message_type = ConsensusMessageType::try_from(message.message_type).unwrap_or(ConsensusMessageType::Unknown);
        let content = message.content.as_slice();
        let command = match message_type {
            ConsensusMessageType::InitializeBlock => proto::InitializeBlock::decode(content)
                .ok()
                .map(|m| EngineCommand::InitializeBlock { previous_block_id: m.previous_block_id }),
            ConsensusMessageType::SummarizeBlock => {
                let summary = self.callback.summarize_block().await;
                let response = proto::SummarizeBlockResponse { state_root_hash: summary.state_root_hash, batch_count: summary.batch_count };
                let envelope = ConsensusMessage {
                    message_type: ConsensusMessageType::SummarizeBlockResponse as i32,
                    correlation_id: message.correlation_id.clone(),
                    content: response.encode_to_vec(),
                };
                let _ = outbound.send(Ok(envelope)).await;
                None
            }
            ConsensusMessageType::FinalizeBlock => proto::FinalizeBlock::decode(content)
                .ok()
                .map(|m| EngineCommand::FinalizeBlock { consensus_data: m.consensus_data }),
            ConsensusMessageType::CancelBlock => Some(EngineCommand::CancelBlock),
            ConsensusMessageType::CheckBlocks => {
                proto::CheckBlocks::decode(content).ok().map(|m| EngineCommand::CheckBlocks { block_ids: m.block_ids })
            }
            ConsensusMessageType::CommitBlock => {
                proto::CommitBlock::decode(content).ok().map(|m| EngineCommand::CommitBlock { block_id: m.block_id })
            }
            ConsensusMessageType::IgnoreBlock => {
                proto::IgnoreBlock::decode(content).ok().map(|m| EngineCommand::IgnoreBlock { block_id: m.block_id })
            }
            ConsensusMessageType::FailBlock => proto::FailBlock::decode(content).ok().map(|m| EngineCommand::FailBlock { block_id: m.block_id }),
            ConsensusMessageType::SendTo => {
                proto::SendTo::decode(content).ok().map(|m| EngineCommand::SendTo { peer_id: m.peer_id, payload: m.payload })
            }
            ConsensusMessageType::Broadcast => proto::Broadcast::decode(content).ok().map(|m| EngineCommand::Broadcast { payload: m.payload }),
            other => {
                warn!("unexpected message type from consensus engine: {other:?}");
                None
            }
        };
        if let Some(command) = command {
            self.callback.on_command(command).await;
        }
    }
}

#[tonic::async_trait]
impl ConsensusService for ConsensusEndpoint {
    type ConnectStream = ReceiverStream<std::result::Result<ConsensusMessage, Status>>;

    async fn connect(&self, request: Request<Streaming<ConsensusMessage>>) -> std::result::Result<Response<Self::ConnectStream>, Status> {
        let mut inbound = request.into_inner();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        let engine: Arc<dyn ConsensusEngineLink> = Arc::new(ProtoEngineLink { outbound: outbound_tx.clone() });
        self.interface.set_engine(engine).await;

        let interface = self.interface.clone();
        let endpoint = ConsensusEndpoint { interface: self.interface.clone(), callback: self.callback.clone() };
        tokio::spawn(async move {
            loop {
                match futures::StreamExt::next(&mut inbound).await {
                    Some(Ok(message)) => endpoint.handle_inbound(message, &outbound_tx).await,
                    Some(Err(err)) => {
                        warn!("consensus engine stream error: {err}");
                        break;
                    }
                    None => break,
                }
            }
            interface.clear_engine().await;
        });

        Ok(Response::new(ReceiverStream::new(outbound_rx)))
    }
}
