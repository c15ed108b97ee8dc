// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Routes each `EngineCommand` variant to the subsystem that owns it, per
//! `engine_link.rs`'s own doc comment: the block publisher for
//! `InitializeBlock`/`SummarizeBlock`/`FinalizeBlock`/`CancelBlock`, the
//! chain controller for `CommitBlock`/`IgnoreBlock`/`FailBlock`, the block
//! store for `CheckBlocks` (blocks already known to be valid are simply
//! reconfirmed; fetching not-yet-seen blocks is gossip's job), and the peer
//! table for `SendTo`/`Broadcast`. `ConsensusEndpoint` holds exactly one
//! `EngineCallback`, so this router is the one place that fans those
//! commands back out.

use std::sync::Arc;

use async_trait::async_trait;
use prost::Message as _;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use validator_consensus::{BlockSummary, ConsensusEngineLink, EngineCallback, EngineCommand};
use validator_journal::{BlockPublisher, ChainController};
use validator_network::peer_table::{Priority, ROLE_NETWORK_CONSENSUS};
use validator_network::proto::{ConsensusMessage, PeerMessage, PeerMessageType};
use validator_network::PeerTable;
use validator_storage::BlockStore;

pub struct EngineRouter {
    publisher: Arc<BlockPublisher>,
    chain_controller: ChainController,
    block_store: BlockStore,
    peer_table: Arc<PeerTable>,
    engine: Arc<dyn ConsensusEngineLink>,
}

impl EngineRouter {
    pub fn new(
        publisher: Arc<BlockPublisher>,
        chain_controller: ChainController,
        block_store: BlockStore,
        peer_table: Arc<PeerTable>,
        engine: Arc<dyn ConsensusEngineLink>,
    ) -> Self {
        Self { publisher, chain_controller, block_store, peer_table, engine }
    }

    async fn initialize_block(&self, previous_block_id: String) {
        if let Err(err) = self.publisher.build_block(previous_block_id).await {
            warn!("build_block failed: {err}");
        }
    }

    async fn finalize_block(&self, consensus_data: Vec<u8>) {
        let block = match self.publisher.finalize_block(consensus_data, CancellationToken::new()).await {
            Ok(block) => block,
            Err(err) => {
                warn!("finalize_block failed: {err}");
                return;
            }
        };
        let block_id = block.id().to_string();
        let bytes = validator_journal::wire::encode_block(&block);
        let sent = validator_network::gossip::broadcast_block(&self.peer_table, validator_network::peer_table::ROLE_NETWORK, bytes);
        info!(block_id, peers = sent, "broadcast finalized block");
        if let Err(err) = self.chain_controller.submit_block(block, CancellationToken::new()).await {
            warn!(block_id, "finalized block failed re-validation: {err}");
        }
    }

    async fn check_blocks(&self, block_ids: Vec<String>) {
        for block_id in block_ids {
            match self.block_store.get_block(&block_id) {
                Ok(Some(_)) => {
                    if let Err(err) = self.engine.block_valid(&block_id).await {
                        warn!(block_id, "failed to reconfirm known-valid block to engine: {err}");
                    }
                }
                Ok(None) => {
                    warn!(block_id, "engine asked to check an unknown block; it must arrive via BlockNew first");
                }
                Err(err) => warn!(block_id, "storage error checking block: {err}"),
            }
        }
    }

    fn send_to(&self, peer_id: &str, payload: Vec<u8>) {
        let Some(peer) = self.peer_table.get(peer_id) else {
            warn!(peer_id, "SendTo targets an unknown peer");
            return;
        };
        let message = PeerMessage {
            message_type: PeerMessageType::ConsensusMessage as i32,
            correlation_id: String::new(),
            content: ConsensusMessage { payload }.encode_to_vec(),
        };
        if let Err(err) = peer.try_send(message, Priority::High) {
            warn!(peer_id, "failed to relay consensus message: {err}");
        }
    }

    fn broadcast(&self, payload: Vec<u8>) {
        let message = PeerMessage {
            message_type: PeerMessageType::ConsensusMessage as i32,
            correlation_id: String::new(),
            content: ConsensusMessage { payload }.encode_to_vec(),
        };
        let mut sent = 0;
        for (_, peer) in self.peer_table.peers_with_role(ROLE_NETWORK_CONSENSUS) {
            if peer.try_send(message.clone(), Priority::High).is_ok() {
                sent += 1;
            }
        }
        info!(peers = sent, "relayed consensus broadcast");
    }
}

#[async_trait]
impl EngineCallback for EngineRouter {
    async fn on_command(&self, command: EngineCommand) {
        match command {
            EngineCommand::InitializeBlock { previous_block_id } => self.initialize_block(previous_block_id).await,
            EngineCommand::SummarizeBlock => {
                // Handled via `summarize_block`, which returns a reply to the
                // engine directly; nothing to do on the fire-and-forget path.
            }
            EngineCommand::FinalizeBlock { consensus_data } => self.finalize_block(consensus_data).await,
            EngineCommand::CancelBlock => {
                self.publisher.cancel_block();
            }
            EngineCommand::CheckBlocks { block_ids } => self.check_blocks(block_ids).await,
            EngineCommand::CommitBlock { block_id } => {
                if let Err(err) = self.chain_controller.commit_block(block_id.clone()).await {
                    warn!(block_id, "commit_block failed: {err}");
                }
            }
            EngineCommand::IgnoreBlock { block_id } => self.chain_controller.ignore_block(block_id).await,
            EngineCommand::FailBlock { block_id } => self.chain_controller.fail_block(block_id).await,
            EngineCommand::SendTo { peer_id, payload } => self.send_to(&peer_id, payload),
            EngineCommand::Broadcast { payload } => self.broadcast(payload),
        }
    }

    async fn summarize_block(&self) -> BlockSummary {
        match self.publisher.summarize_block().await {
            Ok((state_root_hash, batch_count)) => BlockSummary { state_root_hash, batch_count },
            Err(err) => {
                warn!("summarize_block failed: {err}");
                BlockSummary { state_root_hash: Vec::new(), batch_count: 0 }
            }
        }
    }
}
