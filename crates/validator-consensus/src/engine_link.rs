// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The §4.7 protocol types: `ConsensusEngineLink` is the validator->engine
//! half (startup/block-lifecycle/peer notifications sent to whichever
//! engine is currently connected), `EngineCommand` is the engine->validator
//! half (block-build/finalize/commit commands delivered to whatever owns
//! block publishing and chain control).

use async_trait::async_trait;

use crate::error::Result;

/// Calls the validator makes into the connected consensus engine.
#[async_trait]
pub trait ConsensusEngineLink: Send + Sync {
    async fn startup_info(&self, chain_head: String, peers: Vec<String>, local_peer_info: Vec<u8>) -> Result<()>;
    async fn block_new(&self, block_header: Vec<u8>, batches_summary: Vec<u8>) -> Result<()>;
    async fn block_valid(&self, block_id: &str) -> Result<()>;
    async fn block_invalid(&self, block_id: &str, reason: &str) -> Result<()>;
    async fn block_commit(&self, block_id: &str) -> Result<()>;
    async fn peer_connected(&self, peer_id: &str) -> Result<()>;
    async fn peer_disconnected(&self, peer_id: &str) -> Result<()>;
    async fn peer_message(&self, peer_id: &str, payload: Vec<u8>) -> Result<()>;
}

/// Commands the connected engine issues back to the validator. Delivered,
/// in order, to whatever implements `EngineCallback` (the block publisher
/// for `InitializeBlock`/`SummarizeBlock`/`FinalizeBlock`/`CancelBlock`, the
/// block validator for `CheckBlocks`, the chain controller for
/// `CommitBlock`/`IgnoreBlock`/`FailBlock`, the peer table for `SendTo`/
/// `Broadcast`).
#[derive(Clone, Debug, PartialEq)]
pub enum EngineCommand {
    InitializeBlock { previous_block_id: String },
    SummarizeBlock,
    FinalizeBlock { consensus_data: Vec<u8> },
    CancelBlock,
    CheckBlocks { block_ids: Vec<String> },
    CommitBlock { block_id: String },
    IgnoreBlock { block_id: String },
    FailBlock { block_id: String },
    SendTo { peer_id: String, payload: Vec<u8> },
    Broadcast { payload: Vec<u8> },
}

/// Result of a `SummarizeBlock` command, handed back to the engine as a
/// `SummarizeBlockResponse`.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockSummary {
    pub state_root_hash: Vec<u8>,
    pub batch_count: u64,
}

/// Receives `EngineCommand`s dispatched from the connected engine. The
/// ordering guarantee (the validator never commits a block without an
/// explicit `CommitBlock`, except genesis) is the caller's responsibility:
/// this trait only delivers the command, it doesn't enforce the guarantee.
#[async_trait]
pub trait EngineCallback: Send + Sync {
    async fn on_command(&self, command: EngineCommand);

    /// `SummarizeBlock` is the one engine->validator message with a return
    /// value delivered back to the engine rather than fire-and-forget.
    async fn summarize_block(&self) -> BlockSummary;
}
