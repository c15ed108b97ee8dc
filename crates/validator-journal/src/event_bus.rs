// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Subscription fan-out for `block-commit`/`state-delta`/`transaction-receipt`
//! events (spec §6 "external interfaces"). The component endpoint (C5) is
//! expected to expose these as subscribe RPCs; this module only owns the
//! in-process broadcast, matching the boundary the spec draws around what's
//! in scope ("the subscription mechanism itself is in scope, the REST
//! API/CLI that would consume it is not").

use tokio::sync::broadcast;

use validator_types::{StateChange, TransactionReceipt};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub struct BlockCommitEvent {
    pub block_id: String,
    pub block_num: u64,
    pub state_root_hash: String,
}

#[derive(Clone, Debug)]
pub struct StateDeltaEvent {
    pub block_id: String,
    pub state_changes: Vec<StateChange>,
}

#[derive(Clone, Debug)]
pub struct TransactionReceiptEvent {
    pub block_id: String,
    pub receipt: TransactionReceipt,
}

/// Delivery order matches §5's ordering guarantee: events are published in
/// block commit order, then in-block slate order, never ahead of an
/// ancestor's commit event.
#[derive(Clone)]
pub struct EventBus {
    block_commit: broadcast::Sender<BlockCommitEvent>,
    state_delta: broadcast::Sender<StateDeltaEvent>,
    transaction_receipt: broadcast::Sender<TransactionReceiptEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            block_commit: broadcast::channel(CHANNEL_CAPACITY).0,
            state_delta: broadcast::channel(CHANNEL_CAPACITY).0,
            transaction_receipt: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe_block_commit(&self) -> broadcast::Receiver<BlockCommitEvent> {
        self.block_commit.subscribe()
    }

    pub fn subscribe_state_delta(&self) -> broadcast::Receiver<StateDeltaEvent> {
        self.state_delta.subscribe()
    }

    pub fn subscribe_transaction_receipt(&self) -> broadcast::Receiver<TransactionReceiptEvent> {
        self.transaction_receipt.subscribe()
    }

    /// Publishes one committed block's full event set: the commit event,
    /// then one state-delta and one transaction-receipt event per
    /// transaction in slate order. Subscriber counts of zero are not
    /// errors — `send` failing just means nobody's listening yet.
    pub fn publish_commit(&self, block_id: &str, block_num: u64, state_root_hash: &str, receipts: &[TransactionReceipt]) {
        let _ = self.block_commit.send(BlockCommitEvent {
            block_id: block_id.to_string(),
            block_num,
            state_root_hash: state_root_hash.to_string(),
        });
        for receipt in receipts {
            if !receipt.state_changes.is_empty() {
                let _ = self.state_delta.send(StateDeltaEvent {
                    block_id: block_id.to_string(),
                    state_changes: receipt.state_changes.clone(),
                });
            }
            let _ = self.transaction_receipt.send(TransactionReceiptEvent { block_id: block_id.to_string(), receipt: receipt.clone() });
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator_types::TransactionReceipt;

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish_commit("b1", 1, "00", &[]);
    }

    #[tokio::test]
    async fn subscriber_sees_commit_then_receipt_events() {
        let bus = EventBus::new();
        let mut commits = bus.subscribe_block_commit();
        let mut receipts = bus.subscribe_transaction_receipt();

        let receipt = TransactionReceipt::valid("t1", vec![], vec![]);
        bus.publish_commit("b1", 1, "00", std::slice::from_ref(&receipt));

        let commit = commits.recv().await.unwrap();
        assert_eq!(commit.block_id, "b1");
        let receipt_event = receipts.recv().await.unwrap();
        assert_eq!(receipt_event.receipt.transaction_id, "t1");
    }
}
