// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Content-addressed persistence for blocks, batches, transactions, and
//! transaction receipts (C1), plus the chain-head pointer and a
//! block-number index used for pruning (§4.12 "manage completed blocks").
//!
//! Blocks cascade: storing a block stores every batch and transaction it
//! contains and the secondary indexes (`batch -> block`, `txn -> batch`)
//! needed to answer "which block committed this batch/transaction" without
//! a table scan.

use std::sync::Arc;

use prost::Message;

use validator_types::{Batch, Block, BlockReceipt, Transaction};

use crate::error::Result;
use crate::kv::{
    KvStore, WriteOp, CF_BATCHES, CF_BATCH_TO_BLOCK, CF_BLOCKS, CF_BLOCK_NUM_TO_ID, CF_CHAIN_META, CF_RECEIPTS,
    CF_TRANSACTIONS, CF_TXN_TO_BATCH,
};
use crate::metrics::StorageMetrics;

const CHAIN_HEAD_KEY: &[u8] = b"chain_head";

fn encode_transaction(txn: &Transaction) -> Vec<u8> {
    txn.to_proto().encode_to_vec()
}

fn decode_transaction(bytes: &[u8]) -> Result<Transaction> {
    let proto = validator_types::proto::Transaction::decode(bytes)?;
    transaction_from_proto(proto)
}

fn transaction_from_proto(proto: validator_types::proto::Transaction) -> Result<Transaction> {
    Ok(Transaction::decode(proto.header.into(), proto.header_signature, proto.payload.into())?)
}

fn encode_batch(batch: &Batch) -> Vec<u8> {
    batch.to_proto().encode_to_vec()
}

fn decode_batch(bytes: &[u8]) -> Result<Batch> {
    let proto = validator_types::proto::Batch::decode(bytes)?;
    batch_from_proto(proto)
}

fn batch_from_proto(proto: validator_types::proto::Batch) -> Result<Batch> {
    let transactions = proto
        .transactions
        .into_iter()
        .map(transaction_from_proto)
        .collect::<Result<Vec<_>>>()?;
    Ok(Batch::decode(proto.header.into(), proto.header_signature, transactions)?)
}

fn encode_block(block: &Block) -> Vec<u8> {
    block.to_proto().encode_to_vec()
}

fn decode_block(bytes: &[u8]) -> Result<Block> {
    let proto = validator_types::proto::Block::decode(bytes)?;
    let batches = proto
        .batches
        .into_iter()
        .map(batch_from_proto)
        .collect::<Result<Vec<_>>>()?;
    Ok(Block::decode(proto.header.into(), proto.header_signature, batches)?)
}

/// Facade over the content-addressed tables plus the chain-head pointer.
/// Cheap to clone (wraps the same `Arc<DB>` as `KvStore`).
#[derive(Clone)]
pub struct BlockStore {
    kv: KvStore,
    metrics: Option<Arc<StorageMetrics>>,
}

impl BlockStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv, metrics: None }
    }

    /// Attaches `StorageMetrics` so `set_chain_head` keeps
    /// `chain_head_block_num` current. Optional: most call sites (tests,
    /// one-off tooling) have no `Registry` to register against.
    pub fn with_metrics(mut self, metrics: Arc<StorageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Persists a block and everything it references. All-or-nothing via a
    /// single `WriteBatch`, matching the commit-atomicity invariant that
    /// already governs batch/block validity.
    pub fn put_block(&self, block: &Block) -> Result<()> {
        let mut ops = Vec::new();
        let block_id = block.id().to_string();

        for batch in block.batches() {
            ops.push(WriteOp::Put {
                cf: CF_BATCHES,
                key: batch.id().as_bytes().to_vec(),
                value: encode_batch(batch),
            });
            ops.push(WriteOp::Put {
                cf: CF_BATCH_TO_BLOCK,
                key: batch.id().as_bytes().to_vec(),
                value: block_id.clone().into_bytes(),
            });
            for txn in batch.transactions() {
                ops.push(WriteOp::Put {
                    cf: CF_TRANSACTIONS,
                    key: txn.id().as_bytes().to_vec(),
                    value: encode_transaction(txn),
                });
                ops.push(WriteOp::Put {
                    cf: CF_TXN_TO_BATCH,
                    key: txn.id().as_bytes().to_vec(),
                    value: batch.id().as_bytes().to_vec(),
                });
            }
        }

        ops.push(WriteOp::Put {
            cf: CF_BLOCKS,
            key: block_id.clone().into_bytes(),
            value: encode_block(block),
        });
        ops.push(WriteOp::Put {
            cf: CF_BLOCK_NUM_TO_ID,
            key: block.header().block_num.to_be_bytes().to_vec(),
            value: block_id.into_bytes(),
        });

        self.kv.write_batch(ops)
    }

    pub fn get_block(&self, block_id: &str) -> Result<Option<Block>> {
        match self.kv.get(CF_BLOCKS, block_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_block(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_block_by_num(&self, block_num: u64) -> Result<Option<Block>> {
        match self.kv.get(CF_BLOCK_NUM_TO_ID, &block_num.to_be_bytes())? {
            Some(id_bytes) => {
                let block_id = String::from_utf8_lossy(&id_bytes).to_string();
                self.get_block(&block_id)
            }
            None => Ok(None),
        }
    }

    pub fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>> {
        match self.kv.get(CF_BATCHES, batch_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_batch(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_transaction(&self, txn_id: &str) -> Result<Option<Transaction>> {
        match self.kv.get(CF_TRANSACTIONS, txn_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_transaction(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Id of the block that committed `batch_id`, if any.
    pub fn block_id_for_batch(&self, batch_id: &str) -> Result<Option<String>> {
        Ok(self
            .kv
            .get(CF_BATCH_TO_BLOCK, batch_id.as_bytes())?
            .map(|b| String::from_utf8_lossy(&b).to_string()))
    }

    /// Id of the batch that carried `txn_id`, if any.
    pub fn batch_id_for_transaction(&self, txn_id: &str) -> Result<Option<String>> {
        Ok(self
            .kv
            .get(CF_TXN_TO_BATCH, txn_id.as_bytes())?
            .map(|b| String::from_utf8_lossy(&b).to_string()))
    }

    pub fn put_receipt(&self, receipt: &BlockReceipt) -> Result<()> {
        let bytes = bcs::to_bytes(receipt)?;
        self.kv.put(CF_RECEIPTS, receipt.block_id.as_bytes(), &bytes)
    }

    pub fn get_receipt(&self, block_id: &str) -> Result<Option<BlockReceipt>> {
        match self.kv.get(CF_RECEIPTS, block_id.as_bytes())? {
            Some(bytes) => Ok(Some(bcs::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn chain_head(&self) -> Result<Option<String>> {
        Ok(self
            .kv
            .get(CF_CHAIN_META, CHAIN_HEAD_KEY)?
            .map(|b| String::from_utf8_lossy(&b).to_string()))
    }

    pub fn set_chain_head(&self, block_id: &str) -> Result<()> {
        self.kv.put(CF_CHAIN_META, CHAIN_HEAD_KEY, block_id.as_bytes())?;
        if let Some(metrics) = &self.metrics {
            if let Ok(Some(block)) = self.get_block(block_id) {
                metrics.chain_head_block_num.set(block.header().block_num as i64);
            }
        }
        Ok(())
    }

    /// Drops blocks (and their batches/transactions/receipts) strictly below
    /// `keep_from_num`, keeping the chain head's ancestry pruning bounded.
    /// Never prunes the current chain head's block_num or above.
    pub fn prune_below(&self, keep_from_num: u64) -> Result<()> {
        let mut ops = Vec::new();
        for block_num in 0..keep_from_num {
            let Some(block) = self.get_block_by_num(block_num)? else {
                continue;
            };
            for batch in block.batches() {
                for txn in batch.transactions() {
                    ops.push(WriteOp::Delete { cf: CF_TRANSACTIONS, key: txn.id().as_bytes().to_vec() });
                    ops.push(WriteOp::Delete { cf: CF_TXN_TO_BATCH, key: txn.id().as_bytes().to_vec() });
                }
                ops.push(WriteOp::Delete { cf: CF_BATCHES, key: batch.id().as_bytes().to_vec() });
                ops.push(WriteOp::Delete { cf: CF_BATCH_TO_BLOCK, key: batch.id().as_bytes().to_vec() });
            }
            ops.push(WriteOp::Delete { cf: CF_RECEIPTS, key: block.id().as_bytes().to_vec() });
            ops.push(WriteOp::Delete { cf: CF_BLOCKS, key: block.id().as_bytes().to_vec() });
            ops.push(WriteOp::Delete { cf: CF_BLOCK_NUM_TO_ID, key: block_num.to_be_bytes().to_vec() });
        }
        self.kv.write_batch(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator_types::testing::{BatchBuilder, BlockBuilder, TransactionBuilder};

    fn sample_block(block_num: u64, previous_block_id: &str) -> Block {
        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"set a 1".to_vec()).build();
        let batch = BatchBuilder::new().transaction(txn).build();
        BlockBuilder::new(block_num, previous_block_id).batch(batch).build()
    }

    #[test]
    fn put_then_get_block_round_trips_with_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let store = BlockStore::new(kv);

        let block = sample_block(0, validator_types::NULL_BLOCK_ID);
        let batch_id = block.batches()[0].id().to_string();
        let txn_id = block.batches()[0].transactions()[0].id().to_string();
        store.put_block(&block).unwrap();

        let fetched = store.get_block(block.id()).unwrap().unwrap();
        assert_eq!(fetched.id(), block.id());
        assert_eq!(store.block_id_for_batch(&batch_id).unwrap().as_deref(), Some(block.id()));
        assert_eq!(store.batch_id_for_transaction(&txn_id).unwrap().as_deref(), Some(batch_id.as_str()));
        assert_eq!(store.get_transaction(&txn_id).unwrap().unwrap().id(), txn_id);
        assert_eq!(store.get_block_by_num(0).unwrap().unwrap().id(), block.id());
    }

    #[test]
    fn chain_head_tracks_latest_set() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let store = BlockStore::new(kv);
        assert_eq!(store.chain_head().unwrap(), None);
        store.set_chain_head("abc123").unwrap();
        assert_eq!(store.chain_head().unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn prune_below_removes_old_blocks_but_keeps_recent() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let store = BlockStore::new(kv);

        let block0 = sample_block(0, validator_types::NULL_BLOCK_ID);
        let block1 = sample_block(1, block0.id());
        store.put_block(&block0).unwrap();
        store.put_block(&block1).unwrap();

        store.prune_below(1).unwrap();

        assert!(store.get_block(block0.id()).unwrap().is_none());
        assert!(store.get_block(block1.id()).unwrap().is_some());
    }
}
