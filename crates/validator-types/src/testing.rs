// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unsigned-key test fixtures for building valid transactions/batches/blocks
//! without each downstream crate re-implementing signing boilerplate.
//! Mirrors the teacher's `TestBlock`/`BlockV1::new` test builders.

use bytes::Bytes;
use secp256k1::SecretKey;

use crate::batch::Batch;
use crate::block::{Block, BlockHeader};
use crate::crypto::Signer;
use crate::transaction::{Transaction, TransactionHeader};

pub struct TransactionBuilder {
    header: TransactionHeader,
    payload: Vec<u8>,
    signer: Signer,
}

impl TransactionBuilder {
    pub fn new(family_name: &str, family_version: &str) -> Self {
        let signer = Signer::generate(&mut rand::thread_rng());
        Self {
            header: TransactionHeader {
                family_name: family_name.to_string(),
                family_version: family_version.to_string(),
                inputs: vec![],
                outputs: vec![],
                dependencies: vec![],
                nonce: hex::encode(rand::random::<[u8; 16]>()),
                signer_public_key: signer.public_key_hex.clone(),
                batcher_public_key: String::new(),
                payload_sha512: String::new(),
            },
            payload: Vec::new(),
            signer,
        }
    }

    pub fn inputs(mut self, inputs: Vec<String>) -> Self {
        self.header.inputs = inputs;
        self
    }

    pub fn outputs(mut self, outputs: Vec<String>) -> Self {
        self.header.outputs = outputs;
        self
    }

    pub fn dependencies(mut self, deps: Vec<String>) -> Self {
        self.header.dependencies = deps;
        self
    }

    pub fn batcher_public_key(mut self, key: impl Into<String>) -> Self {
        self.header.batcher_public_key = key.into();
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Transaction {
        Transaction::build(self.header, Bytes::from(self.payload), &self.signer.secret_key)
    }

    /// Builds the transaction, returning it along with the signing key's
    /// secret key hex so callers can later sign a batch "as the same
    /// signer" scenario.
    pub fn build_with_key(self) -> (Transaction, SecretKey) {
        let key = self.signer.secret_key;
        let txn = Transaction::build(self.header, Bytes::from(self.payload), &key);
        (txn, key)
    }
}

pub struct BatchBuilder {
    transactions: Vec<Transaction>,
    signing_key: Option<SecretKey>,
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self {
            transactions: Vec::new(),
            signing_key: None,
        }
    }

    pub fn transaction(mut self, txn: Transaction) -> Self {
        self.transactions.push(txn);
        self
    }

    pub fn signing_key(mut self, key: SecretKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    pub fn build(self) -> Batch {
        let key = self.signing_key.unwrap_or_else(|| SecretKey::new(&mut rand::thread_rng()));
        Batch::build(self.transactions, &key).expect("test batches are never empty")
    }
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BlockBuilder {
    block_num: u64,
    previous_block_id: String,
    batches: Vec<Batch>,
    state_root_hash: String,
    consensus: Bytes,
    signing_key: SecretKey,
}

impl BlockBuilder {
    pub fn new(block_num: u64, previous_block_id: impl Into<String>) -> Self {
        Self {
            block_num,
            previous_block_id: previous_block_id.into(),
            batches: Vec::new(),
            state_root_hash: "0".repeat(70),
            consensus: Bytes::new(),
            signing_key: SecretKey::new(&mut rand::thread_rng()),
        }
    }

    pub fn batch(mut self, batch: Batch) -> Self {
        self.batches.push(batch);
        self
    }

    pub fn state_root_hash(mut self, root: impl Into<String>) -> Self {
        self.state_root_hash = root.into();
        self
    }

    pub fn consensus(mut self, bytes: Vec<u8>) -> Self {
        self.consensus = Bytes::from(bytes);
        self
    }

    pub fn build(self) -> Block {
        let header = BlockHeader {
            block_num: self.block_num,
            previous_block_id: self.previous_block_id,
            signer_public_key: String::new(),
            batch_ids: vec![],
            state_root_hash: self.state_root_hash,
            consensus: self.consensus,
        };
        Block::build(header, self.batches, &self.signing_key)
    }
}
