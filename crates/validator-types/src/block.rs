// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use prost::Message;
use sha2::{Digest, Sha256};

use crate::batch::Batch;
use crate::crypto::verify_header_signature;
use crate::error::TypesError;
use crate::proto;

/// Sentinel `previous_block_id` for block 0.
pub const NULL_BLOCK_ID: &str = "0000000000000000000000000000000000000000000000000000000000000000000000";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_num: u64,
    pub previous_block_id: String,
    pub signer_public_key: String,
    pub batch_ids: Vec<String>,
    pub state_root_hash: String,
    pub consensus: Bytes,
}

impl From<proto::BlockHeader> for BlockHeader {
    fn from(h: proto::BlockHeader) -> Self {
        Self {
            block_num: h.block_num,
            previous_block_id: h.previous_block_id,
            signer_public_key: h.signer_public_key,
            batch_ids: h.batch_ids,
            state_root_hash: h.state_root_hash,
            consensus: h.consensus.into(),
        }
    }
}

impl From<BlockHeader> for proto::BlockHeader {
    fn from(h: BlockHeader) -> Self {
        Self {
            block_num: h.block_num,
            previous_block_id: h.previous_block_id,
            signer_public_key: h.signer_public_key,
            batch_ids: h.batch_ids,
            state_root_hash: h.state_root_hash,
            consensus: h.consensus.to_vec(),
        }
    }
}

/// A signed container of batches, linked to a parent block and to a
/// specific version of global state.
#[derive(Clone, Debug)]
pub struct Block {
    header_bytes: Bytes,
    header: BlockHeader,
    header_signature: String,
    batches: Vec<Batch>,
}

impl Block {
    /// Decodes and structurally validates a block: the header must parse,
    /// `batch_ids` must match `batches` in the same order, and block 0 must
    /// carry `previous_block_id == NULL_BLOCK_ID` (the converse — that only
    /// the genesis process may produce block 0 — is enforced by the
    /// publisher, not here).
    pub fn decode(
        header_bytes: Bytes,
        header_signature: String,
        batches: Vec<Batch>,
    ) -> Result<Self, TypesError> {
        let decoded = proto::BlockHeader::decode(header_bytes.as_ref())?;
        let header = BlockHeader::from(decoded);

        if header.batch_ids.len() != batches.len() {
            return Err(TypesError::InvalidAddress(
                "block header batch_ids length mismatch".to_string(),
            ));
        }
        for (expected_id, batch) in header.batch_ids.iter().zip(batches.iter()) {
            if expected_id != batch.id() {
                return Err(TypesError::InvalidAddress(format!(
                    "block header batch order mismatch: expected {expected_id}, got {}",
                    batch.id()
                )));
            }
        }
        if header.block_num == 0 && header.previous_block_id != NULL_BLOCK_ID {
            return Err(TypesError::InvalidAddress(
                "block 0 must have previous_block_id == NULL_BLOCK_ID".to_string(),
            ));
        }

        Ok(Self {
            header_bytes,
            header,
            header_signature,
            batches,
        })
    }

    pub fn build(
        mut header: BlockHeader,
        batches: Vec<Batch>,
        signing_key: &secp256k1::SecretKey,
    ) -> Self {
        header.batch_ids = batches.iter().map(|b| b.id().to_string()).collect();
        let public_key = secp256k1::PublicKey::from_secret_key(secp256k1::SECP256K1, signing_key);
        header.signer_public_key = hex::encode(public_key.serialize());
        let header_bytes: Bytes = proto::BlockHeader::from(header.clone()).encode_to_vec().into();
        let header_signature = crate::crypto::sign_header(&header_bytes, signing_key);
        Self {
            header_bytes,
            header,
            header_signature,
            batches,
        }
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn id(&self) -> &str {
        &self.header_signature
    }

    pub fn verify_signature(&self) -> Result<(), TypesError> {
        verify_header_signature(&self.header_bytes, &self.header_signature, &self.header.signer_public_key)
    }

    pub fn to_proto(&self) -> proto::Block {
        proto::Block {
            header: self.header_bytes.to_vec(),
            header_signature: self.header_signature.clone(),
            batches: self.batches.iter().map(Batch::to_proto).collect(),
        }
    }

    /// Convenience content-address for wire payloads that need a digest of
    /// the whole block rather than just the signature (e.g. gossip seen-sets).
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.header_bytes);
        hasher.update(self.header_signature.as_bytes());
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BatchBuilder, BlockBuilder, TransactionBuilder};

    #[test]
    fn genesis_block_requires_null_parent() {
        let txn = TransactionBuilder::new("sawtooth_settings", "1.0")
            .payload(b"noop".to_vec())
            .build();
        let batch = BatchBuilder::new().transaction(txn).build();
        let block = BlockBuilder::new(0, NULL_BLOCK_ID).batch(batch).build();
        assert_eq!(block.header().previous_block_id, NULL_BLOCK_ID);
    }

    #[test]
    fn decode_rejects_block_zero_with_non_null_parent() {
        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"x".to_vec()).build();
        let batch = BatchBuilder::new().transaction(txn).build();
        let block = BlockBuilder::new(0, "deadbeef".repeat(16)).batch(batch).build();
        let proto = block.to_proto();
        let batches: Vec<Batch> = block.batches().to_vec();
        let err = Block::decode(proto.header.into(), proto.header_signature, batches).unwrap_err();
        assert!(matches!(err, TypesError::InvalidAddress(_)));
    }
}
