// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use prost::Message;

use crate::crypto::verify_header_signature;
use crate::error::TypesError;
use crate::proto;
use crate::transaction::Transaction;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchHeader {
    pub signer_public_key: String,
    pub transaction_ids: Vec<String>,
}

impl From<proto::BatchHeader> for BatchHeader {
    fn from(h: proto::BatchHeader) -> Self {
        Self {
            signer_public_key: h.signer_public_key,
            transaction_ids: h.transaction_ids,
        }
    }
}

impl From<BatchHeader> for proto::BatchHeader {
    fn from(h: BatchHeader) -> Self {
        Self {
            signer_public_key: h.signer_public_key,
            transaction_ids: h.transaction_ids,
        }
    }
}

/// A signed, ordered group of transactions that commits atomically: either
/// every transaction in the batch applies to state, or none of them do.
#[derive(Clone, Debug)]
pub struct Batch {
    header_bytes: Bytes,
    header: BatchHeader,
    header_signature: String,
    transactions: Vec<Transaction>,
}

impl Batch {
    /// Decodes and structurally validates a batch:
    /// - at least one transaction (§8 boundary: zero-txn batches are rejected),
    /// - `transaction_ids` lines up with `transactions` in the same order,
    /// - each transaction's `batcher_public_key` is empty or equal to the
    ///   batch signer's key.
    ///
    /// Signature verification (of the batch and of each transaction) is
    /// left to `verify_signatures`, matching `Transaction::decode`'s split.
    pub fn decode(
        header_bytes: Bytes,
        header_signature: String,
        transactions: Vec<Transaction>,
    ) -> Result<Self, TypesError> {
        let decoded = proto::BatchHeader::decode(header_bytes.as_ref())?;
        let header = BatchHeader::from(decoded);

        if transactions.is_empty() {
            return Err(TypesError::EmptyBatch);
        }
        if header.transaction_ids.len() != transactions.len() {
            return Err(TypesError::InvalidAddress(
                "batch header transaction_ids length mismatch".to_string(),
            ));
        }
        for (expected_id, txn) in header.transaction_ids.iter().zip(transactions.iter()) {
            if expected_id != txn.id() {
                return Err(TypesError::InvalidAddress(format!(
                    "batch header transaction order mismatch: expected {expected_id}, got {}",
                    txn.id()
                )));
            }
            let batcher = &txn.header().batcher_public_key;
            if !batcher.is_empty() && batcher != &header.signer_public_key {
                return Err(TypesError::BadSignature(format!(
                    "transaction {} batcher_public_key does not match batch signer",
                    txn.id()
                )));
            }
        }

        Ok(Self {
            header_bytes,
            header,
            header_signature,
            transactions,
        })
    }

    pub fn build(transactions: Vec<Transaction>, signing_key: &secp256k1::SecretKey) -> Result<Self, TypesError> {
        if transactions.is_empty() {
            return Err(TypesError::EmptyBatch);
        }
        let public_key = secp256k1::PublicKey::from_secret_key(secp256k1::SECP256K1, signing_key);
        let header = BatchHeader {
            signer_public_key: hex::encode(public_key.serialize()),
            transaction_ids: transactions.iter().map(|t| t.id().to_string()).collect(),
        };
        let header_bytes: Bytes = proto::BatchHeader::from(header.clone()).encode_to_vec().into();
        let header_signature = crate::crypto::sign_header(&header_bytes, signing_key);
        Ok(Self {
            header_bytes,
            header,
            header_signature,
            transactions,
        })
    }

    pub fn header(&self) -> &BatchHeader {
        &self.header
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn id(&self) -> &str {
        &self.header_signature
    }

    pub fn verify_signatures(&self) -> Result<(), TypesError> {
        verify_header_signature(&self.header_bytes, &self.header_signature, &self.header.signer_public_key)?;
        for txn in &self.transactions {
            txn.verify_signature()?;
        }
        Ok(())
    }

    pub fn to_proto(&self) -> proto::Batch {
        proto::Batch {
            header: self.header_bytes.to_vec(),
            header_signature: self.header_signature.clone(),
            transactions: self.transactions.iter().map(Transaction::to_proto).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BatchBuilder, TransactionBuilder};

    #[test]
    fn rejects_empty_batch() {
        let key = secp256k1::SecretKey::new(&mut rand::thread_rng());
        assert!(matches!(Batch::build(vec![], &key), Err(TypesError::EmptyBatch)));
    }

    #[test]
    fn build_then_decode_round_trips() {
        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"set MyKey 999".to_vec()).build();
        let batch = BatchBuilder::new().transaction(txn).build();
        let decoded = Batch::decode(
            batch.header_bytes.clone(),
            batch.id().to_string(),
            batch.transactions().to_vec(),
        )
        .unwrap();
        decoded.verify_signatures().unwrap();
    }
}
