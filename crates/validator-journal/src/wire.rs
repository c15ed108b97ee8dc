// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Decodes the opaque bytes `GossipSink`/`GossipStore` pass around into the
//! structurally-validated `Block`/`Batch` types the rest of this crate
//! works with.

use prost::Message;

use validator_types::{Batch, Block, Transaction};

use crate::error::Result;

fn decode_transaction(proto: validator_types::proto::Transaction) -> Result<Transaction> {
    Ok(Transaction::decode(proto.header.into(), proto.header_signature, proto.payload.into())?)
}

pub fn decode_batch(bytes: &[u8]) -> Result<Batch> {
    let proto = validator_types::proto::Batch::decode(bytes)?;
    let transactions = proto.transactions.into_iter().map(decode_transaction).collect::<Result<Vec<_>>>()?;
    Ok(Batch::decode(proto.header.into(), proto.header_signature, transactions)?)
}

pub fn decode_block(bytes: &[u8]) -> Result<Block> {
    let proto = validator_types::proto::Block::decode(bytes)?;
    let batches = proto
        .batches
        .into_iter()
        .map(|b| {
            let transactions = b.transactions.into_iter().map(decode_transaction).collect::<Result<Vec<_>>>()?;
            Ok(Batch::decode(b.header.into(), b.header_signature, transactions)?)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Block::decode(proto.header.into(), proto.header_signature, batches)?)
}

pub fn encode_block(block: &Block) -> Vec<u8> {
    block.to_proto().encode_to_vec()
}

pub fn encode_batch(batch: &Batch) -> Vec<u8> {
    batch.to_proto().encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator_types::testing::{BatchBuilder, BlockBuilder, TransactionBuilder};

    #[test]
    fn block_round_trips_through_wire_bytes() {
        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"x".to_vec()).build();
        let batch = BatchBuilder::new().transaction(txn).build();
        let block = BlockBuilder::new(0, validator_types::NULL_BLOCK_ID).batch(batch).build();

        let bytes = encode_block(&block);
        let decoded = decode_block(&bytes).unwrap();
        assert_eq!(decoded.id(), block.id());
    }
}
