// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Core data model for the validator: transactions, batches, blocks,
//! addresses, and their wire encoding and signature rules.

pub mod address;
pub mod batch;
pub mod block;
pub mod crypto;
pub mod error;
pub mod receipt;
pub mod testing;
pub mod transaction;

/// Generated protobuf message types (`prost`), named `proto` to keep the
/// hand-written domain wrappers in `transaction`/`batch`/`block` the
/// public-facing API.
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/validator.types.rs"));
}

pub use address::Address;
pub use batch::{Batch, BatchHeader};
pub use block::{Block, BlockHeader, NULL_BLOCK_ID};
pub use error::TypesError;
pub use receipt::{BlockReceipt, Event, StateChange, TransactionReceipt, TransactionStatus};
pub use transaction::{Transaction, TransactionHeader};
