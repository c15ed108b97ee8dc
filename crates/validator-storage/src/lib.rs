// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persistence layer: the key-value store (C1), the authenticated
//! Merkle-Radix global-state trie (C2), and content-addressed storage for
//! blocks/batches/transactions/receipts plus the chain-head pointer.

pub mod error;
pub mod kv;
pub mod metrics;
pub mod stores;
pub mod trie;

pub use error::{Result, StorageError};
pub use kv::{KvStore, WriteOp};
pub use metrics::StorageMetrics;
pub use stores::BlockStore;
pub use trie::{NodeHash, StateChangeOp, TrieReader, TrieWriter, EMPTY_TRIE_ROOT};
