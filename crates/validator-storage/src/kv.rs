// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::sync::Arc;

use rocksdb::{ColumnFamilyDescriptor, Options, DB};

use crate::error::{Result, StorageError};

/// Column families the validator persists data under. One logical table
/// per content type, all backed by a single physical RocksDB instance —
/// the same shape as a schema-per-column-family key-value wrapper.
pub const CF_TRIE_NODES: &str = "trie_nodes";
pub const CF_BLOCKS: &str = "blocks";
pub const CF_BATCHES: &str = "batches";
pub const CF_TRANSACTIONS: &str = "transactions";
pub const CF_RECEIPTS: &str = "receipts";
pub const CF_BATCH_TO_BLOCK: &str = "batch_to_block";
pub const CF_TXN_TO_BATCH: &str = "txn_to_batch";
pub const CF_BLOCK_NUM_TO_ID: &str = "block_num_to_id";
pub const CF_CHAIN_META: &str = "chain_meta";

pub const ALL_COLUMN_FAMILIES: &[&str] = &[
    CF_TRIE_NODES,
    CF_BLOCKS,
    CF_BATCHES,
    CF_TRANSACTIONS,
    CF_RECEIPTS,
    CF_BATCH_TO_BLOCK,
    CF_TXN_TO_BATCH,
    CF_BLOCK_NUM_TO_ID,
    CF_CHAIN_META,
];

/// Ordered byte-key to byte-value store over RocksDB, with atomic
/// multi-key writes via `WriteBatch` (C1).
#[derive(Clone)]
pub struct KvStore {
    db: Arc<DB>,
}

/// A single write within an atomic batch.
pub enum WriteOp<'a> {
    Put { cf: &'a str, key: Vec<u8>, value: Vec<u8> },
    Delete { cf: &'a str, key: Vec<u8> },
}

impl KvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn cf_handle(&self, cf: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf)
            .ok_or_else(|| StorageError::Corruption(format!("missing column family {cf}")))
    }

    pub fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let handle = self.cf_handle(cf)?;
        Ok(self.db.get_cf(handle, key)?)
    }

    pub fn multi_get(&self, cf: &str, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let handle = self.cf_handle(cf)?;
        self.db
            .multi_get_cf(keys.iter().map(|k| (handle, k.as_slice())))
            .into_iter()
            .map(|r| r.map_err(StorageError::from))
            .collect()
    }

    pub fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let handle = self.cf_handle(cf)?;
        self.db.put_cf(handle, key, value)?;
        Ok(())
    }

    /// Applies a list of writes atomically: either all of them land, or
    /// none do.
    pub fn write_batch(&self, ops: Vec<WriteOp<'_>>) -> Result<()> {
        let mut batch = rocksdb::WriteBatch::default();
        for op in ops {
            match op {
                WriteOp::Put { cf, key, value } => {
                    batch.put_cf(self.cf_handle(cf)?, key, value);
                }
                WriteOp::Delete { cf, key } => {
                    batch.delete_cf(self.cf_handle(cf)?, key);
                }
            }
        }
        self.db.write(batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        kv.put(CF_CHAIN_META, b"key", b"value").unwrap();
        assert_eq!(kv.get(CF_CHAIN_META, b"key").unwrap(), Some(b"value".to_vec()));
    }

    #[test]
    fn missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        assert_eq!(kv.get(CF_CHAIN_META, b"nope").unwrap(), None);
    }

    #[test]
    fn write_batch_is_atomic_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        kv.write_batch(vec![
            WriteOp::Put { cf: CF_CHAIN_META, key: b"a".to_vec(), value: b"1".to_vec() },
            WriteOp::Put { cf: CF_CHAIN_META, key: b"b".to_vec(), value: b"2".to_vec() },
        ])
        .unwrap();
        assert_eq!(kv.get(CF_CHAIN_META, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get(CF_CHAIN_META, b"b").unwrap(), Some(b"2".to_vec()));
    }
}
