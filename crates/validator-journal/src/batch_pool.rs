// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pending batch pool (spec §5 "Shared resources"): a bounded queue of
//! batches awaiting inclusion in a block, admission gated on signature
//! verification, permission verification, and dedup by batch id.

use std::collections::{HashSet, VecDeque};

use dashmap::DashSet;
use parking_lot::Mutex;
use std::sync::Arc;

use validator_permissions::PermissionVerifier;
use validator_types::Batch;

use crate::block_validator::ROLE_BATCH_SIGNER;
use crate::error::{InvalidBlockReason, JournalError, Result};
use crate::metrics::ExecutionMetrics;

/// Evaluated against whichever state root the caller currently considers
/// "current" for admission purposes (the chain head's `state_root_hash`).
pub type StateRoot = validator_permissions::StateRoot;

pub struct BatchPool {
    verifier: Arc<PermissionVerifier>,
    capacity: usize,
    queue: Mutex<VecDeque<Batch>>,
    known_ids: DashSet<String>,
    metrics: Option<Arc<ExecutionMetrics>>,
}

impl BatchPool {
    pub fn new(verifier: Arc<PermissionVerifier>, capacity: usize) -> Self {
        Self { verifier, capacity, queue: Mutex::new(VecDeque::new()), known_ids: DashSet::new(), metrics: None }
    }

    /// Attaches `ExecutionMetrics` so `submit` keeps `batches_admitted`/
    /// `batches_rejected` current.
    pub fn with_metrics(mut self, metrics: Arc<ExecutionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Admits `batch` at `state_root` if it is signed correctly, its signer
    /// holds `transactor.batch_signer`, every transaction's family is
    /// allowlisted (when `sawtooth.validator.transaction_families` is
    /// configured), it isn't already known, and the pool isn't full.
    pub fn submit(&self, batch: Batch, state_root: StateRoot) -> Result<()> {
        let result = self.try_submit(batch, state_root);
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(true) => metrics.batches_admitted.inc(),
                Ok(false) => {}
                Err(_) => metrics.batches_rejected.inc(),
            }
        }
        result.map(|_| ())
    }

    /// `Ok(true)` if `batch` was newly enqueued, `Ok(false)` if it was
    /// already known (a no-op, not a rejection).
    fn try_submit(&self, batch: Batch, state_root: StateRoot) -> Result<bool> {
        batch.verify_signatures()?;

        if self.known_ids.contains(batch.id()) {
            return Ok(false);
        }
        if !self.verifier.check(ROLE_BATCH_SIGNER, &batch.header().signer_public_key, state_root)? {
            return Err(JournalError::InvalidBlock(InvalidBlockReason::PermissionDenied(format!(
                "batch signer {} lacks {ROLE_BATCH_SIGNER}",
                batch.header().signer_public_key
            ))));
        }
        if let Some(allowed) = self.verifier.allowed_transaction_families(state_root)? {
            for txn in batch.transactions() {
                let family = &txn.header().family_name;
                let version = &txn.header().family_version;
                if !allowed.iter().any(|(f, v)| f == family && v == version) {
                    return Err(JournalError::InvalidBlock(InvalidBlockReason::UnknownTransactionFamily {
                        family: family.clone(),
                        version: version.clone(),
                    }));
                }
            }
        }

        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return Err(JournalError::NoCandidate("batch pool is full".to_string()));
        }
        self.known_ids.insert(batch.id().to_string());
        queue.push_back(batch);
        Ok(true)
    }

    /// Removes up to `max` batches in arrival order, skipping ids in
    /// `exclude` (batches already committed in the candidate being built or
    /// dropped earlier this round) without losing their place for batches
    /// behind them.
    pub fn drain_up_to(&self, max: usize, exclude: &HashSet<String>) -> Vec<Batch> {
        let mut queue = self.queue.lock();
        let mut taken = Vec::new();
        let mut remaining = VecDeque::with_capacity(queue.len());
        while let Some(batch) = queue.pop_front() {
            if taken.len() < max && !exclude.contains(batch.id()) {
                taken.push(batch);
            } else {
                remaining.push_back(batch);
            }
        }
        *queue = remaining;
        taken
    }

    /// Returns batches to the front of the queue in their original order,
    /// e.g. when a candidate block is cancelled before it is finalized.
    pub fn requeue(&self, batches: Vec<Batch>) {
        let mut queue = self.queue.lock();
        for batch in batches.into_iter().rev() {
            queue.push_front(batch);
        }
    }

    /// Drops a batch's id from the dedup set once it has committed, so a
    /// resubmission of the same id (which should never happen honestly, but
    /// can after a fork switch re-admits dropped batches) isn't silently
    /// ignored by a stale dedup entry.
    pub fn forget(&self, batch_id: &str) {
        self.known_ids.remove(batch_id);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator_permissions::OffChainRoles;
    use validator_storage::{KvStore, StateChangeOp, TrieReader, TrieWriter, EMPTY_TRIE_ROOT};
    use validator_types::testing::{BatchBuilder, TransactionBuilder};
    use validator_types::Address;

    fn pool_fixture(capacity: usize) -> BatchPool {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let verifier = Arc::new(PermissionVerifier::new(move |r| TrieReader::new(&kv, r), OffChainRoles::default()));
        BatchPool::new(verifier, capacity)
    }

    fn pool_with_family_allowlist(capacity: usize, allowlist: &str) -> (BatchPool, StateRoot) {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let writer = TrieWriter::new(&kv);
        let address = Address::from_family_and_key("sawtooth_settings", validator_permissions::settings::VALIDATOR_TRANSACTION_FAMILIES.as_bytes());
        let ops = vec![StateChangeOp::Set { address: address.as_str().to_string(), value: allowlist.as_bytes().to_vec() }];
        let root = writer.apply(EMPTY_TRIE_ROOT, ops).unwrap();
        let verifier = Arc::new(PermissionVerifier::new(move |r| TrieReader::new(&kv, r), OffChainRoles::default()));
        (BatchPool::new(verifier, capacity), root)
    }

    fn sample_batch() -> Batch {
        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"x".to_vec()).build();
        BatchBuilder::new().transaction(txn).build()
    }

    #[test]
    fn submit_then_drain_preserves_arrival_order() {
        let pool = pool_fixture(10);
        let a = sample_batch();
        let b = sample_batch();
        pool.submit(a.clone(), EMPTY_TRIE_ROOT).unwrap();
        pool.submit(b.clone(), EMPTY_TRIE_ROOT).unwrap();

        let drained = pool.drain_up_to(10, &HashSet::new());
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id(), a.id());
        assert_eq!(drained[1].id(), b.id());
        assert!(pool.is_empty());
    }

    #[test]
    fn duplicate_batch_id_is_admitted_once() {
        let pool = pool_fixture(10);
        let batch = sample_batch();
        pool.submit(batch.clone(), EMPTY_TRIE_ROOT).unwrap();
        pool.submit(batch, EMPTY_TRIE_ROOT).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn full_pool_rejects_admission() {
        let pool = pool_fixture(1);
        pool.submit(sample_batch(), EMPTY_TRIE_ROOT).unwrap();
        let err = pool.submit(sample_batch(), EMPTY_TRIE_ROOT).unwrap_err();
        assert!(matches!(err, JournalError::NoCandidate(_)));
    }

    #[test]
    fn drain_skips_excluded_ids_without_reordering_the_rest() {
        let pool = pool_fixture(10);
        let a = sample_batch();
        let b = sample_batch();
        pool.submit(a.clone(), EMPTY_TRIE_ROOT).unwrap();
        pool.submit(b.clone(), EMPTY_TRIE_ROOT).unwrap();

        let mut exclude = HashSet::new();
        exclude.insert(a.id().to_string());
        let drained = pool.drain_up_to(10, &exclude);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id(), b.id());
        // `a` stays in the pool, behind nothing else now.
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn allowlisted_family_is_admitted() {
        let (pool, root) = pool_with_family_allowlist(10, "intkey:1.0");
        pool.submit(sample_batch(), root).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn batch_outside_family_allowlist_is_rejected() {
        let (pool, root) = pool_with_family_allowlist(10, "sawtooth_settings:1.0");
        let err = pool.submit(sample_batch(), root).unwrap_err();
        assert!(matches!(err, JournalError::InvalidBlock(InvalidBlockReason::UnknownTransactionFamily { .. })));
        assert!(pool.is_empty());
    }

    #[test]
    fn admission_outcomes_are_counted() {
        let pool = pool_fixture(1).with_metrics(Arc::new(ExecutionMetrics::new(&prometheus::Registry::new())));
        pool.submit(sample_batch(), EMPTY_TRIE_ROOT).unwrap();
        assert!(pool.submit(sample_batch(), EMPTY_TRIE_ROOT).is_err());
        let metrics = pool.metrics.as_ref().unwrap();
        assert_eq!(metrics.batches_admitted.get(), 1);
        assert_eq!(metrics.batches_rejected.get(), 1);
    }
}
