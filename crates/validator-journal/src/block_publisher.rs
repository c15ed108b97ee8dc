// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! C11: assembles pending batches into a candidate block on `BuildBlock`,
//! drains the batch pool under the per-block cap and permission checks, and
//! signs the finalized block on `FinalizeBlock`. At most one candidate is
//! open per parent at a time, matching the one-candidate-per-branch rule of
//! §5's block validator worker pool note.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use validator_execution::ParallelScheduler;
use validator_permissions::{PermissionVerifier, SettingsView};
use validator_storage::{BlockStore, KvStore, TrieReader, TrieWriter};
use validator_types::crypto::Signer;
use validator_types::{Batch, Block, BlockHeader};

use crate::batch_pool::BatchPool;
use crate::block_validator::{ROLE_BATCH_SIGNER, ROLE_TRANSACTION_SIGNER};
use crate::error::{InvalidBlockReason, JournalError, Result};

/// Synthesizes a batch to prepend to every candidate built on top of
/// `state_root` (block-info, consensus registration, and similar
/// validator-local batches the chain itself never receives over gossip).
/// Evaluated in the order `BlockPublisher` was configured with.
pub trait BlockInjector: Send + Sync {
    fn name(&self) -> &str;
    fn inject(&self, state_root: [u8; 32], block_num: u64) -> Result<Option<Batch>>;
}

struct Candidate {
    previous_block_id: String,
    block_num: u64,
    parent_root: [u8; 32],
    batches: Vec<Batch>,
    included_ids: HashSet<String>,
    injected_ids: HashSet<String>,
}

pub struct BlockPublisher {
    kv: KvStore,
    trie_writer: TrieWriter,
    block_store: BlockStore,
    scheduler: Arc<ParallelScheduler>,
    verifier: Arc<PermissionVerifier>,
    pool: Arc<BatchPool>,
    signer: Signer,
    injectors: Vec<Arc<dyn BlockInjector>>,
    candidate: Mutex<Option<Candidate>>,
}

impl BlockPublisher {
    pub fn new(
        kv: KvStore,
        trie_writer: TrieWriter,
        block_store: BlockStore,
        scheduler: Arc<ParallelScheduler>,
        verifier: Arc<PermissionVerifier>,
        pool: Arc<BatchPool>,
        signer: Signer,
        injectors: Vec<Arc<dyn BlockInjector>>,
    ) -> Self {
        Self { kv, trie_writer, block_store, scheduler, verifier, pool, signer, injectors, candidate: Mutex::new(None) }
    }

    fn settings_view(&self, root: [u8; 32]) -> SettingsView {
        SettingsView::new(TrieReader::new(&self.kv, root))
    }

    /// `InitializeBlock{previous_block_id}`: opens a candidate on top of the
    /// named parent, runs the configured block injectors in order, then
    /// drains the batch pool under the per-block cap, dependency ordering,
    /// and permission checks. Replaces any existing open candidate.
    pub async fn build_block(&self, previous_block_id: String) -> Result<()> {
        let parent = self.block_store.get_block(&previous_block_id)?.ok_or_else(|| {
            JournalError::InvalidBlock(InvalidBlockReason::BadParent(format!("unknown parent {previous_block_id}")))
        })?;
        let parent_root_bytes = hex::decode(&parent.header().state_root_hash)?;
        let mut parent_root = [0u8; 32];
        parent_root.copy_from_slice(&parent_root_bytes);
        let block_num = parent.header().block_num + 1;

        let mut batches = Vec::new();
        let mut included_ids = HashSet::new();
        let mut injected_ids = HashSet::new();
        for injector in &self.injectors {
            if let Some(batch) = injector.inject(parent_root, block_num)? {
                included_ids.insert(batch.id().to_string());
                injected_ids.insert(batch.id().to_string());
                batches.push(batch);
            } else {
                warn!(injector = injector.name(), "block injector produced nothing");
            }
        }

        let settings = self.settings_view(parent_root);
        let cap = settings.max_batches_per_block()?.map(|n| n as usize).unwrap_or(usize::MAX);
        let remaining = cap.saturating_sub(batches.len());
        if remaining > 0 {
            for batch in self.pool.drain_up_to(remaining, &included_ids) {
                match self.admit(&batch, parent_root).await {
                    Ok(true) => {
                        included_ids.insert(batch.id().to_string());
                        batches.push(batch);
                    }
                    Ok(false) => {
                        info!(batch_id = batch.id(), "dropping batch denied for this candidate");
                        self.pool.forget(batch.id());
                    }
                    Err(err) => {
                        warn!(batch_id = batch.id(), error = %err, "dropping unschedulable batch");
                        self.pool.forget(batch.id());
                    }
                }
            }
        }

        *self.candidate.lock() = Some(Candidate { previous_block_id, block_num, parent_root, batches, included_ids, injected_ids });
        Ok(())
    }

    async fn admit(&self, batch: &Batch, parent_root: [u8; 32]) -> Result<bool> {
        if !self.verifier.check(ROLE_BATCH_SIGNER, &batch.header().signer_public_key, parent_root)? {
            return Ok(false);
        }
        for txn in batch.transactions() {
            if !self.verifier.check(ROLE_TRANSACTION_SIGNER, &txn.header().signer_public_key, parent_root)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `SummarizeBlock`: the open candidate's projected state root and batch
    /// count, without finalizing it. Schedules the candidate's batches
    /// against the parent root to compute the root a `FinalizeBlock` would
    /// produce right now.
    pub async fn summarize_block(&self) -> Result<(Vec<u8>, u64)> {
        let candidate = self.candidate.lock().as_ref().map(|c| (c.parent_root, c.batches.clone())).ok_or_else(|| {
            JournalError::NoCandidate("no open candidate to summarize".to_string())
        })?;
        let (parent_root, batches) = candidate;
        let batch_count = batches.len() as u64;
        let root = self.schedule_batches(parent_root, &batches, CancellationToken::new()).await?;
        Ok((root.to_vec(), batch_count))
    }

    /// `FinalizeBlock{consensus_data}`: freezes the candidate, recomputes the
    /// state root over its final batch list, fills in the header, and signs
    /// it with the validator's key. Drops the candidate whether this
    /// succeeds or fails; a failed finalize leaves no partial candidate
    /// behind for a later `BuildBlock` to collide with.
    pub async fn finalize_block(&self, consensus_data: Vec<u8>, cancel: CancellationToken) -> Result<Block> {
        let candidate = self.candidate.lock().take().ok_or_else(|| JournalError::NoCandidate("no open candidate to finalize".to_string()))?;

        if candidate.batches.is_empty() {
            return Err(JournalError::NoCandidate("refusing to finalize an empty candidate".to_string()));
        }

        let state_root = self.schedule_batches(candidate.parent_root, &candidate.batches, cancel).await?;

        let header = BlockHeader {
            block_num: candidate.block_num,
            previous_block_id: candidate.previous_block_id,
            signer_public_key: self.signer.public_key_hex.clone(),
            batch_ids: candidate.batches.iter().map(|b| b.id().to_string()).collect(),
            state_root_hash: hex::encode(state_root),
            consensus: consensus_data.into(),
        };
        Ok(Block::build(header, candidate.batches, &self.signer.secret_key))
    }

    /// `CancelBlock`: drops the open candidate, returning its batches to the
    /// pool so they aren't lost, and reports whether one was actually open.
    pub fn cancel_block(&self) -> bool {
        match self.candidate.lock().take() {
            Some(candidate) => {
                let injected_ids = candidate.injected_ids;
                self.pool.requeue(candidate.batches.into_iter().filter(|b| !injected_ids.contains(b.id())).collect());
                true
            }
            None => false,
        }
    }

    async fn schedule_batches(&self, parent_root: [u8; 32], batches: &[Batch], cancel: CancellationToken) -> Result<[u8; 32]> {
        let mut root = parent_root;
        for batch in batches {
            let slate: Vec<_> = batch.transactions().to_vec();
            let result = self.scheduler.run(&self.trie_writer, root, &self.kv, &slate, cancel.clone()).await?;
            if let Some(invalid) = result.receipts.iter().find(|r| !r.is_valid()) {
                return Err(JournalError::InvalidBlock(InvalidBlockReason::BatchInvalid {
                    txn_id: invalid.transaction_id.clone(),
                    reason: invalid.invalid_reason.clone().unwrap_or_default(),
                }));
            }
            root = result.state_root;
        }
        Ok(root)
    }

    pub fn has_open_candidate(&self) -> bool {
        self.candidate.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator_permissions::OffChainRoles;
    use validator_storage::EMPTY_TRIE_ROOT;
    use validator_types::testing::{BatchBuilder, BlockBuilder, TransactionBuilder};
    use validator_execution::{Executor, ProcessorRegistry};

    fn publisher_fixture() -> (BlockPublisher, Arc<BatchPool>) {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let trie_writer = TrieWriter::new(&kv);
        let block_store = BlockStore::new(kv.clone());
        let registry = Arc::new(ProcessorRegistry::new());
        let executor = Arc::new(Executor::new(registry));
        let scheduler = Arc::new(ParallelScheduler::new(executor));
        let verifier = {
            let kv = kv.clone();
            Arc::new(PermissionVerifier::new(move |r| TrieReader::new(&kv, r), OffChainRoles::default()))
        };
        let pool = Arc::new(BatchPool::new(verifier.clone(), 100));
        let mut rng = rand::thread_rng();
        let signer = Signer::generate(&mut rng);

        let publisher = BlockPublisher::new(kv, trie_writer, block_store, scheduler, verifier, pool.clone(), signer, Vec::new());
        (publisher, pool)
    }

    fn genesis_parent(block_store: &BlockStore) {
        let txn = TransactionBuilder::new("sawtooth_settings", "1.0").payload(b"noop".to_vec()).build();
        let batch = BatchBuilder::new().transaction(txn).build();
        let block = BlockBuilder::new(0, validator_types::NULL_BLOCK_ID)
            .batch(batch)
            .state_root_hash(hex::encode(EMPTY_TRIE_ROOT))
            .build();
        block_store.put_block(&block).unwrap();
        block_store.set_chain_head(block.id()).unwrap();
    }

    #[tokio::test]
    async fn build_with_no_injectors_and_empty_pool_yields_empty_candidate() {
        let (publisher, _pool) = publisher_fixture();
        genesis_parent(&publisher.block_store);
        let head = publisher.block_store.chain_head().unwrap().unwrap();
        publisher.build_block(head).await.unwrap();
        assert!(publisher.has_open_candidate());

        let err = publisher.finalize_block(Vec::new(), CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, JournalError::NoCandidate(_)));
        assert!(!publisher.has_open_candidate());
    }

    #[tokio::test]
    async fn cancel_requeues_pool_batches() {
        let (publisher, pool) = publisher_fixture();
        genesis_parent(&publisher.block_store);
        let head = publisher.block_store.chain_head().unwrap().unwrap();

        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"x".to_vec()).build();
        let batch = BatchBuilder::new().transaction(txn).build();
        pool.submit(batch.clone(), EMPTY_TRIE_ROOT).unwrap();

        publisher.build_block(head).await.unwrap();
        assert!(publisher.cancel_block());
        assert!(!publisher.has_open_candidate());
        assert_eq!(pool.len(), 1);
    }

    struct FixedInjector(Batch);

    impl BlockInjector for FixedInjector {
        fn name(&self) -> &str {
            "fixed"
        }

        fn inject(&self, _state_root: [u8; 32], _block_num: u64) -> Result<Option<Batch>> {
            Ok(Some(self.0.clone()))
        }
    }

    #[tokio::test]
    async fn cancel_does_not_requeue_injected_batches() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let trie_writer = TrieWriter::new(&kv);
        let block_store = BlockStore::new(kv.clone());
        let registry = Arc::new(ProcessorRegistry::new());
        let executor = Arc::new(Executor::new(registry));
        let scheduler = Arc::new(ParallelScheduler::new(executor));
        let verifier = {
            let kv = kv.clone();
            Arc::new(PermissionVerifier::new(move |r| TrieReader::new(&kv, r), OffChainRoles::default()))
        };
        let pool = Arc::new(BatchPool::new(verifier.clone(), 100));
        let signer = Signer::generate(&mut rand::thread_rng());

        let injected_txn = TransactionBuilder::new("sawtooth_settings", "1.0").payload(b"block-info".to_vec()).build();
        let injected_batch = BatchBuilder::new().transaction(injected_txn).build();
        let injector: Arc<dyn BlockInjector> = Arc::new(FixedInjector(injected_batch));

        let publisher = BlockPublisher::new(kv, trie_writer, block_store.clone(), scheduler, verifier, pool.clone(), signer, vec![injector]);
        genesis_parent(&block_store);
        let head = block_store.chain_head().unwrap().unwrap();

        publisher.build_block(head).await.unwrap();
        assert!(publisher.cancel_block());
        assert_eq!(pool.len(), 0);
    }
}
