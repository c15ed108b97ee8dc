// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! C10: the six-step block validation pipeline of §4.4. Suspend/resume of
//! blocks whose parent or a declared transaction dependency isn't local yet
//! is modeled directly on the teacher's `BlockManager`: a `suspended_blocks`
//! map keyed by the waiting block, and a `missing_ancestors` map from a
//! missing id to the set of blocks waiting on it, generalized here from DAG
//! causal history to a single parent id plus zero or more transaction
//! dependency ids.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use validator_consensus::ConsensusEngineLink;
use validator_execution::ParallelScheduler;
use validator_permissions::PermissionVerifier;
use validator_storage::{BlockStore, KvStore, TrieWriter, EMPTY_TRIE_ROOT};
use validator_types::{Block, Transaction, TransactionReceipt, NULL_BLOCK_ID};

use crate::error::{InvalidBlockReason, Result};

/// Role consulted for a batch's signer against the parent block's on-chain
/// roles (spec §4.4 step 3).
pub const ROLE_BATCH_SIGNER: &str = "transactor.batch_signer";
/// Role consulted for each transaction's signer, same step.
pub const ROLE_TRANSACTION_SIGNER: &str = "transactor.transaction_signer";

/// What a previously-accepted block (committed or still an open fork)
/// produced, so a child block can be validated against it before the chain
/// controller decides whether to commit that fork. Implemented by the
/// chain controller.
pub trait ChainView: Send + Sync {
    fn parent_info(&self, block_id: &str) -> Option<ParentInfo>;
    /// True if `transaction_id` has committed in some ancestor of the
    /// current view (used to resolve declared `dependencies`).
    fn has_committed_transaction(&self, transaction_id: &str) -> bool;
}

#[derive(Clone, Copy)]
pub struct ParentInfo {
    pub state_root: [u8; 32],
    pub block_num: u64,
}

/// Outcome of a single validation attempt, before it is turned into the
/// public `Verdict` and (for `Valid`/`Invalid`) reported to the consensus
/// engine.
enum Outcome {
    Valid(Vec<TransactionReceipt>),
    Invalid(InvalidBlockReason),
    Missing(HashSet<String>),
}

pub enum Verdict {
    /// Every transaction receipt produced while replaying the block, in
    /// slate order, for the chain controller to persist once the engine
    /// decides to commit it.
    Valid(Vec<TransactionReceipt>),
    Invalid(InvalidBlockReason),
    /// The block is missing a dependency and has been suspended
    /// internally; call `resolve` once the dependency id becomes
    /// available.
    Suspended,
}

struct Suspended {
    block: Block,
    missing: HashSet<String>,
}

pub struct BlockValidator {
    kv: KvStore,
    trie_writer: TrieWriter,
    block_store: BlockStore,
    scheduler: Arc<ParallelScheduler>,
    verifier: Arc<PermissionVerifier>,
    engine: Arc<dyn ConsensusEngineLink>,
    suspended_blocks: Mutex<BTreeMap<String, Suspended>>,
    missing_ancestors: Mutex<BTreeMap<String, HashSet<String>>>,
}

impl BlockValidator {
    pub fn new(
        kv: KvStore,
        trie_writer: TrieWriter,
        block_store: BlockStore,
        scheduler: Arc<ParallelScheduler>,
        verifier: Arc<PermissionVerifier>,
        engine: Arc<dyn ConsensusEngineLink>,
    ) -> Self {
        Self {
            kv,
            trie_writer,
            block_store,
            scheduler,
            verifier,
            engine,
            suspended_blocks: Mutex::new(BTreeMap::new()),
            missing_ancestors: Mutex::new(BTreeMap::new()),
        }
    }

    /// Validates `block` against `chain_view`. On `Valid`/`Invalid`, also
    /// reports the verdict to the consensus engine (`BlockValid`/
    /// `BlockInvalid`) as step 6 of §4.4 requires.
    pub async fn validate(&self, block: Block, chain_view: &dyn ChainView, cancel: CancellationToken) -> Result<Verdict> {
        match self.try_validate(&block, chain_view, cancel).await? {
            Outcome::Valid(receipts) => {
                let header_bytes = block.to_proto().header;
                let batches_summary = block.header().batch_ids.join(",").into_bytes();
                if let Err(err) = self.engine.block_new(header_bytes, batches_summary).await {
                    warn!(block = block.id(), "failed to notify consensus engine of new block: {err}");
                }
                if let Err(err) = self.engine.block_valid(block.id()).await {
                    warn!(block = block.id(), "failed to report block valid to consensus engine: {err}");
                }
                Ok(Verdict::Valid(receipts))
            }
            Outcome::Invalid(reason) => {
                if let Err(err) = self.engine.block_invalid(block.id(), &reason.to_string()).await {
                    warn!(block = block.id(), "failed to report block invalid to consensus engine: {err}");
                }
                Ok(Verdict::Invalid(reason))
            }
            Outcome::Missing(missing) => {
                self.suspend(block, missing);
                Ok(Verdict::Suspended)
            }
        }
    }

    async fn try_validate(&self, block: &Block, chain_view: &dyn ChainView, cancel: CancellationToken) -> Result<Outcome> {
        if block.verify_signature().is_err() {
            return Ok(Outcome::Invalid(InvalidBlockReason::BadSignature(format!(
                "block {} header signature does not verify",
                block.id()
            ))));
        }

        let parent_root = if block.header().block_num == 0 && block.header().previous_block_id == NULL_BLOCK_ID {
            EMPTY_TRIE_ROOT
        } else {
            match chain_view.parent_info(&block.header().previous_block_id) {
                None => {
                    let mut missing = HashSet::new();
                    missing.insert(block.header().previous_block_id.clone());
                    return Ok(Outcome::Missing(missing));
                }
                Some(info) if info.block_num + 1 != block.header().block_num => {
                    return Ok(Outcome::Invalid(InvalidBlockReason::BadParent(format!(
                        "block_num {} does not follow parent block_num {}",
                        block.header().block_num,
                        info.block_num
                    ))));
                }
                Some(info) => info.state_root,
            }
        };

        for batch in block.batches() {
            if let Err(err) = batch.verify_signatures() {
                let txn_id = batch.transactions().first().map(|t| t.id().to_string()).unwrap_or_else(|| batch.id().to_string());
                return Ok(Outcome::Invalid(InvalidBlockReason::BatchInvalid { txn_id, reason: err.to_string() }));
            }
        }

        let mut missing_deps = HashSet::new();
        for batch in block.batches() {
            for txn in batch.transactions() {
                for dep in &txn.header().dependencies {
                    if !chain_view.has_committed_transaction(dep) && self.block_store.batch_id_for_transaction(dep)?.is_none() {
                        missing_deps.insert(dep.clone());
                    }
                }
            }
        }
        if !missing_deps.is_empty() {
            return Ok(Outcome::Missing(missing_deps));
        }

        let allowed_families = self.verifier.allowed_transaction_families(parent_root)?;

        for batch in block.batches() {
            if !self.verifier.check(ROLE_BATCH_SIGNER, &batch.header().signer_public_key, parent_root)? {
                return Ok(Outcome::Invalid(InvalidBlockReason::PermissionDenied(format!(
                    "batch signer {} lacks {ROLE_BATCH_SIGNER}",
                    batch.header().signer_public_key
                ))));
            }
            for txn in batch.transactions() {
                if !self.verifier.check(ROLE_TRANSACTION_SIGNER, &txn.header().signer_public_key, parent_root)? {
                    return Ok(Outcome::Invalid(InvalidBlockReason::PermissionDenied(format!(
                        "transaction signer {} lacks {ROLE_TRANSACTION_SIGNER}",
                        txn.header().signer_public_key
                    ))));
                }
                if let Some(allowed) = &allowed_families {
                    let family = &txn.header().family_name;
                    let version = &txn.header().family_version;
                    if !allowed.iter().any(|(f, v)| f == family && v == version) {
                        return Ok(Outcome::Invalid(InvalidBlockReason::UnknownTransactionFamily {
                            family: family.clone(),
                            version: version.clone(),
                        }));
                    }
                }
            }
        }

        // Batches commit atomically (§3): schedule each batch separately so
        // one invalid transaction fails only that batch's verdict, rather
        // than letting the scheduler apply a partial batch's state.
        let mut root = parent_root;
        let mut receipts = Vec::new();
        for batch in block.batches() {
            let slate: Vec<Transaction> = batch.transactions().to_vec();
            let result = self.scheduler.run(&self.trie_writer, root, &self.kv, &slate, cancel.clone()).await?;
            if let Some(invalid) = result.receipts.iter().find(|r| !r.is_valid()) {
                return Ok(Outcome::Invalid(InvalidBlockReason::BatchInvalid {
                    txn_id: invalid.transaction_id.clone(),
                    reason: invalid.invalid_reason.clone().unwrap_or_default(),
                }));
            }
            root = result.state_root;
            receipts.extend(result.receipts);
        }

        let expected_root = hex::decode(&block.header().state_root_hash)?;
        if expected_root.as_slice() != root {
            return Ok(Outcome::Invalid(InvalidBlockReason::BadStateRoot {
                expected: block.header().state_root_hash.clone(),
                actual: hex::encode(root),
            }));
        }

        Ok(Outcome::Valid(receipts))
    }

    /// Records `block` as waiting on `missing` dependency ids, following the
    /// teacher's `BlockManager::try_accept_block` shape.
    fn suspend(&self, block: Block, missing: HashSet<String>) {
        let block_id = block.id().to_string();
        let mut missing_ancestors = self.missing_ancestors.lock();
        for dep in &missing {
            missing_ancestors.entry(dep.clone()).or_default().insert(block_id.clone());
        }
        drop(missing_ancestors);
        self.suspended_blocks.lock().insert(block_id, Suspended { block, missing });
    }

    /// Marks `dependency_id` as now available, returning every block that
    /// becomes fully unsuspended as a result (transitively, if unsuspending
    /// one block satisfies another's dependency on it), in no particular
    /// order. The caller should re-validate each returned block.
    pub fn resolve(&self, dependency_id: &str) -> Vec<Block> {
        let mut ready = Vec::new();
        let mut frontier = vec![dependency_id.to_string()];

        while let Some(dep) = frontier.pop() {
            let waiters = self.missing_ancestors.lock().remove(&dep).unwrap_or_default();
            for block_id in waiters {
                let mut suspended_blocks = self.suspended_blocks.lock();
                let Some(entry) = suspended_blocks.get_mut(&block_id) else { continue };
                entry.missing.remove(&dep);
                if entry.missing.is_empty() {
                    let Suspended { block, .. } = suspended_blocks.remove(&block_id).unwrap();
                    drop(suspended_blocks);
                    frontier.push(block_id);
                    ready.push(block);
                }
            }
        }

        ready
    }

    pub fn suspended_count(&self) -> usize {
        self.suspended_blocks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use validator_execution::{Executor, ProcessorRegistry};
    use validator_permissions::OffChainRoles;
    use validator_storage::KvStore;
    use validator_types::testing::{BatchBuilder, BlockBuilder, TransactionBuilder};

    struct NullEngine;
    #[async_trait::async_trait]
    impl ConsensusEngineLink for NullEngine {
        async fn startup_info(&self, _: String, _: Vec<String>, _: Vec<u8>) -> validator_consensus::Result<()> {
            Ok(())
        }
        async fn block_new(&self, _: Vec<u8>, _: Vec<u8>) -> validator_consensus::Result<()> {
            Ok(())
        }
        async fn block_valid(&self, _: &str) -> validator_consensus::Result<()> {
            Ok(())
        }
        async fn block_invalid(&self, _: &str, _: &str) -> validator_consensus::Result<()> {
            Ok(())
        }
        async fn block_commit(&self, _: &str) -> validator_consensus::Result<()> {
            Ok(())
        }
        async fn peer_connected(&self, _: &str) -> validator_consensus::Result<()> {
            Ok(())
        }
        async fn peer_disconnected(&self, _: &str) -> validator_consensus::Result<()> {
            Ok(())
        }
        async fn peer_message(&self, _: &str, _: Vec<u8>) -> validator_consensus::Result<()> {
            Ok(())
        }
    }

    struct EmptyChainView;
    impl ChainView for EmptyChainView {
        fn parent_info(&self, _: &str) -> Option<ParentInfo> {
            None
        }
        fn has_committed_transaction(&self, _: &str) -> bool {
            false
        }
    }

    struct FixedChainView(HashMap<String, ParentInfo>);
    impl ChainView for FixedChainView {
        fn parent_info(&self, block_id: &str) -> Option<ParentInfo> {
            self.0.get(block_id).copied()
        }
        fn has_committed_transaction(&self, _: &str) -> bool {
            true
        }
    }

    fn validator_fixture() -> BlockValidator {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let trie_writer = TrieWriter::new(&kv);
        let block_store = BlockStore::new(kv.clone());
        let executor = Arc::new(Executor::new(Arc::new(ProcessorRegistry::new())));
        let scheduler = Arc::new(ParallelScheduler::new(executor));
        let verifier = Arc::new(PermissionVerifier::new(
            move |r| validator_storage::TrieReader::new(&kv, r),
            OffChainRoles::default(),
        ));
        BlockValidator::new(kv.clone(), trie_writer, block_store, scheduler, verifier, Arc::new(NullEngine))
    }

    #[tokio::test]
    async fn genesis_block_with_no_transactions_pending_validates_against_empty_trie() {
        let validator = validator_fixture();
        let txn = TransactionBuilder::new("sawtooth_settings", "1.0").payload(b"noop".to_vec()).build();
        let batch = BatchBuilder::new().transaction(txn).build();
        let block = BlockBuilder::new(0, NULL_BLOCK_ID).batch(batch).state_root_hash(hex::encode(EMPTY_TRIE_ROOT)).build();

        let verdict = validator.validate(block, &EmptyChainView, CancellationToken::new()).await.unwrap();
        // No processor is registered for `sawtooth_settings`, so the lone
        // transaction fails execution and the whole batch is invalid.
        assert!(matches!(verdict, Verdict::Invalid(InvalidBlockReason::BatchInvalid { .. })));
    }

    #[tokio::test]
    async fn block_with_unknown_parent_is_suspended_then_resolved() {
        let validator = validator_fixture();
        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"x".to_vec()).build();
        let batch = BatchBuilder::new().transaction(txn).build();
        let parent_id = "f".repeat(70);
        let block = BlockBuilder::new(5, &parent_id).batch(batch).build();

        let verdict = validator.validate(block.clone(), &EmptyChainView, CancellationToken::new()).await.unwrap();
        assert!(matches!(verdict, Verdict::Suspended));
        assert_eq!(validator.suspended_count(), 1);

        let ready = validator.resolve(&parent_id);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id(), block.id());
        assert_eq!(validator.suspended_count(), 0);
    }

    #[tokio::test]
    async fn bad_block_num_against_known_parent_is_bad_parent() {
        let validator = validator_fixture();
        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"x".to_vec()).build();
        let batch = BatchBuilder::new().transaction(txn).build();
        let parent_id = "a".repeat(70);
        let block = BlockBuilder::new(9, &parent_id).batch(batch).build();

        let mut known = HashMap::new();
        known.insert(parent_id.clone(), ParentInfo { state_root: EMPTY_TRIE_ROOT, block_num: 0 });
        let view = FixedChainView(known);

        let verdict = validator.validate(block, &view, CancellationToken::new()).await.unwrap();
        assert!(matches!(verdict, Verdict::Invalid(InvalidBlockReason::BadParent(_))));
    }

    #[tokio::test]
    async fn transaction_outside_family_allowlist_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let trie_writer = TrieWriter::new(&kv);
        let block_store = BlockStore::new(kv.clone());
        let executor = Arc::new(Executor::new(Arc::new(ProcessorRegistry::new())));
        let scheduler = Arc::new(ParallelScheduler::new(executor));

        let address = validator_types::Address::from_family_and_key(
            "sawtooth_settings",
            validator_permissions::settings::VALIDATOR_TRANSACTION_FAMILIES.as_bytes(),
        );
        let ops = vec![validator_storage::StateChangeOp::Set {
            address: address.as_str().to_string(),
            value: b"sawtooth_settings:1.0".to_vec(),
        }];
        let parent_root = trie_writer.apply(EMPTY_TRIE_ROOT, ops).unwrap();

        let verifier = Arc::new(PermissionVerifier::new(move |r| validator_storage::TrieReader::new(&kv, r), OffChainRoles::default()));
        let validator = BlockValidator::new(kv.clone(), trie_writer, block_store, scheduler, verifier, Arc::new(NullEngine));

        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"x".to_vec()).build();
        let batch = BatchBuilder::new().transaction(txn).build();
        let parent_id = "b".repeat(70);
        let block = BlockBuilder::new(1, &parent_id).batch(batch).build();

        let mut known = HashMap::new();
        known.insert(parent_id.clone(), ParentInfo { state_root: parent_root, block_num: 0 });
        let view = FixedChainView(known);

        let verdict = validator.validate(block, &view, CancellationToken::new()).await.unwrap();
        assert!(matches!(verdict, Verdict::Invalid(InvalidBlockReason::UnknownTransactionFamily { .. })));
    }
}
