// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Genesis bootstrap (spec §6): on startup, if no chain head exists and a
//! `genesis.batch` file is present in the data directory, decode it as a
//! `BatchList` and apply it directly through the scheduler — no consensus
//! engine is involved in producing block 0.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use prost::Message;
use tokio_util::sync::CancellationToken;

use validator_execution::{ParallelScheduler, ProcessorRegistry};
use validator_storage::{BlockStore, KvStore, TrieWriter, EMPTY_TRIE_ROOT};
use validator_types::crypto::Signer;
use validator_types::{Batch, Block, BlockHeader, BlockReceipt, Transaction, NULL_BLOCK_ID};

use crate::error::{NodeError, Result};

const PROCESSOR_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn decode_transaction(proto: validator_types::proto::Transaction) -> Result<Transaction> {
    Ok(Transaction::decode(proto.header.into(), proto.header_signature, proto.payload.into())?)
}

fn decode_batch(proto: validator_types::proto::Batch) -> Result<Batch> {
    let transactions = proto.transactions.into_iter().map(decode_transaction).collect::<Result<Vec<_>>>()?;
    let batch = Batch::decode(proto.header.into(), proto.header_signature, transactions)?;
    batch.verify_signatures()?;
    Ok(batch)
}

/// Reads and structurally validates `genesis.batch`'s contents without
/// applying them — used both by `apply` and by the mismatch guard.
fn decode_genesis_file(path: &Path) -> Result<Vec<Batch>> {
    let bytes = std::fs::read(path)?;
    let batch_list =
        validator_types::proto::BatchList::decode(bytes.as_slice()).map_err(|source| NodeError::BadGenesisBatch {
            path: path.display().to_string(),
            source,
        })?;
    batch_list.batches.into_iter().map(decode_batch).collect()
}

/// Applies genesis if needed. Returns `Ok(())` whether or not a genesis
/// batch was actually present — this is a no-op on every boot after the
/// first. Refuses to start if a genesis batch is present but a chain head
/// already exists and doesn't match block 0 (misconfiguration guard; not a
/// dropped spec feature, just the obvious consequence of genesis being a
/// one-time, content-addressed operation).
///
/// Runs against the node's real `scheduler`/`registry` rather than a
/// private, empty one, and waits (polling `registry`) for every
/// transaction family the genesis batches need until each has a processor
/// registered or `wait_timeout` elapses — callers are expected to have the
/// component endpoint already listening before calling this, since that is
/// the only way a real transaction processor can ever register.
pub async fn apply_if_needed(
    genesis_batch_path: Option<&Path>,
    kv: &KvStore,
    trie_writer: &TrieWriter,
    block_store: &BlockStore,
    signer: &Signer,
    scheduler: &ParallelScheduler,
    registry: &ProcessorRegistry,
    wait_timeout: Duration,
) -> Result<()> {
    let Some(path) = genesis_batch_path else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let batches = decode_genesis_file(path)?;

    if let Some(existing_id) = block_store.chain_head()? {
        let existing_block = block_store
            .get_block(&existing_id)?
            .ok_or_else(|| NodeError::GenesisMismatch { path: path.display().to_string() })?;
        let existing_batch_ids: Vec<String> = existing_block.batches().iter().map(|b| b.id().to_string()).collect();
        let genesis_batch_ids: Vec<String> = batches.iter().map(|b| b.id().to_string()).collect();
        if existing_block.header().block_num != 0 || existing_batch_ids != genesis_batch_ids {
            return Err(NodeError::GenesisMismatch { path: path.display().to_string() });
        }
        return Ok(());
    }

    tracing::info!(path = %path.display(), batch_count = batches.len(), "applying genesis batch");

    wait_for_processors(&batches, registry, wait_timeout).await?;

    let mut root = EMPTY_TRIE_ROOT;
    let mut receipts = Vec::new();
    for batch in &batches {
        let slate: Vec<_> = batch.transactions().to_vec();
        let result = scheduler.run(trie_writer, root, kv, &slate, CancellationToken::new()).await?;
        if let Some(invalid) = result.receipts.iter().find(|r| !r.is_valid()) {
            return Err(NodeError::GenesisInvalid(format!(
                "transaction {} invalid: {}",
                invalid.transaction_id,
                invalid.invalid_reason.clone().unwrap_or_default()
            )));
        }
        root = result.state_root;
        receipts.extend(result.receipts);
    }

    let header = BlockHeader {
        block_num: 0,
        previous_block_id: NULL_BLOCK_ID.to_string(),
        signer_public_key: signer.public_key_hex.clone(),
        batch_ids: batches.iter().map(|b| b.id().to_string()).collect(),
        state_root_hash: hex::encode(root),
        consensus: Vec::new().into(),
    };
    let block = Block::build(header, batches, &signer.secret_key);

    block_store.put_block(&block)?;
    block_store.put_receipt(&BlockReceipt { block_id: block.id().to_string(), transaction_receipts: receipts })?;
    block_store.set_chain_head(block.id())?;

    tracing::info!(block_id = block.id(), "genesis block committed");
    Ok(())
}

/// Blocks until every distinct `(family, version)` pair the genesis
/// batches need has at least one processor registered, polling
/// `registry` at a fixed interval. Fails the whole bootstrap once
/// `wait_timeout` elapses rather than running the batch against whatever
/// happens to be registered, since a genesis batch has no consensus
/// engine to retry it through if execution comes up short.
async fn wait_for_processors(batches: &[Batch], registry: &ProcessorRegistry, wait_timeout: Duration) -> Result<()> {
    let mut needed: HashSet<(String, String)> = HashSet::new();
    for batch in batches {
        for txn in batch.transactions() {
            needed.insert((txn.header().family_name.clone(), txn.header().family_version.clone()));
        }
    }

    let deadline = Instant::now() + wait_timeout;
    loop {
        needed.retain(|(family, version)| !registry.is_registered(family, version));
        if needed.is_empty() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            let (family, version) = needed.iter().next().cloned().unwrap();
            return Err(NodeError::GenesisProcessorTimeout { family, version, waited_secs: wait_timeout.as_secs() });
        }
        tracing::info!(missing = needed.len(), "waiting for genesis transaction processors to register");
        tokio::time::sleep(PROCESSOR_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use prost::Message as _;

    use validator_execution::{Executor, ProcessorConnection, ProcessorRegistry, Result as ExecutionResult};
    use validator_storage::KvStore;
    use validator_types::testing::{BatchBuilder, TransactionBuilder};

    use super::*;

    struct AlwaysOk;

    #[async_trait]
    impl ProcessorConnection for AlwaysOk {
        async fn send_process_request(&self, _context_id: &str, _transaction: &Transaction) -> ExecutionResult<()> {
            Ok(())
        }
    }

    fn write_genesis_file(dir: &Path, batches: &[Batch]) -> std::path::PathBuf {
        let batch_list = validator_types::proto::BatchList { batches: batches.iter().map(Batch::to_proto).collect() };
        let path = dir.join("genesis.batch");
        std::fs::write(&path, batch_list.encode_to_vec()).unwrap();
        path
    }

    fn settings_batch() -> Batch {
        let txn = TransactionBuilder::new("sawtooth_settings", "1.0").payload(b"noop".to_vec()).build();
        BatchBuilder::new().transaction(txn).build()
    }

    #[tokio::test]
    async fn no_genesis_path_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let trie_writer = TrieWriter::new(&kv);
        let block_store = BlockStore::new(kv.clone());
        let registry = Arc::new(ProcessorRegistry::new());
        let scheduler = ParallelScheduler::new(Arc::new(Executor::new(registry.clone())));
        let signer = Signer::generate(&mut rand::thread_rng());

        apply_if_needed(None, &kv, &trie_writer, &block_store, &signer, &scheduler, &registry, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(block_store.chain_head().unwrap().is_none());
    }

    #[tokio::test]
    async fn genesis_applies_once_its_processor_is_already_registered() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let trie_writer = TrieWriter::new(&kv);
        let block_store = BlockStore::new(kv.clone());
        let registry = Arc::new(ProcessorRegistry::new());
        registry.register("sawtooth_settings", "1.0", Arc::new(AlwaysOk));
        let scheduler = ParallelScheduler::new(Arc::new(Executor::new(registry.clone())));
        let signer = Signer::generate(&mut rand::thread_rng());

        let path = write_genesis_file(dir.path(), &[settings_batch()]);
        apply_if_needed(Some(&path), &kv, &trie_writer, &block_store, &signer, &scheduler, &registry, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(block_store.chain_head().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn genesis_waits_for_a_processor_that_registers_late() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let trie_writer = TrieWriter::new(&kv);
        let block_store = BlockStore::new(kv.clone());
        let registry = Arc::new(ProcessorRegistry::new());
        let scheduler = ParallelScheduler::new(Arc::new(Executor::new(registry.clone())));
        let signer = Signer::generate(&mut rand::thread_rng());
        let path = write_genesis_file(dir.path(), &[settings_batch()]);

        let late_registry = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            late_registry.register("sawtooth_settings", "1.0", Arc::new(AlwaysOk));
        });

        apply_if_needed(Some(&path), &kv, &trie_writer, &block_store, &signer, &scheduler, &registry, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(block_store.chain_head().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn genesis_times_out_without_a_registered_processor() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let trie_writer = TrieWriter::new(&kv);
        let block_store = BlockStore::new(kv.clone());
        let registry = Arc::new(ProcessorRegistry::new());
        let scheduler = ParallelScheduler::new(Arc::new(Executor::new(registry.clone())));
        let signer = Signer::generate(&mut rand::thread_rng());
        let path = write_genesis_file(dir.path(), &[settings_batch()]);

        let err = apply_if_needed(Some(&path), &kv, &trie_writer, &block_store, &signer, &scheduler, &registry, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::GenesisProcessorTimeout { .. }));
        assert!(block_store.chain_head().unwrap().is_none());
    }

    #[tokio::test]
    async fn mismatched_existing_head_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let trie_writer = TrieWriter::new(&kv);
        let block_store = BlockStore::new(kv.clone());
        let registry = Arc::new(ProcessorRegistry::new());
        registry.register("sawtooth_settings", "1.0", Arc::new(AlwaysOk));
        let scheduler = ParallelScheduler::new(Arc::new(Executor::new(registry.clone())));
        let signer = Signer::generate(&mut rand::thread_rng());

        let first_path = write_genesis_file(dir.path(), &[settings_batch()]);
        apply_if_needed(Some(&first_path), &kv, &trie_writer, &block_store, &signer, &scheduler, &registry, Duration::from_millis(50))
            .await
            .unwrap();

        let second_path = write_genesis_file(dir.path(), &[settings_batch()]);
        let err = apply_if_needed(Some(&second_path), &kv, &trie_writer, &block_store, &signer, &scheduler, &registry, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::GenesisMismatch { .. }));
    }
}
