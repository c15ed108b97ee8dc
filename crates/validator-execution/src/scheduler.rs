// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! C8: turns a slate of transactions plus a parent state root into a new
//! state root, per-transaction verdicts, and the events/receipt data they
//! produced. `SchedulerContext` is the namespace-checked state handle each
//! transaction sees; `SerialScheduler` and `ParallelScheduler` differ only
//! in how they schedule, not in what a correct result looks like.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use validator_storage::{StateChangeOp, TrieReader, TrieWriter};
use validator_types::{Event, StateChange, Transaction, TransactionReceipt};

use crate::error::{ExecutionError, Result};
use crate::executor::Executor;

/// The view of state a single transaction's processor is allowed to touch,
/// namespace-checked against the transaction header's declared
/// `inputs`/`outputs` (spec §4.1 authorization rule).
#[async_trait]
pub trait SchedulerContext: Send + Sync {
    async fn get_state(&self, address: &str) -> Result<Option<Vec<u8>>>;
    async fn set_state(&self, address: &str, value: Vec<u8>) -> Result<()>;
    async fn delete_state(&self, address: &str) -> Result<()>;
    async fn add_event(&self, event: Event) -> Result<()>;
    async fn add_receipt_data(&self, data: Vec<u8>) -> Result<()>;
}

struct Inner {
    reader: TrieReader,
    inputs: Vec<String>,
    outputs: Vec<String>,
    writes: HashMap<String, Option<Vec<u8>>>,
    events: Vec<Event>,
    receipt_data: Vec<Vec<u8>>,
}

/// `SchedulerContext` backed by a trie reader fixed at the parent state
/// root, collecting writes in memory until the scheduler commits them.
/// Holds no borrow on its caller, so it can be handed to the executor as
/// `Arc<dyn SchedulerContext>` and published under a transaction's
/// `context_id` for a connected processor to call back into.
pub struct TxnContext {
    inner: Mutex<Inner>,
}

impl TxnContext {
    pub fn new(reader: TrieReader, inputs: Vec<String>, outputs: Vec<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                reader,
                inputs,
                outputs,
                writes: HashMap::new(),
                events: Vec::new(),
                receipt_data: Vec::new(),
            }),
        }
    }

    fn check_scope(scopes: &[String], address: &str) -> Result<()> {
        if scopes.iter().any(|scope| address.starts_with(scope.as_str())) {
            Ok(())
        } else {
            Err(ExecutionError::Authorization(format!(
                "address {address} not declared in transaction scope"
            )))
        }
    }

    pub fn into_parts(self) -> (HashMap<String, Option<Vec<u8>>>, Vec<Event>, Vec<Vec<u8>>) {
        let inner = self.inner.into_inner();
        (inner.writes, inner.events, inner.receipt_data)
    }
}

#[async_trait]
impl SchedulerContext for TxnContext {
    async fn get_state(&self, address: &str) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        Self::check_scope(&inner.inputs, address)?;
        if let Some(pending) = inner.writes.get(address) {
            return Ok(pending.clone());
        }
        Ok(inner.reader.get(address)?)
    }

    async fn set_state(&self, address: &str, value: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check_scope(&inner.outputs, address)?;
        inner.writes.insert(address.to_string(), Some(value));
        Ok(())
    }

    async fn delete_state(&self, address: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check_scope(&inner.outputs, address)?;
        inner.writes.insert(address.to_string(), None);
        Ok(())
    }

    async fn add_event(&self, event: Event) -> Result<()> {
        self.inner.lock().events.push(event);
        Ok(())
    }

    async fn add_receipt_data(&self, data: Vec<u8>) -> Result<()> {
        self.inner.lock().receipt_data.push(data);
        Ok(())
    }
}

/// Result of scheduling a slate: the new state root plus one receipt per
/// transaction, in slate order.
pub struct ScheduleResult {
    pub state_root: [u8; 32],
    pub receipts: Vec<TransactionReceipt>,
}

fn receipt_from_parts(
    txn: &Transaction,
    writes: HashMap<String, Option<Vec<u8>>>,
    events: Vec<Event>,
) -> (TransactionReceipt, Vec<StateChangeOp>) {
    let mut state_changes = Vec::with_capacity(writes.len());
    let mut ops = Vec::with_capacity(writes.len());
    for (address, value) in writes {
        match value {
            Some(value) => {
                ops.push(StateChangeOp::Set { address: address.clone(), value: value.clone() });
                state_changes.push(StateChange::Set {
                    address: validator_types::Address::from_hex(&address).expect("namespace-checked address"),
                    value,
                });
            }
            None => {
                ops.push(StateChangeOp::Delete { address: address.clone() });
                state_changes.push(StateChange::Delete {
                    address: validator_types::Address::from_hex(&address).expect("namespace-checked address"),
                });
            }
        }
    }
    (TransactionReceipt::valid(txn.id(), state_changes, events), ops)
}

/// Executes a slate strictly in order against one running state view.
pub struct SerialScheduler {
    executor: Arc<Executor>,
}

impl SerialScheduler {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }

    pub async fn run(
        &self,
        trie_writer: &TrieWriter,
        parent_root: [u8; 32],
        kv: &validator_storage::KvStore,
        slate: &[Transaction],
        cancel: CancellationToken,
    ) -> Result<ScheduleResult> {
        let mut root = parent_root;
        let mut receipts = Vec::with_capacity(slate.len());
        for txn in slate {
            if cancel.is_cancelled() {
                break;
            }
            let reader = TrieReader::new(kv, root);
            let context = Arc::new(TxnContext::new(
                reader,
                txn.header().inputs.clone(),
                txn.header().outputs.clone(),
            ));
            let outcome = self.executor.execute(txn, context.clone()).await;
            let context = Arc::try_unwrap(context)
                .unwrap_or_else(|_| panic!("executor released the context before returning"));
            let receipt = match outcome {
                Ok(()) => {
                    let (writes, events, _receipt_data) = context.into_parts();
                    let (receipt, ops) = receipt_from_parts(txn, writes, events);
                    root = trie_writer.apply(root, ops)?;
                    receipt
                }
                Err(err) => TransactionReceipt::invalid(txn.id(), err.to_string()),
            };
            receipts.push(receipt);
        }
        Ok(ScheduleResult { state_root: root, receipts })
    }
}

/// Speculatively runs transactions whose declared read/write sets don't
/// overlap concurrently, forked off the same parent root, then merges them
/// back in slate order. A transaction whose *actual* access exceeded its
/// declared set is marked invalid rather than committed.
pub struct ParallelScheduler {
    executor: Arc<Executor>,
}

impl ParallelScheduler {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }

    /// Partitions the slate into the largest possible runs of
    /// non-conflicting transactions (declared inputs/outputs disjoint from
    /// every other transaction in the same run), in slate order.
    fn partition_into_runs(slate: &[Transaction]) -> Vec<Vec<usize>> {
        let mut runs = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut current_scopes: Vec<&str> = Vec::new();

        for (i, txn) in slate.iter().enumerate() {
            let scopes: Vec<&str> = txn
                .header()
                .inputs
                .iter()
                .chain(txn.header().outputs.iter())
                .map(String::as_str)
                .collect();
            let conflicts = scopes.iter().any(|s| {
                current_scopes
                    .iter()
                    .any(|o| s.starts_with(o) || o.starts_with(s))
            });
            if conflicts {
                runs.push(std::mem::take(&mut current));
                current_scopes.clear();
            }
            current.push(i);
            current_scopes.extend(scopes);
        }
        if !current.is_empty() {
            runs.push(current);
        }
        runs
    }

    pub async fn run(
        &self,
        trie_writer: &TrieWriter,
        parent_root: [u8; 32],
        kv: &validator_storage::KvStore,
        slate: &[Transaction],
        cancel: CancellationToken,
    ) -> Result<ScheduleResult> {
        let mut root = parent_root;
        let mut receipts: Vec<Option<TransactionReceipt>> = (0..slate.len()).map(|_| None).collect();

        for run in Self::partition_into_runs(slate) {
            if cancel.is_cancelled() {
                break;
            }
            // Concurrent, not parallel: each future is driven by this task's
            // own polling, so none of them need to outlive this loop
            // iteration the way a `tokio::spawn`'d task would.
            let mut in_flight = FuturesUnordered::new();
            for idx in run {
                let txn = &slate[idx];
                let reader = TrieReader::new(kv, root);
                in_flight.push(async move {
                    let context = Arc::new(TxnContext::new(
                        reader,
                        txn.header().inputs.clone(),
                        txn.header().outputs.clone(),
                    ));
                    let outcome = self.executor.execute(txn, context.clone()).await;
                    let context = Arc::try_unwrap(context)
                        .unwrap_or_else(|_| panic!("executor released the context before returning"));
                    let result = match outcome {
                        Ok(()) => {
                            let (writes, events, _receipt_data) = context.into_parts();
                            receipt_from_parts(txn, writes, events)
                        }
                        Err(err) => (TransactionReceipt::invalid(txn.id(), err.to_string()), Vec::new()),
                    };
                    (idx, result)
                });
            }
            while let Some((idx, (receipt, ops))) = in_flight.next().await {
                if receipt.is_valid() {
                    root = trie_writer.apply(root, ops)?;
                }
                receipts[idx] = Some(receipt);
            }
        }

        Ok(ScheduleResult {
            state_root: root,
            receipts: receipts.into_iter().map(|r| r.expect("every index scheduled exactly once")).collect(),
        })
    }
}
