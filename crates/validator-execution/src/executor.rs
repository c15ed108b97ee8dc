// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! C9: dispatches one transaction to a registered processor, with a
//! timeout-and-retry loop against other registered instances grounded in
//! the teacher's `Broadcaster::push_blocks` RTT-adaptive retry loop
//! (adapted here from "push a block to every peer" to "send one request to
//! one of several interchangeable processor instances").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

use validator_types::Transaction;

use crate::error::{ExecutionError, Result};
use crate::scheduler::SchedulerContext;

/// A live connection to one registered transaction-processor instance.
/// Implemented concretely by the component endpoint's connection handle
/// (`component_service::ProcessorHandle`); mocked in tests.
#[async_trait]
pub trait ProcessorConnection: Send + Sync {
    async fn send_process_request(&self, context_id: &str, transaction: &Transaction) -> Result<()>;
}

type ProcessorKey = (String, String);

/// Registered processor instances, keyed by `(family_name, family_version)`,
/// load-balanced round-robin across duplicate registrations.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: DashMap<ProcessorKey, Vec<Arc<dyn ProcessorConnection>>>,
    next: DashMap<ProcessorKey, AtomicUsize>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, family: impl Into<String>, version: impl Into<String>, conn: Arc<dyn ProcessorConnection>) {
        let key = (family.into(), version.into());
        self.processors.entry(key).or_default().push(conn);
    }

    pub fn unregister(&self, family: &str, version: &str, conn: &Arc<dyn ProcessorConnection>) {
        let key = (family.to_string(), version.to_string());
        if let Some(mut handles) = self.processors.get_mut(&key) {
            handles.retain(|h| !Arc::ptr_eq(h, conn));
        }
    }

    /// Whether at least one processor instance is currently registered for
    /// `(family, version)`.
    pub fn is_registered(&self, family: &str, version: &str) -> bool {
        let key = (family.to_string(), version.to_string());
        self.processors.get(&key).map(|handles| !handles.is_empty()).unwrap_or(false)
    }

    /// Returns up to `count` distinct processor instances for `(family,
    /// version)`, starting from the next round-robin position, wrapping
    /// around if there are fewer registered instances than `count`.
    fn candidates(&self, family: &str, version: &str, count: usize) -> Vec<Arc<dyn ProcessorConnection>> {
        let key = (family.to_string(), version.to_string());
        let Some(handles) = self.processors.get(&key) else {
            return Vec::new();
        };
        if handles.is_empty() {
            return Vec::new();
        }
        let counter = self.next.entry(key.clone()).or_insert_with(|| AtomicUsize::new(0));
        let start = counter.fetch_add(1, Ordering::Relaxed);
        (0..count.min(handles.len()))
            .map(|i| handles[(start + i) % handles.len()].clone())
            .collect()
    }
}

/// Executes transactions against registered processors with bounded
/// retries, marking a transaction invalid rather than hanging forever when
/// no processor answers in time.
pub struct Executor {
    registry: Arc<ProcessorRegistry>,
    contexts: ContextRegistry,
    request_timeout: Duration,
    max_attempts: usize,
}

impl Executor {
    pub fn new(registry: Arc<ProcessorRegistry>) -> Self {
        Self {
            registry,
            contexts: ContextRegistry::new(),
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// The shared map from in-flight `context_id` to `SchedulerContext`,
    /// handed to the component endpoint so incoming `GetState`/`SetState`/
    /// etc. calls can be answered against the right transaction's state view.
    pub fn contexts(&self) -> ContextRegistry {
        self.contexts.clone()
    }

    /// Sends `transaction` to a registered processor, retrying against
    /// other registered instances (round-robin) on timeout, up to
    /// `max_attempts`. `context` is published under the transaction's id for
    /// the duration of the call so the component endpoint can answer state
    /// requests tagged with that id, then withdrawn.
    pub async fn execute(&self, transaction: &Transaction, context: Arc<dyn SchedulerContext>) -> Result<()> {
        let header = transaction.header();
        let candidates = self.registry.candidates(&header.family_name, &header.family_version, self.max_attempts);
        if candidates.is_empty() {
            return Err(ExecutionError::NoProcessorRegistered {
                family: header.family_name.clone(),
                version: header.family_version.clone(),
            });
        }

        let context_id = transaction.id().to_string();
        self.contexts.insert(context_id.clone(), context);

        let mut outcome = Err(ExecutionError::Timeout);
        for (attempt, conn) in candidates.iter().enumerate() {
            match tokio::time::timeout(self.request_timeout, conn.send_process_request(&context_id, transaction)).await {
                Ok(Ok(())) => {
                    outcome = Ok(());
                    break;
                }
                Ok(Err(err)) => {
                    warn!(txn = transaction.id(), attempt, "processor rejected transaction: {err}");
                    outcome = Err(err);
                }
                Err(_elapsed) => {
                    warn!(txn = transaction.id(), attempt, "processor request timed out");
                    outcome = Err(ExecutionError::Timeout);
                }
            }
        }

        self.contexts.remove(&context_id);
        outcome
    }
}

/// Maps a transaction's `context_id` to the `SchedulerContext` a connected
/// processor should see for `GetState`/`SetState`/`DeleteState`/`AddEvent`/
/// `AddReceiptData` calls that arrive tagged with that id. Shared between
/// the executor (which assigns context ids) and the component endpoint
/// (which answers state calls against them).
#[derive(Default, Clone)]
pub struct ContextRegistry {
    contexts: Arc<DashMap<String, Arc<dyn SchedulerContext>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, context_id: impl Into<String>, context: Arc<dyn SchedulerContext>) {
        self.contexts.insert(context_id.into(), context);
    }

    pub fn remove(&self, context_id: &str) {
        self.contexts.remove(context_id);
    }

    pub fn get(&self, context_id: &str) -> Option<Arc<dyn SchedulerContext>> {
        self.contexts.get(context_id).map(|c| c.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use validator_types::testing::TransactionBuilder;

    struct AlwaysOk(Arc<StdAtomicUsize>);

    #[async_trait]
    impl ProcessorConnection for AlwaysOk {
        async fn send_process_request(&self, _context_id: &str, _transaction: &Transaction) -> Result<()> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl ProcessorConnection for AlwaysFails {
        async fn send_process_request(&self, _context_id: &str, _transaction: &Transaction) -> Result<()> {
            Err(ExecutionError::Internal("boom".to_string()))
        }
    }

    struct NullContext;

    #[async_trait]
    impl SchedulerContext for NullContext {
        async fn get_state(&self, _address: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn set_state(&self, _address: &str, _value: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn delete_state(&self, _address: &str) -> Result<()> {
            Ok(())
        }
        async fn add_event(&self, _event: validator_types::Event) -> Result<()> {
            Ok(())
        }
        async fn add_receipt_data(&self, _data: Vec<u8>) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn missing_processor_is_reported() {
        let registry = Arc::new(ProcessorRegistry::new());
        let executor = Executor::new(registry);
        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"x".to_vec()).build();
        let err = executor.execute(&txn, Arc::new(NullContext)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::NoProcessorRegistered { .. }));
    }

    #[tokio::test]
    async fn succeeds_against_a_single_registered_processor() {
        let registry = Arc::new(ProcessorRegistry::new());
        let calls = Arc::new(StdAtomicUsize::new(0));
        registry.register("intkey", "1.0", Arc::new(AlwaysOk(calls.clone())));
        let executor = Executor::new(registry);
        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"x".to_vec()).build();
        executor.execute(&txn, Arc::new(NullContext)).await.unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn retries_against_a_second_instance_after_a_failure() {
        let registry = Arc::new(ProcessorRegistry::new());
        registry.register("intkey", "1.0", Arc::new(AlwaysFails));
        let calls = Arc::new(StdAtomicUsize::new(0));
        registry.register("intkey", "1.0", Arc::new(AlwaysOk(calls.clone())));
        let executor = Executor::new(registry).with_max_attempts(2);
        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"x".to_vec()).build();
        executor.execute(&txn, Arc::new(NullContext)).await.unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn reports_last_error_when_every_instance_fails() {
        let registry = Arc::new(ProcessorRegistry::new());
        registry.register("intkey", "1.0", Arc::new(AlwaysFails));
        let executor = Executor::new(registry).with_max_attempts(1);
        let txn = TransactionBuilder::new("intkey", "1.0").payload(b"x".to_vec()).build();
        assert!(executor.execute(&txn, Arc::new(NullContext)).await.is_err());
    }

    #[test]
    fn context_registry_round_trips() {
        let registry = ContextRegistry::new();
        registry.insert("ctx-1", Arc::new(NullContext));
        assert!(registry.get("ctx-1").is_some());
        registry.remove("ctx-1");
        assert!(registry.get("ctx-1").is_none());
    }
}
