// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The journal: block validation (C10), block publishing (C11), chain
//! control (C12), the pending batch pool, and the commit event bus that
//! together turn a stream of candidate blocks into one agreed-upon chain.

pub mod batch_pool;
pub mod block_publisher;
pub mod block_validator;
pub mod chain_controller;
pub mod error;
pub mod event_bus;
pub mod metrics;
pub mod wire;

pub use batch_pool::BatchPool;
pub use block_publisher::{BlockInjector, BlockPublisher};
pub use block_validator::{BlockValidator, ChainView, ParentInfo, Verdict};
pub use chain_controller::{ChainController, ChainStateView, GossipBridge};
pub use error::{InvalidBlockReason, JournalError, Result};
pub use event_bus::{BlockCommitEvent, EventBus, StateDeltaEvent, TransactionReceiptEvent};
pub use metrics::{ConsensusMetrics, ExecutionMetrics};
