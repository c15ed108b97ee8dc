// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transaction execution: the component message bus transaction processors
//! connect to (C4/C5), the executor that dispatches a single transaction to
//! a registered processor with retry (C9), and the serial/parallel
//! schedulers that turn a slate of transactions into a new state root (C8).

pub mod component_service;
pub mod error;
pub mod executor;
pub mod scheduler;

/// Generated protobuf/gRPC types for the component endpoint.
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/validator.execution.rs"));
}

pub use component_service::ComponentEndpoint;
pub use error::{ExecutionError, Result};
pub use executor::{ContextRegistry, Executor, ProcessorConnection, ProcessorRegistry};
pub use scheduler::{ParallelScheduler, ScheduleResult, SchedulerContext, SerialScheduler, TxnContext};
