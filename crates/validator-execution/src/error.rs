// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Execution-layer error taxonomy (C8/C9, spec §7).
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no transaction processor registered for {family} {version}")]
    NoProcessorRegistered { family: String, version: String },

    #[error("authorization violation: {0}")]
    Authorization(String),

    #[error("processor did not respond within the retry budget")]
    Timeout,

    #[error("processor connection closed")]
    ConnectionClosed,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Types(#[from] validator_types::TypesError),

    #[error(transparent)]
    Storage(#[from] validator_storage::StorageError),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
