// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors surfaced while wiring or bootstrapping a node, as opposed to the
/// per-subsystem error taxonomies (`StorageError`, `ValidationError`, ...)
/// each already report their own failures through.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("genesis batch at {path} does not decode as a batch list: {source}")]
    BadGenesisBatch { path: String, source: prost::DecodeError },

    #[error("genesis batch present at {path} but a chain head already exists and does not match it")]
    GenesisMismatch { path: String },

    #[error("genesis block failed validation: {0}")]
    GenesisInvalid(String),

    #[error("timed out after {waited_secs}s waiting for a processor to register {family} {version} before applying genesis")]
    GenesisProcessorTimeout { family: String, version: String, waited_secs: u64 },

    #[error(transparent)]
    Storage(#[from] validator_storage::StorageError),

    #[error(transparent)]
    Journal(#[from] validator_journal::JournalError),

    #[error(transparent)]
    Permission(#[from] validator_permissions::PermissionError),

    #[error(transparent)]
    Types(#[from] validator_types::TypesError),

    #[error(transparent)]
    Hex(#[from] hex::FromHexError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;
