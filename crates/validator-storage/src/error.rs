// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Storage-layer error taxonomy from spec §7.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("write-write conflict on head: {0}")]
    Conflict(String),

    #[error(transparent)]
    RocksDb(#[from] rocksdb::Error),

    #[error(transparent)]
    Encoding(#[from] bcs::Error),

    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Types(#[from] validator_types::TypesError),
}

pub type Result<T> = std::result::Result<T, StorageError>;
