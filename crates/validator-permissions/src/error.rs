// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Permission-layer error taxonomy (C14, spec §7 "Permission").
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("transactor denied: {0}")]
    TransactorDenied(String),

    #[error("peer denied: {0}")]
    PeerDenied(String),

    #[error("consensus peer denied: {0}")]
    ConsensusPeerDenied(String),

    #[error(transparent)]
    Storage(#[from] validator_storage::StorageError),

    #[error(transparent)]
    Types(#[from] validator_types::TypesError),
}

pub type Result<T> = std::result::Result<T, PermissionError>;
