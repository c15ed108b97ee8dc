// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Stable verdict categories for an invalid block (C10, spec §4.4/§7).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InvalidBlockReason {
    #[error("bad signature: {0}")]
    BadSignature(String),

    #[error("bad parent: {0}")]
    BadParent(String),

    #[error("bad state root: expected {expected}, got {actual}")]
    BadStateRoot { expected: String, actual: String },

    #[error("batch invalid, transaction {txn_id}: {reason}")]
    BatchInvalid { txn_id: String, reason: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("consensus reject: {0}")]
    ConsensusReject(String),

    #[error("transaction family not allowlisted: {family} {version}")]
    UnknownTransactionFamily { family: String, version: String },
}

/// Journal-layer error taxonomy (C10/C11/C12, spec §7 "Validation" and
/// "Consensus" categories, plus the wrapped lower-layer errors a block's
/// validation/publication/commit path can surface).
#[derive(Debug, Error)]
pub enum JournalError {
    #[error(transparent)]
    InvalidBlock(#[from] InvalidBlockReason),

    #[error("fork choice aborted: {0}")]
    ForkChoiceAborted(String),

    #[error("no candidate open for parent {0}")]
    NoCandidate(String),

    #[error(transparent)]
    Storage(#[from] validator_storage::StorageError),

    #[error(transparent)]
    Execution(#[from] validator_execution::ExecutionError),

    #[error(transparent)]
    Permission(#[from] validator_permissions::PermissionError),

    #[error(transparent)]
    Consensus(#[from] validator_consensus::ConsensusError),

    #[error(transparent)]
    Types(#[from] validator_types::TypesError),

    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
}

pub type Result<T> = std::result::Result<T, JournalError>;
