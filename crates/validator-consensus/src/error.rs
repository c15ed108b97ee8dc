// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Consensus-interface error taxonomy (C13, spec §7 "Consensus").
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("consensus rejected: {0}")]
    ConsensusReject(String),

    #[error("fork choice aborted: {0}")]
    ForkChoiceAborted(String),

    #[error("no consensus engine connected")]
    EngineDisconnected,

    #[error("consensus engine did not respond within the timeout")]
    Timeout,

    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Types(#[from] validator_types::TypesError),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
