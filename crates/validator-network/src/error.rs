// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Network-layer error taxonomy (C6/C7, spec §7 "Network").
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("authorization violation: {0}")]
    AuthorizationViolation(String),

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("outgoing queue full, message dropped: {0}")]
    Backpressure(String),

    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Types(#[from] validator_types::TypesError),

    #[error(transparent)]
    Permission(#[from] validator_permissions::PermissionError),
}

pub type Result<T> = std::result::Result<T, NetworkError>;
