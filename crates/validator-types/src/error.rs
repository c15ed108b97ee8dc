// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors raised while constructing, decoding, or validating core data-model
/// types. This is deliberately narrower than the validation taxonomy used by
/// higher-level crates (block/batch/txn validators); it only covers
/// malformed-data conditions that can be detected without chain context.
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("wire decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("wire encode failed: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("bad signature: {0}")]
    BadSignature(String),

    #[error("bad payload hash: expected {expected}, got {actual}")]
    BadPayloadHash { expected: String, actual: String },

    #[error("empty batch: a batch must contain at least one transaction")]
    EmptyBatch,

    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),
}
