// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! C13: the engine-agnostic consensus interface. `ConsensusEngineLink` and
//! `EngineCommand` are the §4.7 protocol's two directions; `ConsensusInterface`
//! is the actor serializing every validator->engine call and engine-swap
//! through one command channel; `ConsensusEndpoint` is the tonic connection
//! handler the engine dials into, translating the wire protocol in both
//! directions.

pub mod consensus_service;
pub mod dispatcher;
pub mod engine_link;
pub mod error;

/// Generated protobuf/gRPC types for the consensus endpoint.
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/validator.consensus.rs"));
}

pub use consensus_service::ConsensusEndpoint;
pub use dispatcher::{ConsensusInterface, NullCallback};
pub use engine_link::{BlockSummary, ConsensusEngineLink, EngineCallback, EngineCommand};
pub use error::{ConsensusError, Result};
