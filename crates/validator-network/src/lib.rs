// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Peer networking: the peer endpoint other validators connect to (C6/C7),
//! the outbound dialer for static/seed peering, the handshake/authorization
//! flow backed by the permission verifier (C14), the peer registry with its
//! priority-bounded outgoing queues, and gossip broadcast/pull-by-id for
//! blocks and batches.

pub mod authorization;
pub mod dialer;
pub mod error;
pub mod gossip;
pub mod metrics;
pub mod peer_service;
pub mod peer_table;

/// Generated protobuf/gRPC types for the peer endpoint.
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/validator.network.rs"));
}

pub use authorization::AuthorizationScheme;
pub use dialer::{dial, run_static};
pub use error::{NetworkError, Result};
pub use gossip::{GossipSink, GossipStore, SeenSet};
pub use metrics::NetworkMetrics;
pub use peer_service::PeerEndpoint;
pub use peer_table::{PeerHandle, PeerTable, PeeringMode, Priority};
