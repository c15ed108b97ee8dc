// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Network-layer metrics, registered once at startup and threaded into
//! `PeerTable`.

use prometheus::{IntGauge, Registry};

pub struct NetworkMetrics {
    pub peers_connected: IntGauge,
}

impl NetworkMetrics {
    pub fn new(registry: &Registry) -> Self {
        let metrics = Self {
            peers_connected: IntGauge::new("validator_peers_connected", "currently authorized peer connections")
                .expect("metric name/help are static and valid"),
        };
        let _ = registry.register(Box::new(metrics.peers_connected.clone()));
        metrics
    }
}
