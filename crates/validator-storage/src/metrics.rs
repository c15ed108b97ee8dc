// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Storage-layer metrics, registered once at startup and threaded into
//! `BlockStore` the way the teacher threads `Arc<Metrics>` into its
//! storage-adjacent components.

use prometheus::{IntGauge, Registry};

pub struct StorageMetrics {
    pub chain_head_block_num: IntGauge,
}

impl StorageMetrics {
    pub fn new(registry: &Registry) -> Self {
        let metrics = Self {
            chain_head_block_num: IntGauge::new("validator_chain_head_block_num", "block_num of the current chain head")
                .expect("metric name/help are static and valid"),
        };
        let _ = registry.register(Box::new(metrics.chain_head_block_num.clone()));
        metrics
    }
}
