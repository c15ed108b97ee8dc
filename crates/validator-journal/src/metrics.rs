// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Journal-layer metrics: block-commit progress (`ConsensusMetrics`, the
//! outcome of a consensus-driven commit) and admission into the pending
//! pool (`ExecutionMetrics`, the gate in front of execution), registered
//! once at startup and threaded into `ChainController`/`BatchPool`.

use prometheus::{IntCounter, Registry};

pub struct ConsensusMetrics {
    pub blocks_committed: IntCounter,
}

impl ConsensusMetrics {
    pub fn new(registry: &Registry) -> Self {
        let metrics = Self {
            blocks_committed: IntCounter::new("validator_blocks_committed_total", "blocks committed to the chain")
                .expect("metric name/help are static and valid"),
        };
        let _ = registry.register(Box::new(metrics.blocks_committed.clone()));
        metrics
    }
}

pub struct ExecutionMetrics {
    pub batches_admitted: IntCounter,
    pub batches_rejected: IntCounter,
}

impl ExecutionMetrics {
    pub fn new(registry: &Registry) -> Self {
        let metrics = Self {
            batches_admitted: IntCounter::new("validator_batches_admitted_total", "batches admitted into the pending pool")
                .expect("metric name/help are static and valid"),
            batches_rejected: IntCounter::new("validator_batches_rejected_total", "batches rejected at admission")
                .expect("metric name/help are static and valid"),
        };
        for collector in [Box::new(metrics.batches_admitted.clone()) as Box<dyn prometheus::core::Collector>, Box::new(metrics.batches_rejected.clone())] {
            let _ = registry.register(collector);
        }
        metrics
    }
}
