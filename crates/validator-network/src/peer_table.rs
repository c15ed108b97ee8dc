// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Peer registry (C6/C7, spec §4.8): tracks authorized peers, their role
//! sets, and a priority-bounded outgoing queue per peer. Static peering
//! pins the table to a fixed `peers` list; dynamic peering starts from a
//! `seeds` list and grows via `GetPeersRequest`/`Response` exchanges.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout as tokio_timeout;

use crate::error::{NetworkError, Result};
use crate::metrics::NetworkMetrics;
use crate::proto::{PeerMessage, PeerMessageType};

/// How long a pull-by-id or peer-list request waits for a reply before the
/// peer is treated as unreachable for that request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Network role names (spec: "network", "network.consensus", others).
pub const ROLE_NETWORK: &str = "network";
pub const ROLE_NETWORK_CONSENSUS: &str = "network.consensus";

/// Gossip data and other high-value traffic; never dropped ahead of
/// low-priority traffic.
const HIGH_PRIORITY_CAPACITY: usize = 1024;
/// Topology maintenance (peer-list refresh, heartbeat pings); dropped first
/// when a peer's queue backs up.
const LOW_PRIORITY_CAPACITY: usize = 64;

pub type PeerId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

/// A single authorized peer connection: its advertised endpoint, granted
/// roles, and a two-tier outgoing queue feeding its connection task.
pub struct PeerHandle {
    pub endpoint: String,
    roles: HashSet<String>,
    high: mpsc::Sender<PeerMessage>,
    low: mpsc::Sender<PeerMessage>,
    last_heartbeat_millis: AtomicI64,
    violations: AtomicI64,
    pending: DashMap<String, oneshot::Sender<PeerMessage>>,
    next_correlation: AtomicU64,
}

impl PeerHandle {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn roles(&self) -> &HashSet<String> {
        &self.roles
    }

    /// Enqueues a message, dropping it immediately if the priority tier's
    /// queue is full rather than blocking the caller (spec: bounded queue,
    /// low-priority traffic dropped first under backpressure).
    pub fn try_send(&self, message: PeerMessage, priority: Priority) -> Result<()> {
        let sender = match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        };
        sender.try_send(message).map_err(|_| {
            NetworkError::Backpressure(format!("{} queue full for peer {}", priority_name(priority), self.endpoint))
        })
    }

    /// Sends a request and awaits its correlated reply: used for pull-by-id
    /// gossip fetches and peer-list exchange, where the caller needs the
    /// peer's answer rather than fire-and-forget delivery.
    pub async fn request(
        &self,
        message_type: PeerMessageType,
        content: Vec<u8>,
        priority: Priority,
    ) -> Result<PeerMessage> {
        let correlation_id = format!("n{}", self.next_correlation.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);
        let envelope = PeerMessage { message_type: message_type as i32, correlation_id: correlation_id.clone(), content };
        if let Err(err) = self.try_send(envelope, priority) {
            self.pending.remove(&correlation_id);
            return Err(err);
        }
        match tokio_timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(NetworkError::PeerUnreachable(format!("{} closed before replying", self.endpoint))),
            Err(_) => {
                self.pending.remove(&correlation_id);
                Err(NetworkError::PeerUnreachable(format!("{} did not reply in time", self.endpoint)))
            }
        }
    }

    /// Routes an inbound message carrying a known `correlation_id` back to
    /// the waiting `request()` caller. Returns `false` if nothing is
    /// pending for that id (the caller should treat the message as a fresh
    /// request rather than a reply).
    pub fn deliver_reply(&self, message: PeerMessage) -> bool {
        if let Some((_, sender)) = self.pending.remove(&message.correlation_id) {
            let _ = sender.send(message);
            true
        } else {
            false
        }
    }

    pub fn touch_heartbeat(&self, now: Instant, epoch: Instant) {
        self.last_heartbeat_millis
            .store(now.duration_since(epoch).as_millis() as i64, Ordering::Relaxed);
    }

    pub fn is_stale(&self, now: Instant, epoch: Instant, timeout: Duration) -> bool {
        let last = self.last_heartbeat_millis.load(Ordering::Relaxed);
        let elapsed = now.duration_since(epoch).as_millis() as i64 - last;
        elapsed > timeout.as_millis() as i64
    }

    pub fn record_violation(&self) -> i64 {
        self.violations.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn priority_name(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "high-priority",
        Priority::Low => "low-priority",
    }
}

/// Peering mode: fixed list with no discovery, or seed-started with
/// topology maintenance via peer exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeeringMode {
    Static,
    Dynamic { target_degree: usize },
}

pub struct PeerTable {
    mode: PeeringMode,
    peers: DashMap<PeerId, Arc<PeerHandle>>,
    epoch: Instant,
    metrics: Option<Arc<NetworkMetrics>>,
}

impl PeerTable {
    pub fn new(mode: PeeringMode) -> Self {
        Self { mode, peers: DashMap::new(), epoch: Instant::now(), metrics: None }
    }

    /// Attaches `NetworkMetrics` so `register`/`unregister` keep
    /// `peers_connected` current.
    pub fn with_metrics(mut self, metrics: Arc<NetworkMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn mode(&self) -> PeeringMode {
        self.mode
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Registers a newly authorized peer, returning the high/low priority
    /// receivers the caller's connection-writer task should drain.
    pub fn register(
        &self,
        peer_id: PeerId,
        endpoint: String,
        roles: HashSet<String>,
    ) -> (Arc<PeerHandle>, mpsc::Receiver<PeerMessage>, mpsc::Receiver<PeerMessage>) {
        let (high_tx, high_rx) = mpsc::channel(HIGH_PRIORITY_CAPACITY);
        let (low_tx, low_rx) = mpsc::channel(LOW_PRIORITY_CAPACITY);
        let handle = Arc::new(PeerHandle {
            endpoint,
            roles,
            high: high_tx,
            low: low_tx,
            last_heartbeat_millis: AtomicI64::new(0),
            violations: AtomicI64::new(0),
            pending: DashMap::new(),
            next_correlation: AtomicU64::new(0),
        });
        handle.touch_heartbeat(Instant::now(), self.epoch);
        self.peers.insert(peer_id, handle.clone());
        if let Some(metrics) = &self.metrics {
            metrics.peers_connected.set(self.peers.len() as i64);
        }
        (handle, high_rx, low_rx)
    }

    pub fn unregister(&self, peer_id: &str) {
        self.peers.remove(peer_id);
        if let Some(metrics) = &self.metrics {
            metrics.peers_connected.set(self.peers.len() as i64);
        }
    }

    pub fn get(&self, peer_id: &str) -> Option<Arc<PeerHandle>> {
        self.peers.get(peer_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// All peers holding `role`, for broadcast/authorization-filtered fan-out.
    pub fn peers_with_role(&self, role: &str) -> Vec<(PeerId, Arc<PeerHandle>)> {
        self.peers
            .iter()
            .filter(|entry| entry.value().has_role(role))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Peers whose last heartbeat predates `timeout`; caller closes these.
    pub fn stale_peers(&self, timeout: Duration) -> Vec<PeerId> {
        let now = Instant::now();
        self.peers
            .iter()
            .filter(|entry| entry.value().is_stale(now, self.epoch, timeout))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// True if dynamic peering should actively seek more peers.
    pub fn wants_more_peers(&self) -> bool {
        match self.mode {
            PeeringMode::Static => false,
            PeeringMode::Dynamic { target_degree } => self.peers.len() < target_degree,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_mode_never_wants_more_peers() {
        let table = PeerTable::new(PeeringMode::Static);
        assert!(!table.wants_more_peers());
    }

    #[test]
    fn dynamic_mode_wants_more_until_target_degree() {
        let table = PeerTable::new(PeeringMode::Dynamic { target_degree: 2 });
        assert!(table.wants_more_peers());
        let mut roles = HashSet::new();
        roles.insert(ROLE_NETWORK.to_string());
        table.register("p1".to_string(), "tcp://p1".to_string(), roles.clone());
        table.register("p2".to_string(), "tcp://p2".to_string(), roles);
        assert!(!table.wants_more_peers());
    }

    #[test]
    fn low_priority_queue_reports_backpressure_when_full() {
        let table = PeerTable::new(PeeringMode::Static);
        let (handle, _high_rx, _low_rx) =
            table.register("p1".to_string(), "tcp://p1".to_string(), HashSet::new());
        for _ in 0..LOW_PRIORITY_CAPACITY {
            handle
                .try_send(PeerMessage { message_type: 0, correlation_id: String::new(), content: Vec::new() }, Priority::Low)
                .unwrap();
        }
        let result = handle.try_send(
            PeerMessage { message_type: 0, correlation_id: String::new(), content: Vec::new() },
            Priority::Low,
        );
        assert!(result.is_err());
    }

    #[test]
    fn roles_filter_peer_selection() {
        let table = PeerTable::new(PeeringMode::Static);
        let mut roles = HashSet::new();
        roles.insert(ROLE_NETWORK_CONSENSUS.to_string());
        table.register("p1".to_string(), "tcp://p1".to_string(), roles);
        table.register("p2".to_string(), "tcp://p2".to_string(), HashSet::new());
        let consensus_peers = table.peers_with_role(ROLE_NETWORK_CONSENSUS);
        assert_eq!(consensus_peers.len(), 1);
        assert_eq!(consensus_peers[0].0, "p1");
    }
}
