//! Heartbeat Tracking
//!
//! Per-peer last-seen-tick table. All timeouts here are logical ticks, not
//! wall clock, which keeps partition detection deterministic under test.

use std::collections::HashMap;

use crate::node::NodeId;

/// Last-seen tick per peer. The local node is never tracked here; its own
/// liveness is implicit.
#[derive(Debug, Default)]
pub struct HeartbeatTable {
    seen: HashMap<NodeId, u64>,
}

impl HeartbeatTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat (or initialize the entry at admission time)
    pub fn record(&mut self, node: NodeId, tick: u64) {
        self.seen.insert(node, tick);
    }

    /// Forget a peer
    pub fn remove(&mut self, node: &NodeId) -> Option<u64> {
        self.seen.remove(node)
    }

    /// Last tick a heartbeat was seen from `node`
    pub fn last_seen(&self, node: &NodeId) -> Option<u64> {
        self.seen.get(node).copied()
    }

    /// Whether the peer is tracked
    pub fn contains(&self, node: &NodeId) -> bool {
        self.seen.contains_key(node)
    }

    /// Number of tracked peers
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True when no peers are tracked
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Peers silent beyond `threshold` ticks at time `now`. Returned sorted
    /// so eviction order is deterministic.
    pub fn partitioned(&self, now: u64, threshold: u64) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .seen
            .iter()
            .filter(|(_, last)| now.saturating_sub(**last) > threshold)
            .map(|(node, _)| node.clone())
            .collect();
        out.sort();
        out
    }
}
