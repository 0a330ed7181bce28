//! Routing table: the node's working set of tracked peers.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::identity::PeerId;

/// Shared routing table. Implementations must be safe to use from several tasks at once;
/// discovery, the RPC server and telemetry all hold the same table.
pub trait RoutingTable: Send + Sync {
    /// All members, in no particular order.
    fn list_peers(&self) -> Vec<PeerId>;

    fn size(&self) -> usize;

    /// Insert the peer, or refresh it if already present.
    fn update(&self, peer: PeerId);

    fn remove(&self, peer: &PeerId);
}

/// In-memory routing table keyed by peer ID; remembers when each member was last refreshed.
#[derive(Default)]
pub struct MemoryRoutingTable {
    peers: RwLock<HashMap<PeerId, Instant>>,
}

impl MemoryRoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.read().contains_key(peer)
    }

    /// When the peer was last inserted or refreshed.
    pub fn last_updated(&self, peer: &PeerId) -> Option<Instant> {
        self.peers.read().get(peer).copied()
    }
}

impl RoutingTable for MemoryRoutingTable {
    fn list_peers(&self) -> Vec<PeerId> {
        self.peers.read().keys().copied().collect()
    }

    fn size(&self) -> usize {
        self.peers.read().len()
    }

    fn update(&self, peer: PeerId) {
        self.peers.write().insert(peer, Instant::now());
    }

    fn remove(&self, peer: &PeerId) {
        self.peers.write().remove(peer);
    }
}
