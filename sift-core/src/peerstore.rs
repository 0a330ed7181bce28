//! Peer store: contact addresses with lifetime classes, plus per-peer verification metadata.
//!
//! Addresses learned from other peers start out `Temporary`; only a peer that answered a ping
//! gets its addresses re-registered as `Provider`. Expired entries are invisible to readers and
//! are swept lazily on write.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::identity::PeerId;
use crate::protocol::PeerRecord;

/// How long a "last verified" record is honoured.
pub const VERIFIED_TTL: Duration = Duration::from_secs(5 * 60);

/// Lifetime class of a stored address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrTtl {
    /// Unverified address, kept just long enough to dial it once.
    Temporary,
    /// Address of a peer that has proven reachable.
    Provider,
}

impl AddrTtl {
    pub fn duration(self) -> Duration {
        match self {
            AddrTtl::Temporary => Duration::from_secs(10),
            AddrTtl::Provider => Duration::from_secs(10 * 60),
        }
    }
}

/// Shared peer store. Implementations handle their own locking.
pub trait PeerStore: Send + Sync {
    /// Contact info for a peer; `addrs` holds only unexpired addresses and may be empty.
    fn peer_info(&self, peer: &PeerId) -> PeerRecord;

    /// Add addresses. An address already stored with a later expiry keeps it.
    fn add_addrs(&self, peer: &PeerId, addrs: &[SocketAddr], ttl: AddrTtl);

    /// Store addresses with exactly this lifetime class, replacing their previous expiry.
    fn set_addrs(&self, peer: &PeerId, addrs: &[SocketAddr], ttl: AddrTtl);

    /// When the peer last answered a ping, if that is recent enough to still be on record.
    fn last_verified(&self, peer: &PeerId) -> Option<Instant>;

    fn record_verified(&self, peer: &PeerId, at: Instant);
}

#[derive(Debug, Clone, Copy)]
struct AddrEntry {
    ttl: AddrTtl,
    expires: Instant,
}

#[derive(Debug, Default)]
struct PeerEntry {
    addrs: HashMap<SocketAddr, AddrEntry>,
    verified: Option<Instant>,
}

impl PeerEntry {
    fn prune(&mut self, now: Instant) {
        self.addrs.retain(|_, e| e.expires > now);
        if self.verified.is_some_and(|at| now.duration_since(at) >= VERIFIED_TTL) {
            self.verified = None;
        }
    }

    fn is_empty(&self) -> bool {
        self.addrs.is_empty() && self.verified.is_none()
    }
}

/// In-memory peer store with lazy expiry.
#[derive(Default)]
pub struct MemoryPeerStore {
    peers: RwLock<HashMap<PeerId, PeerEntry>>,
}

impl MemoryPeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime class of a live address, if stored.
    pub fn addr_ttl(&self, peer: &PeerId, addr: &SocketAddr) -> Option<AddrTtl> {
        let now = Instant::now();
        self.peers
            .read()
            .get(peer)
            .and_then(|p| p.addrs.get(addr))
            .filter(|e| e.expires > now)
            .map(|e| e.ttl)
    }

    /// Drop every expired address and verification record.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut peers = self.peers.write();
        for entry in peers.values_mut() {
            entry.prune(now);
        }
        peers.retain(|_, e| !e.is_empty());
    }

    fn with_entry(&self, peer: &PeerId, f: impl FnOnce(&mut PeerEntry, Instant)) {
        let now = Instant::now();
        let mut peers = self.peers.write();
        let entry = peers.entry(*peer).or_default();
        entry.prune(now);
        f(entry, now);
        if entry.is_empty() {
            peers.remove(peer);
        }
    }
}

impl PeerStore for MemoryPeerStore {
    fn peer_info(&self, peer: &PeerId) -> PeerRecord {
        let now = Instant::now();
        let mut addrs: Vec<SocketAddr> = self
            .peers
            .read()
            .get(peer)
            .map(|p| {
                p.addrs
                    .iter()
                    .filter(|(_, e)| e.expires > now)
                    .map(|(a, _)| *a)
                    .collect()
            })
            .unwrap_or_default();
        addrs.sort();
        PeerRecord::new(*peer, addrs)
    }

    fn add_addrs(&self, peer: &PeerId, addrs: &[SocketAddr], ttl: AddrTtl) {
        self.with_entry(peer, |entry, now| {
            let expires = now + ttl.duration();
            for addr in addrs {
                match entry.addrs.get_mut(addr) {
                    Some(existing) if existing.expires >= expires => {}
                    Some(existing) => *existing = AddrEntry { ttl, expires },
                    None => {
                        entry.addrs.insert(*addr, AddrEntry { ttl, expires });
                    }
                }
            }
        });
    }

    fn set_addrs(&self, peer: &PeerId, addrs: &[SocketAddr], ttl: AddrTtl) {
        self.with_entry(peer, |entry, now| {
            let expires = now + ttl.duration();
            for addr in addrs {
                entry.addrs.insert(*addr, AddrEntry { ttl, expires });
            }
        });
    }

    fn last_verified(&self, peer: &PeerId) -> Option<Instant> {
        let now = Instant::now();
        self.peers
            .read()
            .get(peer)
            .and_then(|p| p.verified)
            .filter(|at| now.duration_since(*at) < VERIFIED_TTL)
    }

    fn record_verified(&self, peer: &PeerId, at: Instant) {
        self.with_entry(peer, |entry, _| {
            entry.verified = Some(entry.verified.map_or(at, |prev| prev.max(at)));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[test]
    fn unknown_peer_is_addressless() {
        let store = MemoryPeerStore::new();
        let peer = PeerId::random();
        let info = store.peer_info(&peer);
        assert_eq!(info.id, peer);
        assert!(info.is_addressless());
        assert!(store.last_verified(&peer).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn temporary_addrs_expire() {
        let store = MemoryPeerStore::new();
        let peer = PeerId::random();
        store.add_addrs(&peer, &[addr(1)], AddrTtl::Temporary);
        assert_eq!(store.peer_info(&peer).addrs, vec![addr(1)]);
        tokio::time::advance(AddrTtl::Temporary.duration()).await;
        assert!(store.peer_info(&peer).is_addressless());
    }

    #[tokio::test(start_paused = true)]
    async fn add_does_not_shorten_provider_ttl() {
        let store = MemoryPeerStore::new();
        let peer = PeerId::random();
        store.set_addrs(&peer, &[addr(1)], AddrTtl::Provider);
        store.add_addrs(&peer, &[addr(1)], AddrTtl::Temporary);
        assert_eq!(store.addr_ttl(&peer, &addr(1)), Some(AddrTtl::Provider));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(store.peer_info(&peer).addrs, vec![addr(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn set_promotes_temporary_to_provider() {
        let store = MemoryPeerStore::new();
        let peer = PeerId::random();
        store.add_addrs(&peer, &[addr(1), addr(2)], AddrTtl::Temporary);
        store.set_addrs(&peer, &[addr(1)], AddrTtl::Provider);
        assert_eq!(store.addr_ttl(&peer, &addr(1)), Some(AddrTtl::Provider));
        assert_eq!(store.addr_ttl(&peer, &addr(2)), Some(AddrTtl::Temporary));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.peer_info(&peer).addrs, vec![addr(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn verification_record_expires_after_five_minutes() {
        let store = MemoryPeerStore::new();
        let peer = PeerId::random();
        let at = Instant::now();
        store.record_verified(&peer, at);
        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(store.last_verified(&peer), Some(at));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.last_verified(&peer).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_forgets_dead_entries() {
        let store = MemoryPeerStore::new();
        let peer = PeerId::random();
        store.add_addrs(&peer, &[addr(1)], AddrTtl::Temporary);
        tokio::time::advance(Duration::from_secs(11)).await;
        store.sweep();
        assert!(store.peers.read().is_empty());
    }
}
