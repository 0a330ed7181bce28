//! Join the network: probe bootstrap addresses, then keep the routing table topped up.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sift_core::{
    AddrTtl, Discovery, DiscoveryConfig, MemoryPeerStore, PeerId, PeerStore, RoutingTable,
    StopHandle,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transport::TcpRpc;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Ping each bootstrap address and seed the table with whoever answers.
/// Returns how many peers were added.
pub async fn bootstrap(
    rpc: &TcpRpc,
    addrs: &[SocketAddr],
    local: PeerId,
    table: &dyn RoutingTable,
    store: &dyn PeerStore,
) -> usize {
    let mut joined = 0;
    for addr in addrs {
        match rpc.probe(*addr).await {
            Ok(peer) if peer == local => debug!(%addr, "bootstrap address is this node"),
            Ok(peer) => {
                store.set_addrs(&peer, &[*addr], AddrTtl::Provider);
                store.record_verified(&peer, Instant::now());
                table.update(peer);
                joined += 1;
                info!(%peer, %addr, "bootstrap peer reachable");
            }
            Err(e) => warn!(%addr, error = %e, "bootstrap peer unreachable"),
        }
    }
    joined
}

/// Start the discovery loop over the node's shared state.
pub fn start_discovery(
    local: PeerId,
    sample_size: usize,
    table: Arc<dyn RoutingTable>,
    store: Arc<dyn PeerStore>,
    rpc: Arc<TcpRpc>,
) -> StopHandle {
    let config = DiscoveryConfig::with_sample_size(sample_size);
    Arc::new(Discovery::new(local, config, table, store, rpc)).start()
}

/// Drop expired peer-store entries now and then so memory tracks the live set.
pub fn start_sweeper(store: Arc<MemoryPeerStore>) -> StopHandle {
    StopHandle::spawn(move |cancel| async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(SWEEP_INTERVAL) => store.sweep(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use sift_core::{Keypair, MemoryRoutingTable};
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::transport::{serve, ServerContext, StreamTracker};

    struct TestNode {
        keypair: Arc<Keypair>,
        table: Arc<MemoryRoutingTable>,
        store: Arc<MemoryPeerStore>,
        streams: Arc<StreamTracker>,
        addr: SocketAddr,
        _cancel: tokio_util::sync::DropGuard,
    }

    impl TestNode {
        async fn spawn() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let keypair = Arc::new(Keypair::generate());
            let table = Arc::new(MemoryRoutingTable::new());
            let store = Arc::new(MemoryPeerStore::new());
            let streams = Arc::new(StreamTracker::new());
            let cancel = CancellationToken::new();
            let ctx = ServerContext {
                keypair: keypair.clone(),
                table: table.clone(),
                store: store.clone(),
                streams: streams.clone(),
                timeout: Duration::from_secs(5),
            };
            tokio::spawn(serve(listener, ctx, cancel.clone()));
            Self {
                keypair,
                table,
                store,
                streams,
                addr,
                _cancel: cancel.drop_guard(),
            }
        }

        fn id(&self) -> PeerId {
            self.keypair.peer_id()
        }

        fn rpc(&self) -> Arc<TcpRpc> {
            Arc::new(TcpRpc::new(
                self.keypair.clone(),
                self.store.clone(),
                self.streams.clone(),
                Duration::from_secs(5),
            ))
        }

        async fn bootstrap(&self, addrs: &[SocketAddr]) -> usize {
            bootstrap(
                &self.rpc(),
                addrs,
                self.id(),
                self.table.as_ref(),
                self.store.as_ref(),
            )
            .await
        }
    }

    #[tokio::test]
    async fn bootstrap_adds_reachable_peers_only() {
        let a = TestNode::spawn().await;
        let b = TestNode::spawn().await;
        let dead = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };

        let joined = a.bootstrap(&[b.addr, dead, a.addr]).await;

        assert_eq!(joined, 1);
        assert_eq!(a.table.list_peers(), vec![b.id()]);
        assert_eq!(a.store.addr_ttl(&b.id(), &b.addr), Some(AddrTtl::Provider));
        assert!(a.store.last_verified(&b.id()).is_some());
    }

    #[tokio::test]
    async fn discovery_learns_peers_of_bootstrap_node() {
        let a = TestNode::spawn().await;
        let b = TestNode::spawn().await;
        let c = TestNode::spawn().await;
        c.bootstrap(&[b.addr]).await;
        b.bootstrap(&[c.addr]).await;
        a.bootstrap(&[b.addr]).await;

        let discovery = Discovery::new(
            a.id(),
            DiscoveryConfig::with_sample_size(1),
            a.table.clone(),
            a.store.clone(),
            a.rpc(),
        );
        let stats = discovery.replenish(1).await;

        assert_eq!(stats.queried, 1);
        assert_eq!(stats.promoted, 1);
        assert!(a.table.contains(&c.id()));
        assert_eq!(a.store.addr_ttl(&c.id(), &c.addr), Some(AddrTtl::Provider));
        assert!(!a.table.contains(&a.id()));
    }
}
