//! Discovery RPCs: the client-side trait the engine calls, and the server-side sample answer.

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::identity::{PeerId, WireCryptoError};
use crate::peerstore::PeerStore;
use crate::protocol::PeerRecord;
use crate::routing::RoutingTable;
use crate::wire::{FrameDecodeError, FrameEncodeError};

/// Request/response calls against a remote peer. Each call is one blocking round trip from the
/// caller's point of view; timeouts and dialing belong to the implementation.
#[async_trait]
pub trait DiscoveryRpc: Send + Sync {
    /// Ask `peer` for peers it knows about.
    async fn sample(&self, peer: &PeerId) -> Result<Vec<PeerRecord>, RpcError>;

    /// Reachability probe.
    async fn ping(&self, peer: &PeerId) -> Result<(), RpcError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("no known address for {0}")]
    NoAddress(PeerId),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out")]
    Timeout,
    #[error("unsupported protocol version {0}")]
    Version(u8),
    #[error("expected peer {expected}, reached {actual}")]
    PeerMismatch { expected: PeerId, actual: PeerId },
    #[error("peer id does not match its public key")]
    BadIdentity,
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),
    #[error(transparent)]
    Crypto(#[from] WireCryptoError),
    #[error("unexpected response")]
    UnexpectedResponse,
}

/// Answer a sample request: up to `limit` random routing-table members with their live
/// addresses. Skips the local node, the requester and members without addresses.
pub fn sample_peers(
    local: &PeerId,
    requester: &PeerId,
    table: &dyn RoutingTable,
    store: &dyn PeerStore,
    limit: usize,
) -> Vec<PeerRecord> {
    let mut peers = table.list_peers();
    peers.shuffle(&mut rand::thread_rng());
    peers
        .into_iter()
        .filter(|p| p != local && p != requester)
        .map(|p| store.peer_info(&p))
        .filter(|info| !info.is_addressless())
        .take(limit)
        .collect()
}
