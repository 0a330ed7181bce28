//! Sift peer discovery core.
//! Transport-agnostic: the host supplies the RPC client and shares the routing table and peer store.

pub mod discovery;
pub mod identity;
pub mod peerstore;
pub mod protocol;
pub mod routing;
pub mod rpc;
pub mod telemetry;
pub mod wire;

#[cfg(test)]
mod testing;

pub use discovery::{
    discovery_delay, CycleStats, Discovery, DiscoveryConfig, StopHandle, DEFAULT_SAMPLE_SIZE,
    DISCOVERY_INTERVAL, RAMP_UP_CEILING, RAMP_UP_WINDOW,
};
pub use identity::{Keypair, PeerId, PublicKey};
pub use peerstore::{AddrTtl, MemoryPeerStore, PeerStore, VERIFIED_TTL};
pub use protocol::{Message, PeerRecord, PROTOCOL_VERSION, SAMPLE_LIMIT};
pub use routing::{MemoryRoutingTable, RoutingTable};
pub use rpc::{sample_peers, DiscoveryRpc, RpcError};
pub use telemetry::Report;
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
