//! Sift wire protocol: message types, peer records, version.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

/// Current protocol version. Sent first in the transport handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Max peer records returned in one sample response.
pub const SAMPLE_LIMIT: usize = 16;

/// A peer and the addresses it can be reached at. No addresses means it cannot be contacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: PeerId,
    pub addrs: Vec<SocketAddr>,
}

impl PeerRecord {
    pub fn new(id: PeerId, addrs: Vec<SocketAddr>) -> Self {
        Self { id, addrs }
    }

    pub fn is_addressless(&self) -> bool {
        self.addrs.is_empty()
    }
}

/// All wire message types. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Ask a peer for some of the peers it knows about.
    SampleRequest,
    /// Answer to SampleRequest, at most SAMPLE_LIMIT records.
    SampleResponse { peers: Vec<PeerRecord> },
    /// Liveness probe.
    Ping,
    Pong,
}
