//! Scripted RPC client for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::identity::PeerId;
use crate::protocol::PeerRecord;
use crate::routing::MemoryRoutingTable;
use crate::rpc::{DiscoveryRpc, RpcError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Sample(PeerId),
    Ping(PeerId),
}

impl Call {
    pub(crate) fn peer(&self) -> PeerId {
        match self {
            Call::Sample(p) | Call::Ping(p) => *p,
        }
    }
}

#[derive(Default)]
struct Script {
    samples: HashMap<PeerId, Vec<PeerRecord>>,
    unreachable: HashSet<PeerId>,
    latency: Duration,
    calls: Vec<Call>,
    completed_samples: usize,
    member_at_ping: HashSet<PeerId>,
}

/// Answers `sample` only for peers given a script (others fail) and `ping` for every peer
/// not marked unreachable. Records every call in order.
pub(crate) struct ScriptedRpc {
    table: Arc<MemoryRoutingTable>,
    script: Mutex<Script>,
}

impl ScriptedRpc {
    /// `table` is checked at each ping, to catch peers added before they were verified.
    pub(crate) fn watching(table: Arc<MemoryRoutingTable>) -> Self {
        Self {
            table,
            script: Mutex::new(Script::default()),
        }
    }

    pub(crate) fn set_sample(&self, peer: PeerId, records: Vec<PeerRecord>) {
        self.script.lock().samples.insert(peer, records);
    }

    pub(crate) fn set_unreachable(&self, peer: PeerId) {
        self.script.lock().unreachable.insert(peer);
    }

    /// Make every sample call take this long.
    pub(crate) fn set_latency(&self, latency: Duration) {
        self.script.lock().latency = latency;
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.script.lock().calls.clone()
    }

    pub(crate) fn sample_count(&self) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Sample(_)))
            .count()
    }

    pub(crate) fn ping_count(&self, peer: &PeerId) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|c| **c == Call::Ping(*peer))
            .count()
    }

    pub(crate) fn completed_samples(&self) -> usize {
        self.script.lock().completed_samples
    }

    pub(crate) fn was_member_at_ping(&self, peer: &PeerId) -> bool {
        self.script.lock().member_at_ping.contains(peer)
    }
}

#[async_trait]
impl DiscoveryRpc for ScriptedRpc {
    async fn sample(&self, peer: &PeerId) -> Result<Vec<PeerRecord>, RpcError> {
        let (answer, latency) = {
            let mut script = self.script.lock();
            script.calls.push(Call::Sample(*peer));
            (script.samples.get(peer).cloned(), script.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.script.lock().completed_samples += 1;
        answer.ok_or(RpcError::Timeout)
    }

    async fn ping(&self, peer: &PeerId) -> Result<(), RpcError> {
        let member = self.table.contains(peer);
        let mut script = self.script.lock();
        script.calls.push(Call::Ping(*peer));
        if member {
            script.member_at_ping.insert(*peer);
        }
        if script.unreachable.contains(peer) {
            return Err(RpcError::Timeout);
        }
        Ok(())
    }
}
