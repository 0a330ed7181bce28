//! Peer discovery: a background scheduler that periodically replenishes the routing table.
//!
//! Each cycle walks a shuffled snapshot of the routing table, asks up to `budget` reachable
//! members for a sample of their peers, pings every newly learned peer, and promotes the ones
//! that answer. Members without any known address are pruned along the way.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::identity::PeerId;
use crate::peerstore::{AddrTtl, PeerStore, VERIFIED_TTL};
use crate::protocol::PeerRecord;
use crate::routing::RoutingTable;
use crate::rpc::DiscoveryRpc;

/// Length of the startup phase during which discovery runs faster.
pub const RAMP_UP_WINDOW: Duration = Duration::from_secs(30);

/// The ramp-up wait approaches this value at the end of the window.
pub const RAMP_UP_CEILING: Duration = Duration::from_secs(120);

/// Wait between cycles once ramp-up is over.
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(120);

/// Default number of peers queried per cycle.
pub const DEFAULT_SAMPLE_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Max successful sample queries per cycle.
    pub sample_size: usize,
    pub ramp_up: Duration,
    pub ramp_up_ceiling: Duration,
    pub interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            ramp_up: RAMP_UP_WINDOW,
            ramp_up_ceiling: RAMP_UP_CEILING,
            interval: DISCOVERY_INTERVAL,
        }
    }
}

impl DiscoveryConfig {
    pub fn with_sample_size(sample_size: usize) -> Self {
        Self {
            sample_size,
            ..Self::default()
        }
    }
}

/// Wait before the next cycle, given the time elapsed since discovery started.
///
/// Inside the ramp-up window the wait is `exp(rate * t)` seconds with
/// `rate = ln(ceiling) / window`, truncated to whole seconds: 1s right after start, growing
/// towards the ceiling as the window closes. Afterwards it is the fixed interval.
pub fn discovery_delay(config: &DiscoveryConfig, elapsed: Duration) -> Duration {
    if elapsed < config.ramp_up {
        let rate = config.ramp_up_ceiling.as_secs_f64().ln() / config.ramp_up.as_secs_f64();
        let secs = (rate * elapsed.as_secs_f64()).exp();
        Duration::from_secs(secs as u64)
    } else {
        config.interval
    }
}

/// What one replenishment cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Successful sample round trips.
    pub queried: usize,
    /// Addressless members removed from the routing table.
    pub pruned: usize,
    pub failed_samples: usize,
    /// Sampled peers skipped because they were verified recently.
    pub skipped_recent: usize,
    /// Sampled peers that answered a ping and were added to the table.
    pub promoted: usize,
    /// Sampled peers whose ping failed.
    pub unreachable: usize,
    pub budget_left: usize,
}

/// Discovery engine bound to the node's shared routing table, peer store and RPC client.
pub struct Discovery {
    local_id: PeerId,
    config: DiscoveryConfig,
    table: Arc<dyn RoutingTable>,
    store: Arc<dyn PeerStore>,
    rpc: Arc<dyn DiscoveryRpc>,
}

impl Discovery {
    pub fn new(
        local_id: PeerId,
        config: DiscoveryConfig,
        table: Arc<dyn RoutingTable>,
        store: Arc<dyn PeerStore>,
        rpc: Arc<dyn DiscoveryRpc>,
    ) -> Self {
        Self {
            local_id,
            config,
            table,
            store,
            rpc,
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Spawn the discovery loop on the current tokio runtime.
    ///
    /// Stopping is cooperative: a cycle already running finishes, the next one is not started.
    pub fn start(self: Arc<Self>) -> StopHandle {
        StopHandle::spawn(move |cancel| self.run(cancel))
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let started = Instant::now();
        debug!(local = %self.local_id, sample_size = self.config.sample_size, "discovery started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let delay = discovery_delay(&self.config, started.elapsed());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            let stats = self.replenish(self.config.sample_size).await;
            debug!(
                queried = stats.queried,
                pruned = stats.pruned,
                promoted = stats.promoted,
                skipped = stats.skipped_recent,
                unreachable = stats.unreachable,
                failed = stats.failed_samples,
                table_size = self.table.size(),
                "discovery cycle done"
            );
        }
        debug!("discovery stopped");
    }

    /// Run one discovery cycle, spending at most `budget` successful sample queries.
    pub async fn replenish(&self, budget: usize) -> CycleStats {
        let mut stats = CycleStats {
            budget_left: budget,
            ..CycleStats::default()
        };
        let mut candidates = self.table.list_peers();
        candidates.shuffle(&mut rand::thread_rng());

        for peer in candidates {
            if stats.budget_left == 0 {
                break;
            }
            if peer == self.local_id {
                continue;
            }
            if self.store.peer_info(&peer).is_addressless() {
                self.table.remove(&peer);
                stats.pruned += 1;
                debug!(%peer, "pruned addressless peer");
                continue;
            }
            let sample = match self.rpc.sample(&peer).await {
                Ok(sample) => sample,
                Err(e) => {
                    trace!(%peer, error = %e, "sample failed");
                    stats.failed_samples += 1;
                    continue;
                }
            };
            stats.budget_left -= 1;
            stats.queried += 1;
            for record in sample {
                self.verify(record, &mut stats).await;
            }
        }
        stats
    }

    /// Ping a sampled peer and, if it answers, promote its addresses and add it to the table.
    async fn verify(&self, record: PeerRecord, stats: &mut CycleStats) {
        if record.is_addressless() || record.id == self.local_id {
            return;
        }
        if self
            .store
            .last_verified(&record.id)
            .is_some_and(|at| at.elapsed() < VERIFIED_TTL)
        {
            stats.skipped_recent += 1;
            return;
        }
        self.store.add_addrs(&record.id, &record.addrs, AddrTtl::Temporary);
        if let Err(e) = self.rpc.ping(&record.id).await {
            trace!(peer = %record.id, error = %e, "ping failed");
            stats.unreachable += 1;
            return;
        }
        self.store.set_addrs(&record.id, &record.addrs, AddrTtl::Provider);
        self.table.update(record.id);
        self.store.record_verified(&record.id, Instant::now());
        stats.promoted += 1;
        debug!(peer = %record.id, "added verified peer");
    }
}

/// Handle to a background task that checks a cancellation token between units of work.
pub struct StopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StopHandle {
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(f(cancel.clone()));
        Self { cancel, task }
    }

    /// Ask the task to stop at its next check point.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait for the task to exit. A panicked task is logged, not propagated.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!(error = %e, "background task panicked");
            }
        }
    }
}
