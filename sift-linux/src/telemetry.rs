//! Telemetry reporter: periodically POSTs a JSON snapshot of the node to the analytics URL.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sift_core::{PeerId, Report, RoutingTable, StopHandle};
use tracing::{trace, warn};

use crate::transport::{StreamKind, StreamTracker};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("cannot encode report: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("cannot send report: {0}")]
    Send(#[from] reqwest::Error),
}

/// Node state the reporter snapshots on every tick.
pub struct ReportSource {
    pub node_id: PeerId,
    pub cluster_id: u64,
    pub network: String,
    pub user_data: String,
    pub listen_addrs: Vec<SocketAddr>,
    pub table: Arc<dyn RoutingTable>,
    pub streams: Arc<StreamTracker>,
}

impl ReportSource {
    pub fn snapshot(&self) -> Report {
        let hex = |peers: Vec<PeerId>| -> Vec<String> {
            peers.iter().map(PeerId::to_string).collect()
        };
        Report {
            addrs: self.listen_addrs.iter().map(SocketAddr::to_string).collect(),
            cluster_id: self.cluster_id,
            network: self.network.clone(),
            node_id: self.node_id.to_string(),
            peers: self.table.size(),
            process_id: std::process::id(),
            inbound_streams: hex(self.streams.peers(StreamKind::Inbound)),
            outbound_streams: hex(self.streams.peers(StreamKind::Outbound)),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or_default(),
            user_data: self.user_data.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Encode and POST one report. The response body is ignored.
pub async fn send_report(
    client: &reqwest::Client,
    url: &str,
    report: &Report,
) -> Result<(), ReportError> {
    let body = serde_json::to_vec(report)?;
    let resp = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await?;
    trace!(status = %resp.status(), "report sent");
    Ok(())
}

/// Report every `interval` until stopped. Failures are logged and never stop the loop.
pub fn spawn_reporter(
    client: reqwest::Client,
    url: String,
    interval: Duration,
    source: ReportSource,
) -> StopHandle {
    StopHandle::spawn(move |cancel| async move {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = send_report(&client, &url, &source.snapshot()).await {
                warn!(error = %e, "telemetry report failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    })
}
