//! Telemetry snapshot of a running node, as uploaded to the analytics endpoint.

use serde::Serialize;

/// Field names follow the analytics collector's schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    #[serde(rename = "Addrs")]
    pub addrs: Vec<String>,
    #[serde(rename = "ClusterID")]
    pub cluster_id: u64,
    #[serde(rename = "Network")]
    pub network: String,
    #[serde(rename = "NodeID")]
    pub node_id: String,
    #[serde(rename = "Peers")]
    pub peers: usize,
    #[serde(rename = "ProcessID")]
    pub process_id: u32,
    #[serde(rename = "InboundStreams")]
    pub inbound_streams: Vec<String>,
    #[serde(rename = "OutboundStreams")]
    pub outbound_streams: Vec<String>,
    /// Unix seconds.
    #[serde(rename = "Timestamp")]
    pub timestamp: i64,
    #[serde(rename = "UserData")]
    pub user_data: String,
    #[serde(rename = "Version")]
    pub version: String,
}
