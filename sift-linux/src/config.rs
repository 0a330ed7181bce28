//! Load config from file and environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Daemon configuration. File: ~/.config/sift/config.toml or /etc/sift/config.toml.
/// Env overrides: SIFT_LISTEN_PORT, SIFT_SAMPLE_SIZE, SIFT_BOOTSTRAP (comma-separated),
/// SIFT_ANALYTICS_URL, SIFT_ANALYTICS_USER_DATA.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// RPC listen port (default 45700).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Peers queried per discovery cycle.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Addresses dialed once at startup to seed the routing table.
    #[serde(default)]
    pub bootstrap: Vec<SocketAddr>,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default)]
    pub cluster_id: u64,
    #[serde(default = "default_network")]
    pub network: String,
    /// Telemetry endpoint; empty disables reporting.
    #[serde(default)]
    pub analytics_url: String,
    #[serde(default = "default_analytics_interval_secs")]
    pub analytics_interval_secs: u64,
    #[serde(default)]
    pub analytics_user_data: String,
}

fn default_listen_port() -> u16 {
    45700
}
fn default_sample_size() -> usize {
    sift_core::DEFAULT_SAMPLE_SIZE
}
fn default_rpc_timeout_secs() -> u64 {
    10
}
fn default_network() -> String {
    "devnet".to_string()
}
fn default_analytics_interval_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            sample_size: default_sample_size(),
            bootstrap: Vec::new(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            cluster_id: 0,
            network: default_network(),
            analytics_url: String::new(),
            analytics_interval_secs: default_analytics_interval_secs(),
            analytics_user_data: String::new(),
        }
    }
}

impl Config {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn analytics_interval(&self) -> Duration {
        Duration::from_secs(self.analytics_interval_secs)
    }

    /// Apply overrides from an environment lookup. Unparseable values are ignored.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(p) = var("SIFT_LISTEN_PORT").and_then(|s| s.parse().ok()) {
            self.listen_port = p;
        }
        if let Some(n) = var("SIFT_SAMPLE_SIZE").and_then(|s| s.parse().ok()) {
            self.sample_size = n;
        }
        if let Some(s) = var("SIFT_BOOTSTRAP") {
            let addrs: Result<Vec<SocketAddr>, _> = s
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::parse::<SocketAddr>)
                .collect();
            match addrs {
                Ok(addrs) => self.bootstrap = addrs,
                Err(e) => warn!(error = %e, "ignoring SIFT_BOOTSTRAP"),
            }
        }
        if let Some(url) = var("SIFT_ANALYTICS_URL") {
            self.analytics_url = url;
        }
        if let Some(data) = var("SIFT_ANALYTICS_USER_DATA") {
            self.analytics_user_data = data;
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    c.apply_env(|k| std::env::var(k).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/sift/config.toml"));
    }
    out.push(PathBuf::from("/etc/sift/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    let text = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read config file");
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn file_fields_default_when_missing() {
        let c: Config =
            toml::from_str("listen_port = 5000\nbootstrap = [\"10.0.0.1:45700\"]").unwrap();
        assert_eq!(c.listen_port, 5000);
        assert_eq!(c.bootstrap, vec![addr("10.0.0.1:45700")]);
        assert_eq!(c.sample_size, sift_core::DEFAULT_SAMPLE_SIZE);
        assert_eq!(c.network, "devnet");
        assert!(c.analytics_url.is_empty());
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SIFT_LISTEN_PORT", "6000"),
            ("SIFT_SAMPLE_SIZE", "not-a-number"),
            ("SIFT_BOOTSTRAP", "10.0.0.1:1, 10.0.0.2:2"),
            ("SIFT_ANALYTICS_URL", "http://collector.local/report"),
        ]);
        let mut c = Config::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.listen_port, 6000);
        assert_eq!(c.sample_size, sift_core::DEFAULT_SAMPLE_SIZE);
        assert_eq!(c.bootstrap.len(), 2);
        assert_eq!(c.analytics_url, "http://collector.local/report");
    }

    #[test]
    fn bad_bootstrap_list_keeps_previous() {
        let mut c = Config {
            bootstrap: vec![addr("10.0.0.9:9")],
            ..Config::default()
        };
        c.apply_env(|k| (k == "SIFT_BOOTSTRAP").then(|| "nonsense".to_string()));
        assert_eq!(c.bootstrap, vec![addr("10.0.0.9:9")]);
    }
}
