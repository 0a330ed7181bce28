// Sift Linux: RPC transport, peer discovery and telemetry daemon.

mod config;
mod discovery;
mod telemetry;
mod transport;

use std::sync::Arc;

use anyhow::Context;
use sift_core::{Keypair, MemoryPeerStore, MemoryRoutingTable};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::transport::{ServerContext, StreamTracker, TcpRpc};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> Result<(), Box<dyn std::error::Error>> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("sift-linux {}", VERSION);
            return Ok(());
        }
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg))?;
    Ok(())
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let keypair = Arc::new(Keypair::generate());
    let local = keypair.peer_id();
    let table = Arc::new(MemoryRoutingTable::new());
    let store = Arc::new(MemoryPeerStore::new());
    let streams = Arc::new(StreamTracker::new());

    let listener = TcpListener::bind(("0.0.0.0", cfg.listen_port))
        .await
        .with_context(|| format!("cannot listen on port {}", cfg.listen_port))?;
    let listen_addr = listener.local_addr()?;
    info!(peer = %local, %listen_addr, version = VERSION, "node started");

    let server_cancel = CancellationToken::new();
    let server = tokio::spawn(transport::serve(
        listener,
        ServerContext {
            keypair: keypair.clone(),
            table: table.clone(),
            store: store.clone(),
            streams: streams.clone(),
            timeout: cfg.rpc_timeout(),
        },
        server_cancel.clone(),
    ));

    let rpc = Arc::new(TcpRpc::new(
        keypair.clone(),
        store.clone(),
        streams.clone(),
        cfg.rpc_timeout(),
    ));
    let joined = discovery::bootstrap(
        &rpc,
        &cfg.bootstrap,
        local,
        table.as_ref(),
        store.as_ref(),
    )
    .await;
    info!(joined, configured = cfg.bootstrap.len(), "bootstrap done");

    let sweeper = discovery::start_sweeper(store.clone());
    let discovery = discovery::start_discovery(
        local,
        cfg.sample_size,
        table.clone(),
        store.clone(),
        rpc,
    );
    let reporter = (!cfg.analytics_url.is_empty()).then(|| {
        info!(url = %cfg.analytics_url, "telemetry enabled");
        telemetry::spawn_reporter(
            reqwest::Client::new(),
            cfg.analytics_url.clone(),
            cfg.analytics_interval(),
            telemetry::ReportSource {
                node_id: local,
                cluster_id: cfg.cluster_id,
                network: cfg.network.clone(),
                user_data: cfg.analytics_user_data.clone(),
                listen_addrs: vec![listen_addr],
                table: table.clone(),
                streams: streams.clone(),
            },
        )
    });

    shutdown_signal().await?;
    info!("shutting down");

    discovery.shutdown().await;
    if let Some(reporter) = reporter {
        reporter.shutdown().await;
    }
    sweeper.shutdown().await;
    server_cancel.cancel();
    server.await?.context("rpc server failed")?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
