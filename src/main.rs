//! Entry point (C6): parse configuration, construct C1-C5, hand over to the
//! lifecycle, and wait for SIGINT/SIGTERM to drive a graceful shutdown.

use clap::Parser;
use eyre::Result;
use scoopd::cli::{Args, Config};
use scoopd::server::Server;
use scoopd::snapshot::SnapshotStore;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let cfg = Config::from_args(args)?;

    let (snapshot, graph) = SnapshotStore::load(&cfg.dir)?;

    let server = Server::bind(cfg.bind, cfg.port, cfg.idle_timeout, snapshot, graph).await?;
    let stop = server.stop_handle();

    tokio::spawn(async move {
        wait_for_termination().await;
        tracing::info!("received shutdown signal");
        stop.stop();
    });

    server.run().await?;

    tracing::info!("scoop server closed");
    Ok(())
}

/// Waits for SIGINT or (on unix) SIGTERM, whichever comes first.
#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
