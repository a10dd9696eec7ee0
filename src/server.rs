//! Listener / lifecycle (C5): bind, accept, fan out to connection handlers,
//! and run the graceful shutdown protocol described in SPEC_FULL.md §4.5.

use crate::connection;
use crate::snapshot::SnapshotStore;
use crate::store::{GraphStore, StoreHandle};
use eyre::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;

/// Which interfaces to bind. Resolves the source project's two incompatible
/// `localhost:PORT` / `0.0.0.0:PORT` variants in favor of a safe default,
/// with an explicit opt-in to widen it (see SPEC_FULL.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BindAddr {
    Loopback,
    All,
}

impl BindAddr {
    fn ip(self) -> IpAddr {
        match self {
            BindAddr::Loopback => IpAddr::V4(Ipv4Addr::LOCALHOST),
            BindAddr::All => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

/// A cloneable token that lets an external caller (a signal handler, or a
/// test) request graceful shutdown and await its completion.
#[derive(Clone)]
pub struct StopHandle {
    shutdown_tx: watch::Sender<bool>,
    closed: Arc<Notify>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn wait_closed(&self) {
        self.closed.notified().await;
    }
}

pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    store: StoreHandle,
    snapshot: SnapshotStore,
    idle_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    closed: Arc<Notify>,
}

impl Server {
    pub async fn bind(
        bind_addr: BindAddr,
        port: u16,
        idle_timeout: Duration,
        snapshot: SnapshotStore,
        graph: crate::graph::Graph,
    ) -> Result<Self> {
        let addr = SocketAddr::new(bind_addr.ip(), port);
        let listener = TcpListener::bind(addr)
            .await
            .wrap_err_with(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr().wrap_err("failed to read local address")?;

        let (store, _store_join) = GraphStore::spawn(graph);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(addr = %local_addr, "starting scoop server");

        Ok(Server {
            listener,
            local_addr,
            store,
            snapshot,
            idle_timeout,
            shutdown_tx,
            shutdown_rx,
            closed: Arc::new(Notify::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shutdown_tx: self.shutdown_tx.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Runs the accept loop until shutdown is requested, then drains live
    /// connections, closes the listener, and persists the final snapshot.
    pub async fn run(self) -> Result<()> {
        let Server {
            listener,
            local_addr: _,
            store,
            snapshot,
            idle_timeout,
            shutdown_tx,
            mut shutdown_rx,
            closed,
        } = self;

        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    tracing::info!("signaling to stop accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let store = store.clone();
                            let shutdown_rx = shutdown_rx.clone();
                            handlers.spawn(connection::handle(stream, peer, store, idle_timeout, shutdown_rx));
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "error accepting connection");
                        }
                    }
                }
            }
        }

        tracing::info!("waiting for connections to close");
        while handlers.join_next().await.is_some() {}

        tracing::info!("shutting down scoop server");
        drop(listener);

        tracing::info!("saving datafile");
        match store.dump().await {
            Some(graph) => {
                if let Err(err) = snapshot.unload(graph) {
                    tracing::error!(error = %err, "failed to persist snapshot");
                }
            }
            None => {
                tracing::error!("serializer unavailable; snapshot not persisted");
            }
        }

        // Ensure the shutdown flag is set even if we got here via an
        // explicit internal code path rather than an external stop() call.
        let _ = shutdown_tx.send(true);
        closed.notify_one();
        Ok(())
    }
}
